/// How a single signaling run ended, telling the supervisor what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Stream ended or the relay closed with a retryable code.
    Reconnect,
    /// The relay closed the session for good.
    Shutdown,
}

/// Close codes that mean the session is dead and must not be retried.
///
/// - `4004`: Authentication failed
/// - `4014`: Disconnected (channel deleted or kicked)
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4014)
}

pub fn outcome_for_close(code: u16) -> SessionOutcome {
    if is_fatal_close(code) {
        SessionOutcome::Shutdown
    } else {
        SessionOutcome::Reconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_and_disconnect_are_terminal() {
        assert_eq!(outcome_for_close(4004), SessionOutcome::Shutdown);
        assert_eq!(outcome_for_close(4014), SessionOutcome::Shutdown);
        assert_eq!(outcome_for_close(4015), SessionOutcome::Reconnect);
        assert_eq!(outcome_for_close(1000), SessionOutcome::Reconnect);
    }
}

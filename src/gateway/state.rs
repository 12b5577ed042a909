//! Atomic session state shared by the signaling manager and the voice
//! session.
//!
//! The backing integer is never exposed; callers move it with
//! [`AtomicSessionState::try_transition`] (compare-and-swap) or
//! [`AtomicSessionState::swap`]. Once `Disposing` is reached the only legal
//! successor is `Disposed`.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::common::errors::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum SessionState {
    Uninitialized = 0,
    Initialized = 1,
    Connecting = 2,
    Connected = 3,
    Ready = 4,
    Disposing = u32::MAX - 1,
    Disposed = u32::MAX,
}

impl SessionState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Ready,
            r if r == u32::MAX - 1 => Self::Disposing,
            _ => Self::Disposed,
        }
    }

    pub fn is_disposing(self) -> bool {
        matches!(self, Self::Disposing | Self::Disposed)
    }

    /// Whether `self -> to` respects the teardown rule.
    fn permits(self, to: SessionState) -> bool {
        match self {
            Self::Disposing => to == Self::Disposed,
            Self::Disposed => false,
            _ => true,
        }
    }
}

#[derive(Debug)]
pub struct AtomicSessionState {
    inner: AtomicU32,
}

impl AtomicSessionState {
    pub fn new(initial: SessionState) -> Self {
        Self {
            inner: AtomicU32::new(initial as u32),
        }
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_raw(self.inner.load(Ordering::Acquire))
    }

    /// Moves `from -> to` if the current state is `from`. Always returns the
    /// state observed before the attempt; the transition happened iff that
    /// equals `from`.
    pub fn try_transition(&self, from: SessionState, to: SessionState) -> SessionState {
        if !from.permits(to) {
            return self.load();
        }
        match self.inner.compare_exchange(
            from as u32,
            to as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(prior) | Err(prior) => SessionState::from_raw(prior),
        }
    }

    /// Like [`try_transition`](Self::try_transition) but reports failure as
    /// [`GatewayError::InvalidStateTransition`].
    pub fn transition(&self, from: SessionState, to: SessionState) -> GatewayResult<()> {
        let prior = self.try_transition(from, to);
        if prior == from && from.permits(to) {
            Ok(())
        } else {
            Err(GatewayError::InvalidStateTransition { from: prior, to })
        }
    }

    /// Unconditionally stores `to`, unless teardown forbids it. Returns the
    /// prior state.
    pub fn swap(&self, to: SessionState) -> SessionState {
        let mut current = self.inner.load(Ordering::Acquire);
        loop {
            let prior = SessionState::from_raw(current);
            if !prior.permits(to) {
                return prior;
            }
            match self.inner.compare_exchange_weak(
                current,
                to as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return prior,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reverts any live state back to `Initialized` so the owner can run
    /// again. Teardown states are left alone.
    pub fn revert_to_initialized(&self) -> SessionState {
        let mut current = self.inner.load(Ordering::Acquire);
        loop {
            let prior = SessionState::from_raw(current);
            if prior.is_disposing() || prior == SessionState::Uninitialized {
                return prior;
            }
            match self.inner.compare_exchange_weak(
                current,
                SessionState::Initialized as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return prior,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicSessionState {
    fn default() -> Self {
        Self::new(SessionState::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_succeeds_only_from_expected_state() {
        let state = AtomicSessionState::new(SessionState::Initialized);
        assert_eq!(
            state.try_transition(SessionState::Initialized, SessionState::Connecting),
            SessionState::Initialized
        );
        assert_eq!(state.load(), SessionState::Connecting);

        assert_eq!(
            state.try_transition(SessionState::Initialized, SessionState::Connecting),
            SessionState::Connecting
        );
        assert_eq!(state.load(), SessionState::Connecting);
    }

    #[test]
    fn disposing_only_allows_disposed() {
        let state = AtomicSessionState::new(SessionState::Ready);
        assert_eq!(state.swap(SessionState::Disposing), SessionState::Ready);

        assert_eq!(state.swap(SessionState::Connected), SessionState::Disposing);
        assert_eq!(state.load(), SessionState::Disposing);
        assert_eq!(
            state.try_transition(SessionState::Disposing, SessionState::Initialized),
            SessionState::Disposing
        );
        assert_eq!(state.load(), SessionState::Disposing);
        assert_eq!(state.revert_to_initialized(), SessionState::Disposing);

        assert!(
            state
                .transition(SessionState::Disposing, SessionState::Disposed)
                .is_ok()
        );
        assert_eq!(state.load(), SessionState::Disposed);
        assert_eq!(state.swap(SessionState::Disposing), SessionState::Disposed);
        assert_eq!(state.load(), SessionState::Disposed);
    }

    #[test]
    fn transition_error_reports_observed_state() {
        let state = AtomicSessionState::new(SessionState::Connected);
        match state.transition(SessionState::Initialized, SessionState::Connecting) {
            Err(GatewayError::InvalidStateTransition { from, to }) => {
                assert_eq!(from, SessionState::Connected);
                assert_eq!(to, SessionState::Connecting);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn revert_returns_live_states_to_initialized() {
        let state = AtomicSessionState::new(SessionState::Ready);
        assert_eq!(state.revert_to_initialized(), SessionState::Ready);
        assert_eq!(state.load(), SessionState::Initialized);
    }

    #[test]
    fn sentinels_sit_at_the_top_of_the_range() {
        assert_eq!(SessionState::Disposed as u32, u32::MAX);
        assert_eq!(SessionState::Disposing as u32, u32::MAX - 1);
        assert!(SessionState::Ready < SessionState::Disposing);
    }
}

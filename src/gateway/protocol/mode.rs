use bitflags::bitflags;

bitflags! {
    /// Set of encryption modes advertised by the relay in `Ready`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EncryptionModes: u8 {
        const NORMAL = 1;
        const SUFFIX = 2;
        const LITE = 4;
    }
}

/// A single encryption mode, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncryptionMode {
    Unknown = 0,
    XSalsa20Poly1305 = 1,
    XSalsa20Poly1305Suffix = 2,
    XSalsa20Poly1305Lite = 4,
}

impl EncryptionMode {
    pub fn from_name(name: &str) -> Self {
        match name {
            "xsalsa20_poly1305" => Self::XSalsa20Poly1305,
            "xsalsa20_poly1305_suffix" => Self::XSalsa20Poly1305Suffix,
            "xsalsa20_poly1305_lite" => Self::XSalsa20Poly1305Lite,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::XSalsa20Poly1305 => "xsalsa20_poly1305",
            Self::XSalsa20Poly1305Suffix => "xsalsa20_poly1305_suffix",
            Self::XSalsa20Poly1305Lite => "xsalsa20_poly1305_lite",
            Self::Unknown => "unknown",
        }
    }

    pub fn flag(self) -> EncryptionModes {
        EncryptionModes::from_bits_truncate(self as u8)
    }
}

impl EncryptionModes {
    /// Collects recognised mode names; unknown names contribute nothing.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .map(EncryptionMode::from_name)
            .fold(Self::empty(), |set, mode| set | mode.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_ignored() {
        let modes = EncryptionModes::from_names([
            "aead_aes256_gcm_rtpsize",
            "xsalsa20_poly1305_lite",
            "xsalsa20_poly1305",
        ]);
        assert_eq!(modes, EncryptionModes::LITE | EncryptionModes::NORMAL);
    }

    #[test]
    fn only_unknown_names_yield_an_empty_set() {
        let modes = EncryptionModes::from_names(["aead_xchacha20_poly1305_rtpsize"]);
        assert!(modes.is_empty());
        assert!(EncryptionMode::Unknown.flag().is_empty());
    }

    #[test]
    fn names_round_trip() {
        for mode in [
            EncryptionMode::XSalsa20Poly1305,
            EncryptionMode::XSalsa20Poly1305Suffix,
            EncryptionMode::XSalsa20Poly1305Lite,
        ] {
            assert_eq!(EncryptionMode::from_name(mode.as_str()), mode);
        }
    }
}

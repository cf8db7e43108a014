use std::fmt;
use std::str::FromStr;

use crate::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u128);

impl SessionId {
    /// Fresh id from the OS RNG.
    pub fn random() -> Result<Self, getrandom::Error> {
        let mut b = [0u8; 16];
        getrandom::getrandom(&mut b)?;
        Ok(Self(u128::from_be_bytes(b)))
    }

    pub fn short(self) -> u64 {
        // Good enough for logs: XOR high/low halves.
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ProtoError::Malformed(format!("session id {s:?} is not 32 hex digits")));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ProtoError::Malformed(format!("session id {s:?} is not hex")))
    }
}

#[cfg(test)]
mod tests {
    use super::SessionId;

    #[test]
    fn hex_form_is_fixed_width_and_parses_back() {
        let id = SessionId(0xab);
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.ends_with("ab"));
        assert_eq!(s.parse::<SessionId>().unwrap(), id);
        assert!("xyz".parse::<SessionId>().is_err());
    }

    #[test]
    fn random_ids_differ() {
        let a = SessionId::random().unwrap();
        let b = SessionId::random().unwrap();
        assert_ne!(a, b);
    }
}

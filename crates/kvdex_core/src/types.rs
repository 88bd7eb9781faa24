//! Core type definitions for kvdex.

use std::fmt;
use std::str::FromStr;

/// Primary key of a record.
///
/// Primary keys are positive, allocated from a per-model counter and never
/// reused within a dataset's lifetime (a reset starts again at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey(u64);

impl PrimaryKey {
    /// Creates a primary key, rejecting zero.
    #[must_use]
    pub const fn new(pk: u64) -> Option<Self> {
        if pk == 0 {
            None
        } else {
            Some(Self(pk))
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrimaryKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("{s:?} is not a primary key"))
    }
}

impl From<PrimaryKey> for u64 {
    fn from(pk: PrimaryKey) -> Self {
        pk.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_primary_key() {
        assert!(PrimaryKey::new(0).is_none());
        assert!("0".parse::<PrimaryKey>().is_err());
        assert!("-3".parse::<PrimaryKey>().is_err());
    }

    #[test]
    fn parse_and_display() {
        let pk: PrimaryKey = "42".parse().unwrap();
        assert_eq!(pk.as_u64(), 42);
        assert_eq!(pk.to_string(), "42");
        assert!(PrimaryKey::new(1) < PrimaryKey::new(2));
    }
}

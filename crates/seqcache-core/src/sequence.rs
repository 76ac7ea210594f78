//! Feed cursor

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a consumer within a changes feed
///
/// `seq` is the position itself. `triggered_by` disambiguates entries
/// injected by access-grant changes, and `low_seq` is the lowest sequence
/// known to be complete. Consumers treat the value as opaque and hand it back
/// unchanged.
///
/// Ordering compares `seq`, then `triggered_by`, then `low_seq`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SequenceId {
    pub seq: u64,
    pub triggered_by: u64,
    pub low_seq: u64,
}

impl SequenceId {
    /// Cursor at a plain sequence
    pub const fn new(seq: u64) -> Self {
        Self {
            seq,
            triggered_by: 0,
            low_seq: 0,
        }
    }

    /// Set the access-grant sequence that injected this entry
    pub const fn with_triggered_by(mut self, triggered_by: u64) -> Self {
        self.triggered_by = triggered_by;
        self
    }

    /// Set the lowest complete sequence
    pub const fn with_low_seq(mut self, low_seq: u64) -> Self {
        self.low_seq = low_seq;
        self
    }
}

impl From<u64> for SequenceId {
    fn from(seq: u64) -> Self {
        Self::new(seq)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.low_seq, self.triggered_by) {
            (0, 0) => write!(f, "{}", self.seq),
            (0, t) => write!(f, "{}:{}", t, self.seq),
            (l, 0) => write!(f, "{}::{}", l, self.seq),
            (l, t) => write!(f, "{}:{}:{}", l, t, self.seq),
        }
    }
}

/// Error parsing the textual form of a [`SequenceId`]
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid sequence id: {0:?}")]
pub struct SequenceIdParseError(pub String);

impl FromStr for SequenceId {
    type Err = SequenceIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SequenceIdParseError(s.to_string());
        let num = |part: &str| part.parse::<u64>().map_err(|_| invalid());

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [seq] => Ok(SequenceId::new(num(seq)?)),
            [triggered_by, seq] => {
                Ok(SequenceId::new(num(seq)?).with_triggered_by(num(triggered_by)?))
            }
            [low, "", seq] => Ok(SequenceId::new(num(seq)?).with_low_seq(num(low)?)),
            [low, triggered_by, seq] => Ok(SequenceId::new(num(seq)?)
                .with_triggered_by(num(triggered_by)?)
                .with_low_seq(num(low)?)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(SequenceId::new(5).to_string(), "5");
        assert_eq!(SequenceId::new(5).with_triggered_by(3).to_string(), "3:5");
        assert_eq!(SequenceId::new(5).with_low_seq(2).to_string(), "2::5");
        assert_eq!(
            SequenceId::new(5).with_triggered_by(3).with_low_seq(2).to_string(),
            "2:3:5"
        );
    }

    #[test]
    fn test_text_form_is_opaque() {
        let ids = [
            SequenceId::new(0),
            SequenceId::new(10_010),
            SequenceId::new(7).with_triggered_by(4),
            SequenceId::new(7).with_low_seq(6),
            SequenceId::new(u64::MAX).with_triggered_by(1).with_low_seq(9),
        ];
        for id in ids {
            let parsed: SequenceId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);

            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(serde_json::from_str::<SequenceId>(&json).unwrap(), id);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<SequenceId>().is_err());
        assert!("abc".parse::<SequenceId>().is_err());
        assert!("1:2:3:4".parse::<SequenceId>().is_err());
        assert!("1::".parse::<SequenceId>().is_err());
    }

    #[test]
    fn test_ordering_by_seq_first() {
        let a = SequenceId::new(3).with_triggered_by(9);
        let b = SequenceId::new(4);
        assert!(a < b);
        assert!(SequenceId::new(4) < SequenceId::new(4).with_triggered_by(1));
    }
}

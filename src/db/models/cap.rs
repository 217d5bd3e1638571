use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Supply or borrow ceiling of a reserve.
///
/// `Unbounded` is a distinct variant rather than a float infinity: it is written
/// as JSON `null` and SQL `NULL`, and never takes part in arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum Cap {
    Limited(BigDecimal),
    Unbounded,
}

impl Cap {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Cap::Unbounded)
    }

    pub fn limit(&self) -> Option<&BigDecimal> {
        match self {
            Cap::Limited(v) => Some(v),
            Cap::Unbounded => None,
        }
    }
}

impl From<Option<BigDecimal>> for Cap {
    fn from(value: Option<BigDecimal>) -> Self {
        value.map(Cap::Limited).unwrap_or(Cap::Unbounded)
    }
}

impl std::fmt::Display for Cap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cap::Limited(v) => write!(f, "{}", v),
            Cap::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl Serialize for Cap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.limit().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<BigDecimal>::deserialize(deserializer).map(Cap::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_unbounded_serializes_as_null() {
        let json = serde_json::to_string(&Cap::Unbounded).unwrap();
        assert_eq!(json, "null");

        let back: Cap = serde_json::from_str("null").unwrap();
        assert!(back.is_unbounded());
    }

    #[test]
    fn test_limited_survives_json() {
        let cap = Cap::Limited(BigDecimal::from_str("2000000").unwrap());
        let json = serde_json::to_string(&cap).unwrap();
        let back: Cap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
        assert_eq!(back.limit(), Some(&BigDecimal::from(2_000_000)));
    }
}

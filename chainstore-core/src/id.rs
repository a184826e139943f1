//! Identity types for remote database objects
//!
//! Objects are addressed by a `space.type.instance` triple. Ids order by
//! space, then type, then instance, so all ids of one type are contiguous.

use crate::error::ValidationError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Relative protocol id space.
pub const RELATIVE_PROTOCOL_SPACE: u8 = 0;
/// Protocol id space (accounts, assets, orders, ...).
pub const PROTOCOL_SPACE: u8 = 1;
/// Implementation id space (balances, statistics, global properties, ...).
pub const IMPLEMENTATION_SPACE: u8 = 2;

/// Identifier of an object on the remote database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    space: u8,
    type_id: u16,
    instance: u64,
}

impl ObjectId {
    pub const fn new(space: u8, type_id: u16, instance: u64) -> Self {
        Self {
            space,
            type_id,
            instance,
        }
    }

    pub fn space(&self) -> u8 {
        self.space
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Returns true if both ids share space and type.
    pub fn same_type(&self, other: &ObjectId) -> bool {
        self.space == other.space && self.type_id == other.type_id
    }

    /// Returns true if `candidate` has the `space.type.instance` shape.
    pub fn is_object_id(candidate: &str) -> bool {
        candidate.parse::<ObjectId>().is_ok()
    }
}

fn all_digits(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for ObjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidObjectId {
            value: s.to_string(),
        };
        let mut parts = s.split('.');
        let (Some(space), Some(type_id), Some(instance), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if !(all_digits(space) && all_digits(type_id) && all_digits(instance)) {
            return Err(invalid());
        }
        Ok(Self {
            space: space.parse().map_err(|_| invalid())?,
            type_id: type_id.parse().map_err(|_| invalid())?,
            instance: instance.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space, self.type_id, self.instance)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Vote identifier in `type:instance` form, e.g. `1:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoteId {
    vote_type: u8,
    instance: u32,
}

impl VoteId {
    pub const fn new(vote_type: u8, instance: u32) -> Self {
        Self {
            vote_type,
            instance,
        }
    }

    pub fn vote_type(&self) -> u8 {
        self.vote_type
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }
}

impl FromStr for VoteId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidVoteId {
            value: s.to_string(),
        };
        let (vote_type, instance) = s.split_once(':').ok_or_else(invalid)?;
        if !(all_digits(vote_type) && all_digits(instance)) {
            return Err(invalid());
        }
        Ok(Self {
            vote_type: vote_type.parse().map_err(|_| invalid())?,
            instance: instance.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vote_type, self.instance)
    }
}

impl Serialize for VoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_object_id() {
        let id: ObjectId = "1.2.100".parse().unwrap();
        assert_eq!(id.space(), PROTOCOL_SPACE);
        assert_eq!(id.type_id(), 2);
        assert_eq!(id.instance(), 100);
        assert_eq!(id.to_string(), "1.2.100");
    }

    #[test]
    fn test_reject_malformed_object_ids() {
        for bad in ["", "1.2", "1.2.3.4", "a.b.c", "1..3", "1.2.-3", "1.2.+3", " 1.2.3", "alice"] {
            assert!(!ObjectId::is_object_id(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_object_ids_order_by_type_then_instance() {
        let a: ObjectId = "1.2.9".parse().unwrap();
        let b: ObjectId = "1.2.10".parse().unwrap();
        let c: ObjectId = "1.3.0".parse().unwrap();
        let d: ObjectId = "2.0.0".parse().unwrap();
        assert!(a < b && b < c && c < d);
        assert!(a.same_type(&b));
        assert!(!b.same_type(&c));
    }

    #[test]
    fn test_object_id_serde_as_string() {
        let id = ObjectId::new(2, 4, 55);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2.4.55\"");
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ObjectId>("\"2.4\"").is_err());
    }

    #[test]
    fn test_parse_vote_id() {
        let vote: VoteId = "1:17".parse().unwrap();
        assert_eq!(vote.vote_type(), 1);
        assert_eq!(vote.instance(), 17);
        assert_eq!(vote.to_string(), "1:17");
        assert!("1.17".parse::<VoteId>().is_err());
        assert!(":3".parse::<VoteId>().is_err());
    }

    proptest! {
        #[test]
        fn prop_object_id_display_parses_back(space in 0u8..3, type_id in 0u16..64, instance in any::<u64>()) {
            let id = ObjectId::new(space, type_id, instance);
            let parsed: ObjectId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn prop_object_id_order_matches_instance_order(a in any::<u64>(), b in any::<u64>()) {
            let ia = ObjectId::new(1, 7, a);
            let ib = ObjectId::new(1, 7, b);
            prop_assert_eq!(ia.cmp(&ib), a.cmp(&b));
        }
    }
}

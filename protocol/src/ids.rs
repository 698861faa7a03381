use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

macro_rules! task_id {
    ($name:ident, $prefix:literal) => {
        /// Opaque, globally unique task identifier.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh identifier. UUIDv7 keeps ids roughly sortable by
            /// creation time, which makes journals and report trees easier to
            /// eyeball.
            pub fn new() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_string(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

task_id!(EpicId, "epic");
task_id!(PbiId, "pbi");
task_id!(SbiId, "sbi");

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_round_trip_through_serde_as_plain_strings() {
        let id = SbiId::from_string("sbi-0001");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"sbi-0001\"");
        let back: SbiId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn minted_ids_carry_the_kind_prefix() {
        assert!(SbiId::new().as_str().starts_with("sbi-"));
        assert!(PbiId::new().as_str().starts_with("pbi-"));
        assert!(EpicId::new().as_str().starts_with("epic-"));
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a `Uuid` newtype with the conversions every id in the catalog needs.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifies one evaluation task (a plan plus its results).
    TaskId
);
define_id!(
    /// Identifies a prompt across all of its versions.
    PromptId
);
define_id!(
    /// Identifies one immutable version of a prompt template.
    PromptVersionId
);
define_id!(
    /// Identifies a configured model target.
    ModelId
);
define_id!(
    /// Identifies a single dataset row.
    DatasetRowId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trips_through_uuid() {
        let uuid = Uuid::new_v4();
        let id = ModelId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), &uuid);

        let back: Uuid = id.into();
        assert_eq!(back, uuid);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}

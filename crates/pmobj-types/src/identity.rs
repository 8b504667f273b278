use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

macro_rules! uuid_identity {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh time-ordered (UUID v7) identity.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// First 8 hex characters, prefixed.
            pub fn short_id(&self) -> String {
                let simple = self.0.simple().to_string();
                format!(concat!($prefix, ":{}"), &simple[..8])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.short_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidUuid(e.to_string()))
            }
        }
    };
}

uuid_identity!(
    /// Identity of a storage pool. One object cache exists per pool.
    PoolId,
    "pool"
);

uuid_identity!(
    /// Identity of a container inside a pool.
    ContainerId,
    "cont"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
        assert_ne!(PoolId::generate(), PoolId::generate());
    }

    #[test]
    fn parse_roundtrip() {
        let id = ContainerId::generate();
        let parsed: ContainerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn short_id_has_prefix() {
        let id = PoolId::generate();
        assert!(id.short_id().starts_with("pool:"));
        assert_eq!(id.short_id().len(), "pool:".len() + 8);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<ContainerId>(),
            Err(TypeError::InvalidUuid(_))
        ));
    }
}

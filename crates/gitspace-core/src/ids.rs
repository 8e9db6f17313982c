//! Core identifier types for the gitspace orchestrator.
//!
//! Every persisted entity is keyed by a positive 64-bit integer allocated by the
//! store. Each entity gets its own newtype so a config id can never be passed where
//! an instance id is expected. The big-endian byte form is used for storage keys,
//! which keeps prefix scans ordered by allocation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw integer id.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Return the raw integer value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Return the big-endian byte representation used in storage keys.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Rebuild an id from its storage key bytes.
            #[must_use]
            pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
                Self(i64::from_be_bytes(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value: i64 = s.parse().map_err(|_| IdError::InvalidNumber(s.to_string()))?;
                if value <= 0 {
                    return Err(IdError::NotPositive(value));
                }
                Ok(Self(value))
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id!(
    /// Identifier of a space, the tenant-level container owning gitspaces.
    SpaceId
);

int_id!(
    /// Identifier of a user-authored gitspace configuration.
    GitspaceConfigId
);

int_id!(
    /// Identifier of one concrete instantiation of a gitspace configuration.
    GitspaceInstanceId
);

int_id!(
    /// Identifier of an infrastructure provider configuration (where to provision).
    InfraProviderConfigId
);

int_id!(
    /// Identifier of an infrastructure provider resource (how much to provision).
    InfraProviderResourceId
);

int_id!(
    /// Identifier of an infrastructure provider template.
    InfraProviderTemplateId
);

int_id!(
    /// Identifier of a durable provisioned-infrastructure record.
    InfraProvisionedId
);

int_id!(
    /// Identifier of a persisted gitspace domain event.
    GitspaceEventId
);

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a decimal integer.
    #[error("not a valid integer id: {0}")]
    InvalidNumber(String),

    /// Ids are allocated from 1 upwards.
    #[error("id must be positive, got {0}")]
    NotPositive(i64),
}

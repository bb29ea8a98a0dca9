//! Identifier newtypes and action enums shared across the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cryptographic node identity, as supplied by the discovery layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Identity-provider identifier (e.g. a federation domain).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

/// Account identifier within one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityId(pub String);

/// Vault identifier used to scope per-vault permissions.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VaultId(pub String);

macro_rules! id_impls {
    ($t:ident) => {
        impl $t {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                $t(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                $t(value)
            }
        }
    };
}

id_impls!(NodeId);
id_impls!(ProviderId);
id_impls!(IdentityId);
id_impls!(VaultId);

/// Gestalt-level action grantable to every node of one component.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GestaltAction {
    /// Allow sending notifications to this gestalt.
    Notify,
    /// Allow scanning this gestalt's advertised vaults.
    Scan,
    /// Allow claiming this gestalt's identities.
    Claim,
}

/// Per-vault action grantable to a gestalt.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VaultAction {
    /// Allow cloning the vault.
    Clone,
    /// Allow pulling updates from the vault.
    Pull,
}

//! Access-control records attached to buckets, objects and multipart sessions.

use crate::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// Canned policy applied to every actor that is neither the owner nor a grantee.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CannedPolicy {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
}

impl CannedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedPolicy::Private => "private",
            CannedPolicy::PublicRead => "public-read",
            CannedPolicy::PublicReadWrite => "public-read-write",
        }
    }
}

impl fmt::Display for CannedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedPolicy {
    type Err = StorageError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(CannedPolicy::Private),
            "public-read" => Ok(CannedPolicy::PublicRead),
            "public-read-write" => Ok(CannedPolicy::PublicReadWrite),
            other => Err(StorageError::Validation(format!(
                "unknown ACL policy `{other}`"
            ))),
        }
    }
}

/// Permission carried by an explicit grant.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    Read,
    Write,
    FullControl,
}

/// One `(grantee, permission)` entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grant {
    pub grantee_id: String,
    pub permission: Permission,
}

/// Action an actor attempts against a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    /// ACL changes and bucket deletion. Never granted by a canned policy.
    FullControl,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::FullControl => "full-control",
        };
        f.write_str(name)
    }
}

/// An ACL value. A write always attaches a fresh `Acl`; stored values are
/// never mutated in place.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Acl {
    pub owner_id: String,
    pub default_policy: CannedPolicy,
    pub grants: BTreeSet<Grant>,
}

impl Acl {
    /// Private ACL owned by `owner_id` with no grants.
    pub fn private(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            default_policy: CannedPolicy::Private,
            grants: BTreeSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: CannedPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn grant(mut self, grantee_id: impl Into<String>, permission: Permission) -> Self {
        self.grants.insert(Grant {
            grantee_id: grantee_id.into(),
            permission,
        });
        self
    }

    /// True if `actor` holds any of `permissions` through an explicit grant.
    pub fn has_grant(&self, actor: &str, permissions: &[Permission]) -> bool {
        self.grants
            .iter()
            .any(|g| g.grantee_id == actor && permissions.contains(&g.permission))
    }
}

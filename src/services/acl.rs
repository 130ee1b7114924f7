//! Access decisions over supplied ACL records. Pure functions, no I/O.

use crate::{
    errors::{StorageError, StorageResult},
    models::acl::{Acl, Action, CannedPolicy, Permission},
};
use tracing::info;

/// Decide whether `actor` may perform `action` under `acl`.
///
/// The owner may do anything. Otherwise reads are allowed by a public
/// policy or a Read/FullControl grant, writes by `public-read-write` or a
/// Write/FullControl grant, and full control only by a FullControl grant.
pub fn authorize(actor: &str, acl: &Acl, action: Action) -> bool {
    if acl.owner_id == actor {
        return true;
    }

    match action {
        Action::Read => {
            matches!(
                acl.default_policy,
                CannedPolicy::PublicRead | CannedPolicy::PublicReadWrite
            ) || acl.has_grant(actor, &[Permission::Read, Permission::FullControl])
        }
        Action::Write => {
            acl.default_policy == CannedPolicy::PublicReadWrite
                || acl.has_grant(actor, &[Permission::Write, Permission::FullControl])
        }
        Action::FullControl => acl.has_grant(actor, &[Permission::FullControl]),
    }
}

/// [`authorize`], turning a denial into `Forbidden` for `resource`.
pub fn require(actor: &str, acl: &Acl, action: Action, resource: &str) -> StorageResult<()> {
    if authorize(actor, acl, action) {
        Ok(())
    } else {
        info!(%actor, %action, %resource, "authorization denied");
        Err(StorageError::Forbidden(format!(
            "`{actor}` may not {action} `{resource}`"
        )))
    }
}

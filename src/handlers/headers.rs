//! Request-header conventions: custom metadata, ACLs and content digests.
//!
//! Everything is turned into typed values here so the services never see
//! raw header maps.

use crate::{
    errors::StorageResult,
    models::{
        acl::{Acl, CannedPolicy, Permission},
        object::UserMetadata,
    },
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Headers with this prefix are collected into the object's metadata.
pub const META_PREFIX: &str = "c-meta-";
/// Canned ACL policy token. Absent means `private`.
pub const ACL_HEADER: &str = "c-acl";
pub const GRANT_READ_HEADER: &str = "c-grant-read";
pub const GRANT_WRITE_HEADER: &str = "c-grant-write";
pub const GRANT_FULL_CONTROL_HEADER: &str = "c-grant-full-control";
pub const CONTENT_MD5_HEADER: &str = "content-md5";

/// Collect every `c-meta-*` header. Repeated headers keep all their values.
/// Values that are not visible ASCII are skipped.
pub fn user_metadata(headers: &HeaderMap) -> UserMetadata {
    let mut metadata = UserMetadata::default();
    for (name, value) in headers {
        if !name.as_str().starts_with(META_PREFIX) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            metadata.insert(name.as_str(), value);
        }
    }
    metadata
}

/// Build an ACL for `owner` from the policy and grant headers.
///
/// Grant headers hold comma-separated grantee ids and may repeat.
pub fn acl_from_headers(owner: &str, headers: &HeaderMap) -> StorageResult<Acl> {
    let policy = match headers.get(ACL_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) if !token.trim().is_empty() => token.parse::<CannedPolicy>()?,
        _ => CannedPolicy::Private,
    };

    let mut acl = Acl::private(owner).with_policy(policy);
    for (header, permission) in [
        (GRANT_READ_HEADER, Permission::Read),
        (GRANT_WRITE_HEADER, Permission::Write),
        (GRANT_FULL_CONTROL_HEADER, Permission::FullControl),
    ] {
        for grantee in header_list(headers, header) {
            acl = acl.grant(grantee, permission);
        }
    }
    Ok(acl)
}

pub fn content_md5(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_MD5_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Echo stored metadata back as response headers.
pub fn write_user_metadata(headers: &mut HeaderMap, metadata: &UserMetadata) {
    for (name, values) in &metadata.0 {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
}

fn header_list<'a>(headers: &'a HeaderMap, name: &str) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

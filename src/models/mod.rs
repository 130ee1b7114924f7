//! Core data models for the gateway.
//!
//! These entities map cleanly to metadata tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`. ACLs and custom metadata are typed
//! records stored as JSON columns.

pub mod acl;
pub mod bucket;
pub mod multipart;
pub mod object;

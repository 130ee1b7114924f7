//! Storage core: ACL decisions, bucket/object management, multipart
//! coordination, garbage collection, and the two backing-store adapters.

pub mod acl;
pub mod byte_stream;
pub mod fs_backend;
pub mod gc;
pub mod metadata_store;
pub mod multipart_service;
pub mod object_backend;
pub mod storage_service;

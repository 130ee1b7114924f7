//! Shared handler state, constructed once in `main`.

use crate::services::{multipart_service::MultipartService, storage_service::StorageService};

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub multipart: MultipartService,
}

impl AppState {
    pub fn new(storage: StorageService) -> Self {
        let multipart = MultipartService::new(storage.clone());
        Self { storage, multipart }
    }
}

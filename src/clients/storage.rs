use async_trait::async_trait;

use super::BlockStorageProvider;
use crate::controller::error::{Error, Result};

/// Provider used when no cloud storage integration is configured
///
/// Every resize fails, which makes a volume size change surface as an
/// update failure instead of silently leaving the filesystem small.
pub struct DisabledBlockStorage;

#[async_trait]
impl BlockStorageProvider for DisabledBlockStorage {
    async fn resize_volume(&self, volume_id: &str, _size_gib: i64) -> Result<()> {
        Err(Error::VolumeProvider(format!(
            "no block storage provider configured, cannot resize {}",
            volume_id
        )))
    }
}

//! The snapshot a successful build leaves behind.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::communicator::GeneratedData;
use crate::provider::{ApiError, CloudApi};

/// Identity and metadata of a created snapshot.
#[derive(Clone)]
pub struct Artifact {
    /// Snapshot description used as its name.
    pub snapshot_name: String,
    /// Snapshot image identifier.
    pub snapshot_id: i64,
    /// Name of the image the server booted from, or its id when unnamed.
    pub source_image: String,
    /// Identifier of the source image.
    pub source_image_id: i64,
    /// Server type the snapshot was built on.
    pub server_type: String,
    /// Key/value data reported by provisioning.
    pub generated_data: GeneratedData,
    api: Arc<dyn CloudApi>,
}

impl Artifact {
    /// Creates an artifact bound to the provider that owns the snapshot.
    #[must_use]
    pub const fn new(
        snapshot_name: String,
        snapshot_id: i64,
        source_image: String,
        source_image_id: i64,
        server_type: String,
        generated_data: GeneratedData,
        api: Arc<dyn CloudApi>,
    ) -> Self {
        Self {
            snapshot_name,
            snapshot_id,
            source_image,
            source_image_id,
            server_type,
            generated_data,
            api,
        }
    }

    /// Snapshot id as a string.
    #[must_use]
    pub fn id(&self) -> String {
        self.snapshot_id.to_string()
    }

    /// Looks up a named piece of build metadata.
    ///
    /// The fixed keys are `source_image`, `source_image_id`, `server_type` and
    /// `snapshot_name`; any other key is looked up in the generated data.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<String> {
        match name {
            "source_image" => Some(self.source_image.clone()),
            "source_image_id" => Some(self.source_image_id.to_string()),
            "server_type" => Some(self.server_type.clone()),
            "snapshot_name" => Some(self.snapshot_name.clone()),
            other => self.generated_data.get(other).cloned(),
        }
    }

    /// Deletes the snapshot. A snapshot that is already gone counts as
    /// destroyed.
    ///
    /// # Errors
    ///
    /// Returns the provider error for any failure other than "not found".
    pub async fn destroy(&self) -> Result<(), ApiError> {
        info!(snapshot = self.snapshot_id, "destroying snapshot");
        match self.api.delete_image(self.snapshot_id).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A snapshot was created: '{}' (ID: {})",
            self.snapshot_name, self.snapshot_id
        )
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("snapshot_name", &self.snapshot_name)
            .field("snapshot_id", &self.snapshot_id)
            .field("source_image", &self.source_image)
            .field("source_image_id", &self.source_image_id)
            .field("server_type", &self.server_type)
            .field("generated_data", &self.generated_data)
            .finish_non_exhaustive()
    }
}

//! JSON export and import of single versions.

use std::path::Path;

use chrono::{DateTime, Utc};
use pf_types::{AlgorithmVersion, OptimizationMethod, PfResult, StoreError, VersionId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::VersionStore;

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Portable version document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionExport {
    pub version_info: AlgorithmVersion,
    pub export_time: DateTime<Utc>,
    pub format_version: String,
}

impl VersionStore {
    pub fn export_to_string(&self, version_id: VersionId) -> PfResult<String> {
        let version = self
            .get_version(version_id)?
            .ok_or(StoreError::VersionNotFound { version_id })?;
        let document = VersionExport {
            version_info: version,
            export_time: Utc::now(),
            format_version: EXPORT_FORMAT_VERSION.to_string(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write a version to `path` as JSON.
    pub fn export_version(&self, version_id: VersionId, path: &Path) -> PfResult<()> {
        let json = self.export_to_string(version_id)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        info!(version_id, path = %path.display(), "exported version");
        Ok(())
    }

    /// Create a new version of `algorithm_key` from an export document.
    ///
    /// The imported version gets a fresh number, no parent and method
    /// `import`, regardless of what the document recorded.
    pub fn import_from_str(&self, json: &str, algorithm_key: &str) -> PfResult<VersionId> {
        let document: VersionExport = serde_json::from_str(json)?;
        if document.format_version != EXPORT_FORMAT_VERSION {
            return Err(StoreError::UnsupportedFormat {
                format_version: document.format_version,
            }
            .into());
        }

        let source = &document.version_info;
        let description = format!(
            "Imported from {} v{}: {}",
            source.algorithm_key, source.version_number, source.description
        );
        self.save_version(
            algorithm_key,
            &source.code,
            &source.parameters,
            &description,
            OptimizationMethod::Import,
            None,
        )
    }

    pub fn import_version(&self, path: &Path, algorithm_key: &str) -> PfResult<VersionId> {
        let json = std::fs::read_to_string(path)?;
        let id = self.import_from_str(&json, algorithm_key)?;
        info!(version_id = id, path = %path.display(), algorithm = algorithm_key, "imported version");
        Ok(id)
    }
}

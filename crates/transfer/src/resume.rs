use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use haulbay_store::MultipartUploadPart;

/// Parts completed by an earlier attempt at the same upload session. Only
/// the part numbers are interpreted when generating part requests; the etags
/// ride along for the final completion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeManifest {
    parts: Vec<MultipartUploadPart>,
}

impl ResumeManifest {
    pub fn new(parts: Vec<MultipartUploadPart>) -> Self {
        Self { parts }
    }

    pub fn contains(&self, part_number: i32) -> bool {
        self.parts.iter().any(|p| p.part_number == part_number)
    }

    pub fn parts(&self) -> &[MultipartUploadPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Load a manifest persisted by an interrupted attempt.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

impl From<Vec<MultipartUploadPart>> for ResumeManifest {
    fn from(parts: Vec<MultipartUploadPart>) -> Self {
        Self::new(parts)
    }
}

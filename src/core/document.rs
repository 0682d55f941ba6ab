use crate::core::tier::PrivacyTier;
use serde::{Deserialize, Serialize};

/// Metadata shared by every chunk of a source file, plus the chunk position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Absolute path of the source file
    pub source_path: String,
    /// File name of the source, used when presenting context
    pub source_name: String,
    /// Tier fixed at creation; records written without one deserialize as `None`
    #[serde(default)]
    pub privacy_tier: Option<PrivacyTier>,
    pub chunk_index: usize,
    pub chunk_count: usize,
    /// Source modification time as a Unix timestamp
    pub modified_time: u64,
}

/// One bounded text segment of a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn tier(&self) -> Option<PrivacyTier> {
        self.metadata.privacy_tier
    }
}

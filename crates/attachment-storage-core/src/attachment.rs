use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Style name used when the caller does not ask for a specific variant.
pub const DEFAULT_STYLE: &str = "original";

/// A file queued for upload by the attachment manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Style the file was produced for
    pub style: String,
    /// Local temp file holding the bytes to store
    pub file: PathBuf,
}

impl PendingWrite {
    pub fn new(style: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            style: style.into(),
            file: file.into(),
        }
    }
}

/// The upstream attachment manager as seen by a storage backend.
///
/// The manager owns path interpolation and style enumeration; backends only
/// ask it for the logical path of a style.
pub trait Attachment {
    /// Logical path of a style, `None` when nothing is stored for it.
    fn path(&self, style: &str) -> Option<String>;

    /// Name of the originally assigned file, `None` when no file is associated.
    fn original_filename(&self) -> Option<&str>;

    /// Every style of this attachment, the default one included.
    fn styles(&self) -> Vec<String>;

    fn default_style(&self) -> &str {
        DEFAULT_STYLE
    }

    /// Called once per write flush after every queued entry was attempted.
    fn after_flush_writes(&self, _flushed: &[PendingWrite]) {}
}

/// Attachment backed by a fixed `style -> logical path` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedAttachment {
    #[serde(default)]
    pub original_filename: Option<String>,
    pub paths: BTreeMap<String, String>,
}

impl MappedAttachment {
    /// Attachment with a single `original` style stored at `path`.
    pub fn single(path: impl Into<String>) -> Self {
        let path = path.into();
        let original_filename = path.rsplit('/').next().map(str::to_string);
        let mut paths = BTreeMap::new();
        paths.insert(DEFAULT_STYLE.to_string(), path);
        Self {
            original_filename,
            paths,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>, path: impl Into<String>) -> Self {
        self.paths.insert(style.into(), path.into());
        self
    }

    pub fn with_original_filename(mut self, name: Option<String>) -> Self {
        self.original_filename = name;
        self
    }
}

impl Attachment for MappedAttachment {
    fn path(&self, style: &str) -> Option<String> {
        self.paths.get(style).cloned()
    }

    fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }

    fn styles(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }
}

use crate::report::Problem;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Position of a resource sitting at the mirror root.
pub const ROOT_POSITION: &str = ".";

/// The kinds of cataloged unit, each recognised by its sentinel files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cookbook,
    Workflow,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cookbook => "cookbook",
            ResourceKind::Workflow => "workflow",
        }
    }

    /// Any one of these files marks a directory as a resource root.
    pub fn sentinels(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Cookbook => &["metadata.json", "metadata.rb"],
            ResourceKind::Workflow => &["workflow.json"],
        }
    }

    /// The machine-readable descriptor, relative to the resource root.
    pub fn descriptor(&self) -> &'static str {
        match self {
            ResourceKind::Cookbook => "metadata.json",
            ResourceKind::Workflow => "workflow.json",
        }
    }

    /// The file a descriptor can be generated from, if this kind has one.
    pub fn generation_source(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Cookbook => Some("metadata.rb"),
            ResourceKind::Workflow => None,
        }
    }

    /// The first of `kinds` whose sentinel is present in `dir`.
    pub fn detect(kinds: &[ResourceKind], dir: &Path) -> Option<ResourceKind> {
        kinds.iter().copied().find(|kind| kind.sentinels().iter().any(|sentinel| dir.join(sentinel).is_file()))
    }
}

/// A resource found in a mirror.
///
/// Scanners fill in `metadata` and `manifest` during the inner pass; once
/// the pipeline hands it out, it's complete.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    /// Reference to the repository the resource came from.
    pub repository: String,
    /// Path of the resource root relative to the mirror root, `/`-separated.
    pub position: String,
    pub mirror_root: PathBuf,
    pub metadata: Map<String, Value>,
    /// Resource-relative path to BLAKE3 digest.
    pub manifest: BTreeMap<String, String>,
    /// Warnings recorded while scanning.
    pub problems: Vec<Problem>,
}

impl Resource {
    pub fn new(
        kind: ResourceKind,
        repository: impl Into<String>,
        position: impl Into<String>,
        mirror_root: &Path,
    ) -> Self {
        Self {
            kind,
            repository: repository.into(),
            position: position.into(),
            mirror_root: mirror_root.to_path_buf(),
            metadata: Map::new(),
            manifest: BTreeMap::new(),
            problems: Vec::new(),
        }
    }

    /// Absolute path of the resource root.
    pub fn path(&self) -> PathBuf {
        if self.position == ROOT_POSITION { self.mirror_root.clone() } else { self.mirror_root.join(&self.position) }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(Value::as_str)
    }

    /// Name of the resource root directory itself.
    pub fn directory_name(&self) -> String {
        self.path().file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| self.position.clone())
    }
}

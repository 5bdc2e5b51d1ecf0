use crate::error::Result;
use crate::resource::Resource;
use crate::visitor::{Content, Scanner};
use std::path::{Component, Path};

/// Records a BLAKE3 digest for every file of a resource.
///
/// Keys are resource-relative and `/`-separated on every platform, so two
/// trees with the same files produce equal manifests whichever way they were
/// retrieved or walked.
#[derive(Debug, Default)]
pub struct ManifestScanner;

impl ManifestScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Scanner for ManifestScanner {
    fn begin(&mut self, resource: &mut Resource) -> Result<()> {
        resource.manifest.clear();
        Ok(())
    }

    fn notice(&mut self, resource: &mut Resource, path: &Path, content: &mut Content) -> Result<()> {
        let digest = blake3::hash(content.bytes()?).to_hex().to_string();
        resource.manifest.insert(manifest_key(path), digest);
        Ok(())
    }
}

pub(crate) fn manifest_key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use tempfile::TempDir;

    fn scan(root: &Path, order: &[&str]) -> Resource {
        let mut resource = Resource::new(ResourceKind::Cookbook, "test", ".", root);
        let mut scanner = ManifestScanner::new();
        scanner.begin(&mut resource).unwrap();
        for path in order {
            let mut content = Content::new(root.join(path));
            scanner.notice(&mut resource, Path::new(path), &mut content).unwrap();
        }
        scanner.end(&mut resource).unwrap();
        resource
    }

    #[test]
    fn digests_are_blake3_hex() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("metadata.json"), b"{}").unwrap();
        let resource = scan(dir.path(), &["metadata.json"]);
        assert_eq!(resource.manifest["metadata.json"], blake3::hash(b"{}").to_hex().to_string());
    }

    #[test]
    fn manifest_ignores_order_and_origin() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for dir in [first.path(), second.path()] {
            std::fs::create_dir_all(dir.join("recipes")).unwrap();
            std::fs::write(dir.join("metadata.rb"), "name 'x'").unwrap();
            std::fs::write(dir.join("recipes/default.rb"), "package 'x'").unwrap();
        }
        let forwards = scan(first.path(), &["metadata.rb", "recipes/default.rb"]);
        let mut backwards = scan(second.path(), &["recipes/default.rb", "metadata.rb"]);
        backwards.repository = "elsewhere".to_string();
        assert_eq!(forwards.manifest, backwards.manifest);
    }

    #[test]
    fn keys_use_forward_slashes() {
        assert_eq!(manifest_key(&Path::new("recipes").join("default.rb")), "recipes/default.rb");
        assert_eq!(manifest_key(Path::new("./metadata.json")), "metadata.json");
    }
}

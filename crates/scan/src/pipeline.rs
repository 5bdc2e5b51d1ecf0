use crate::cursor::{Cursor, EntryKind, list};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceKind};
use crate::visitor::{Content, Scanner};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Walks a mirror, yielding one fully scanned [`Resource`] per resource root.
///
/// Each resource is handed to the scanner (usually a [`Union`](crate::Union))
/// for an inner pass over its files before it's returned. A resource whose
/// inner pass fails comes out as an `Err`, and iteration can carry on with
/// the next one; [`Pipeline::position`] says which resource failed.
pub struct Pipeline<S> {
    cursor: Cursor,
    repository: String,
    scanner: S,
}

impl<S: Scanner> Pipeline<S> {
    pub fn new<I>(mirror_root: impl Into<PathBuf>, ignored: I, kinds: &[ResourceKind], scanner: S) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let ignored = ignored.into_iter().map(Into::into).collect();
        Self { cursor: Cursor::new(mirror_root.into(), ignored, kinds.to_vec()), repository: String::new(), scanner }
    }

    /// Reference recorded on every resource, so consumers know where it came from.
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    /// Position of the last resource returned; empty before the first.
    pub fn position(&self) -> &str {
        self.cursor.position()
    }

    /// Resume just after the resource at `position`, as returned by
    /// [`Pipeline::position`] on an earlier walk of the same mirror.
    pub fn seek(&mut self, position: &str) -> Result<()> {
        self.cursor.seek(position)
    }

    pub fn rewind(&mut self) {
        self.cursor.rewind();
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    pub fn into_scanner(self) -> S {
        self.scanner
    }

    /// Run the inner pass over the resource at `position`.
    ///
    /// Nested resource roots are left out; the outer walk reaches them
    /// separately.
    #[instrument(level = "debug", skip(self, kind), fields(kind = kind.as_str()))]
    fn scan(&mut self, kind: ResourceKind, position: String) -> Result<Resource> {
        let mut resource = Resource::new(kind, self.repository.clone(), position, self.cursor.root());
        let base = resource.path();
        self.scanner.begin(&mut resource)?;

        let mut stack = vec![(PathBuf::new(), list(&base, self.cursor.ignored())?.into_iter())];
        while let Some((dir, entries)) = stack.last_mut() {
            let Some(entry) = entries.next() else {
                stack.pop();
                continue;
            };
            let relative = dir.join(&entry.name);
            let absolute = base.join(&relative);
            match entry.kind {
                EntryKind::Directory => {
                    if ResourceKind::detect(self.cursor.kinds(), &absolute).is_some() {
                        debug!(path = %relative.display(), "not descending into nested resource");
                        continue;
                    }
                    if self.scanner.notice_dir(&mut resource, &relative)? {
                        let entries = list(&absolute, self.cursor.ignored())?;
                        stack.push((relative, entries.into_iter()));
                    }
                },
                EntryKind::File => {
                    let mut content = Content::new(absolute);
                    self.scanner.notice(&mut resource, &relative, &mut content)?;
                },
                EntryKind::Other => debug!(path = %relative.display(), "skipping special file"),
            }
        }

        self.scanner.end(&mut resource)?;
        info!(
            position = %resource.position,
            files = resource.manifest.len(),
            warnings = resource.problems.len(),
            "scanned resource"
        );
        Ok(resource)
    }
}

impl<S: Scanner> Iterator for Pipeline<S> {
    type Item = std::result::Result<Resource, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.advance() {
            Ok(Some((position, kind))) => Some(self.scan(kind, position)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::manifest::ManifestScanner;
    use crate::names::NameScanner;
    use crate::visitor::Union;
    use std::path::Path;
    use tempfile::TempDir;

    const KINDS: &[ResourceKind] = &[ResourceKind::Cookbook, ResourceKind::Workflow];

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        dir
    }

    fn pipeline(root: &Path) -> Pipeline<Union> {
        let scanners = Union::new().with(ManifestScanner::new()).with(NameScanner::new());
        Pipeline::new(root, [".git"], KINDS, scanners).with_repository("https://example.com/repo.git")
    }

    #[test]
    fn single_resource_at_root() {
        let dir = tree(&[("metadata.json", r#"{"name": "solo"}"#), ("recipes/default.rb", "package 'x'")]);
        let resources: Vec<Resource> = pipeline(dir.path()).map(|r| r.unwrap()).collect();
        assert_eq!(resources.len(), 1);
        let resource = &resources[0];
        assert_eq!(resource.position, ".");
        assert_eq!(resource.repository, "https://example.com/repo.git");
        assert_eq!(resource.kind, ResourceKind::Cookbook);
        assert_eq!(
            resource.manifest.keys().collect::<Vec<_>>(),
            vec!["metadata.json", "recipes/default.rb"]
        );
    }

    #[test]
    fn three_resource_roots() {
        let dir = tree(&[
            ("README.md", "top"),
            ("cookbooks/apache/metadata.rb", "name 'apache'"),
            ("cookbooks/apache/templates/site.erb", "<%= x %>"),
            ("cookbooks/nginx/metadata.json", "{}"),
            ("workflows/release/workflow.json", "{}"),
            ("workflows/release/steps/build.sh", "make"),
        ]);
        let resources: Vec<Resource> = pipeline(dir.path()).map(|r| r.unwrap()).collect();
        let positions: Vec<_> = resources.iter().map(|r| r.position.as_str()).collect();
        assert_eq!(positions, vec!["cookbooks/apache", "cookbooks/nginx", "workflows/release"]);
        assert_eq!(resources[2].kind, ResourceKind::Workflow);
        assert_eq!(
            resources[0].manifest.keys().collect::<Vec<_>>(),
            vec!["metadata.rb", "templates/site.erb"]
        );
        assert!(resources[2].manifest.contains_key("steps/build.sh"));
    }

    #[test]
    fn nested_resources_are_scanned_separately() {
        let dir = tree(&[
            ("metadata.json", "{}"),
            ("files/config", "x"),
            ("vendor/inner/metadata.json", "{}"),
            ("vendor/inner/recipe.rb", "y"),
            (".git/HEAD", "ref"),
        ]);
        let resources: Vec<Resource> = pipeline(dir.path()).map(|r| r.unwrap()).collect();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].manifest.keys().collect::<Vec<_>>(), vec!["files/config", "metadata.json"]);
        assert_eq!(resources[1].position, "vendor/inner");
        assert_eq!(resources[1].manifest.keys().collect::<Vec<_>>(), vec!["metadata.json", "recipe.rb"]);
    }

    #[test]
    fn seek_then_next_matches_uninterrupted_walk() {
        let dir = tree(&[
            ("a/metadata.json", "{}"),
            ("a/b/metadata.json", "{}"),
            ("c/workflow.json", "{}"),
            ("c/d/e/metadata.rb", "name 'e'"),
        ]);
        let walk: Vec<Resource> = pipeline(dir.path()).map(|r| r.unwrap()).collect();
        let mut positions = vec![String::new()];
        positions.extend(walk.iter().map(|r| r.position.clone()));
        for (i, position) in positions.iter().enumerate().take(walk.len()) {
            let mut resumed = pipeline(dir.path());
            resumed.seek(position).unwrap();
            assert_eq!(resumed.next().unwrap().unwrap(), walk[i], "after {position:?}");
        }
    }

    #[test]
    fn identical_trees_have_identical_manifests() {
        let files = [("metadata.json", "{}"), ("b/two", "2"), ("a/one", "1")];
        let first = tree(&files);
        let mut reversed = files;
        reversed.reverse();
        let second = tree(&reversed);
        let a = pipeline(first.path()).next().unwrap().unwrap();
        let b = Pipeline::new(second.path(), [".svn"], KINDS, ManifestScanner::new())
            .with_repository("svn://elsewhere")
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(a.manifest, b.manifest);
    }

    #[test]
    fn failing_resource_does_not_stop_the_walk() {
        struct Picky;
        impl Scanner for Picky {
            fn notice(&mut self, resource: &mut Resource, path: &Path, _content: &mut Content) -> Result<()> {
                if path == Path::new("poison") {
                    exn::bail!(ErrorKind::Generation(format!("poisoned {}", resource.position)));
                }
                Ok(())
            }
        }

        let dir = tree(&[("a/metadata.json", "{}"), ("a/poison", ""), ("b/metadata.json", "{}")]);
        let mut pipeline = Pipeline::new(dir.path(), Vec::<OsString>::new(), KINDS, Picky);
        let err = pipeline.next().unwrap().unwrap_err();
        assert_eq!(*err, ErrorKind::Generation("poisoned a".to_string()));
        assert_eq!(pipeline.position(), "a");
        assert_eq!(pipeline.next().unwrap().unwrap().position, "b");
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn empty_mirror_has_no_resources() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path());
        assert!(pipeline.next().is_none());
        assert_eq!(pipeline.position(), "");
    }
}

//! The outer walk: finding resource roots, resumably.
//!
//! The walk is depth-first over directories in byte order of their names,
//! driven by an explicit stack with one frame per open directory. Each
//! frame holds the directory's remaining sub-directories, listed and sorted
//! up front, so a frame is closed the moment it's popped and the stack can
//! be rebuilt from nothing more than a position string.

use crate::error::{ErrorKind, Result};
use crate::manifest::manifest_key;
use crate::resource::{ROOT_POSITION, ResourceKind};
use exn::ResultExt;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::vec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Directory,
    File,
    /// Symlinks, sockets and the like; never followed or read.
    Other,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) name: OsString,
    pub(crate) kind: EntryKind,
}

/// The entries of `dir`, minus ignored names, sorted by name.
pub(crate) fn list(dir: &Path, ignored: &BTreeSet<OsString>) -> Result<Vec<Entry>> {
    let unreadable = || ErrorKind::Unreadable(dir.to_path_buf());
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).or_raise(unreadable)? {
        let entry = entry.or_raise(unreadable)?;
        let name = entry.file_name();
        if name == "." || name == ".." || ignored.contains(&name) {
            continue;
        }
        let file_type = entry.file_type().or_raise(unreadable)?;
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        entries.push(Entry { name, kind });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

struct Frame {
    /// Relative to the mirror root.
    dir: PathBuf,
    subdirs: vec::IntoIter<OsString>,
}

pub(crate) struct Cursor {
    root: PathBuf,
    ignored: BTreeSet<OsString>,
    kinds: Vec<ResourceKind>,
    stack: Vec<Frame>,
    started: bool,
    position: String,
}

impl Cursor {
    pub(crate) fn new(root: PathBuf, ignored: BTreeSet<OsString>, kinds: Vec<ResourceKind>) -> Self {
        Self { root, ignored, kinds, stack: Vec::new(), started: false, position: String::new() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn ignored(&self) -> &BTreeSet<OsString> {
        &self.ignored
    }

    pub(crate) fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub(crate) fn position(&self) -> &str {
        &self.position
    }

    fn frame(&self, dir: PathBuf) -> Result<Frame> {
        let subdirs: Vec<OsString> = list(&self.root.join(&dir), &self.ignored)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Directory)
            .map(|entry| entry.name)
            .collect();
        Ok(Frame { dir, subdirs: subdirs.into_iter() })
    }

    fn detect(&self, relative: &Path) -> Option<ResourceKind> {
        ResourceKind::detect(&self.kinds, &self.root.join(relative))
    }

    /// Advance to the next resource root, returning its position and kind.
    ///
    /// A directory that can't be listed is reported once and then skipped;
    /// calling again carries on with the rest of the walk.
    pub(crate) fn advance(&mut self) -> Result<Option<(String, ResourceKind)>> {
        if !self.started {
            self.started = true;
            let frame = self.frame(PathBuf::new())?;
            self.stack.push(frame);
            if let Some(kind) = self.detect(Path::new("")) {
                self.position = ROOT_POSITION.to_string();
                return Ok(Some((self.position.clone(), kind)));
            }
        }
        while let Some(frame) = self.stack.last_mut() {
            let Some(name) = frame.subdirs.next() else {
                self.stack.pop();
                continue;
            };
            let relative = frame.dir.join(name);
            let frame = self.frame(relative.clone())?;
            self.stack.push(frame);
            if let Some(kind) = self.detect(&relative) {
                self.position = manifest_key(&relative);
                return Ok(Some((self.position.clone(), kind)));
            }
        }
        Ok(None)
    }

    pub(crate) fn rewind(&mut self) {
        self.stack.clear();
        self.started = false;
        self.position.clear();
    }

    /// Put the walk back where it was just after returning `position`.
    ///
    /// Fails, leaving the cursor rewound, if any directory on the way no
    /// longer exists or the position is no longer a resource root.
    pub(crate) fn seek(&mut self, position: &str) -> Result<()> {
        self.rewind();
        if position.is_empty() {
            return Ok(());
        }
        let mut stack = Vec::new();
        let mut frame = self.frame(PathBuf::new())?;
        if position != ROOT_POSITION {
            for component in position.split('/') {
                if !frame.subdirs.by_ref().any(|name| name == component) {
                    exn::bail!(ErrorKind::IntegrityViolation(format!(
                        "{component:?} of position {position:?} no longer exists"
                    )));
                }
                let dir = frame.dir.join(component);
                stack.push(frame);
                frame = self.frame(dir)?;
            }
        }
        let relative = frame.dir.clone();
        stack.push(frame);
        if self.detect(&relative).is_none() {
            exn::bail!(ErrorKind::IntegrityViolation(format!("{position:?} is no longer a resource root")));
        }
        self.stack = stack;
        self.started = true;
        self.position = position.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(paths: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for path in paths {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "{}").unwrap();
        }
        dir
    }

    fn cursor(root: &Path) -> Cursor {
        let ignored = [".git", ".svn"].into_iter().map(OsString::from).collect();
        Cursor::new(root.to_path_buf(), ignored, vec![ResourceKind::Cookbook, ResourceKind::Workflow])
    }

    fn drain(cursor: &mut Cursor) -> Vec<String> {
        let mut positions = Vec::new();
        while let Some((position, _)) = cursor.advance().unwrap() {
            positions.push(position);
        }
        positions
    }

    #[test]
    fn list_is_sorted_and_filtered() {
        let dir = tree(&["b/x", "a/x", ".git/config", "c"]);
        let ignored = [OsString::from(".git")].into_iter().collect();
        let entries = list(dir.path(), &ignored).unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.to_string_lossy().into_owned(), e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("a".to_string(), EntryKind::Directory),
                ("b".to_string(), EntryKind::Directory),
                ("c".to_string(), EntryKind::File)
            ]
        );
    }

    #[test]
    fn depth_first_in_name_order() {
        let dir = tree(&[
            "metadata.json",
            "cookbooks/b/metadata.rb",
            "cookbooks/a/metadata.json",
            "cookbooks/a/nested/metadata.json",
            "workflows/deploy/workflow.json",
            ".git/modules/metadata.json",
            "docs/README.md",
        ]);
        let mut cursor = cursor(dir.path());
        assert_eq!(cursor.position(), "");
        assert_eq!(
            drain(&mut cursor),
            vec![".", "cookbooks/a", "cookbooks/a/nested", "cookbooks/b", "workflows/deploy"]
        );
        assert_eq!(cursor.position(), "workflows/deploy");
        assert!(cursor.advance().unwrap().is_none());
    }

    #[test]
    fn seek_resumes_where_the_walk_was() {
        let dir = tree(&[
            "metadata.json",
            "a/metadata.json",
            "a/b/metadata.json",
            "a/c/workflow.json",
            "d/e/f/metadata.rb",
            "g/metadata.json",
        ]);
        let mut walk = cursor(dir.path());
        let all = drain(&mut walk);
        assert_eq!(all.len(), 6);
        for (i, position) in all.iter().enumerate() {
            let mut resumed = cursor(dir.path());
            resumed.seek(position).unwrap();
            assert_eq!(resumed.position(), position);
            assert_eq!(drain(&mut resumed), all[i + 1..].to_vec(), "resuming after {position}");
        }
    }

    #[test]
    fn seek_to_nothing_rewinds() {
        let dir = tree(&["a/metadata.json", "b/metadata.json"]);
        let mut cursor = cursor(dir.path());
        cursor.advance().unwrap();
        cursor.seek("").unwrap();
        assert_eq!(cursor.position(), "");
        assert_eq!(drain(&mut cursor), vec!["a", "b"]);
    }

    #[test]
    fn seek_to_vanished_position_fails() {
        let dir = tree(&["a/metadata.json", "b/c/metadata.json"]);
        let mut cursor = cursor(dir.path());
        std::fs::remove_dir_all(dir.path().join("b/c")).unwrap();
        let err = cursor.seek("b/c").unwrap_err();
        assert!(matches!(&*err, ErrorKind::IntegrityViolation(_)));
        assert_eq!(cursor.position(), "");

        std::fs::remove_file(dir.path().join("a/metadata.json")).unwrap();
        let err = cursor.seek("a").unwrap_err();
        assert!(matches!(&*err, ErrorKind::IntegrityViolation(_)));
    }

    #[test]
    fn seek_refuses_ignored_directories() {
        let dir = tree(&[".git/metadata.json"]);
        let mut cursor = cursor(dir.path());
        assert!(cursor.seek(".git").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = tree(&["real/metadata.json"]);
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let mut cursor = cursor(dir.path());
        assert_eq!(drain(&mut cursor), vec!["real"]);
    }
}

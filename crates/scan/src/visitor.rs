use crate::error::{ErrorKind, Result};
use crate::resource::Resource;
use exn::ResultExt;
use std::path::{Path, PathBuf};

/// A file's bytes, read from disk the first time anyone asks for them.
pub struct Content {
    path: PathBuf,
    size: Option<u64>,
    bytes: Option<Vec<u8>>,
    reads: usize,
}

impl Content {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), size: None, bytes: None, reads: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file, without reading it.
    pub fn size(&mut self) -> Result<u64> {
        if let Some(bytes) = &self.bytes {
            return Ok(bytes.len() as u64);
        }
        if let Some(size) = self.size {
            return Ok(size);
        }
        let size = std::fs::metadata(&self.path).or_raise(|| ErrorKind::Io)?.len();
        self.size = Some(size);
        Ok(size)
    }

    pub fn bytes(&mut self) -> Result<&[u8]> {
        if self.bytes.is_none() {
            self.reads += 1;
            self.bytes = Some(std::fs::read(&self.path).or_raise(|| ErrorKind::Io)?);
        }
        Ok(self.bytes.as_deref().unwrap_or_default())
    }

    /// How many times the file was actually read.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

/// One visitor of a resource's inner pass.
///
/// Paths are relative to the resource root. Every entry beneath the root is
/// offered in depth-first order, between `begin` and `end`.
pub trait Scanner {
    fn begin(&mut self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    /// Returning `false` skips the directory's contents for this scanner.
    fn notice_dir(&mut self, _resource: &mut Resource, _path: &Path) -> Result<bool> {
        Ok(true)
    }

    fn notice(&mut self, resource: &mut Resource, path: &Path, content: &mut Content) -> Result<()>;

    fn end(&mut self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }
}

impl<S: Scanner + ?Sized> Scanner for Box<S> {
    fn begin(&mut self, resource: &mut Resource) -> Result<()> {
        (**self).begin(resource)
    }

    fn notice_dir(&mut self, resource: &mut Resource, path: &Path) -> Result<bool> {
        (**self).notice_dir(resource, path)
    }

    fn notice(&mut self, resource: &mut Resource, path: &Path, content: &mut Content) -> Result<()> {
        (**self).notice(resource, path, content)
    }

    fn end(&mut self, resource: &mut Resource) -> Result<()> {
        (**self).end(resource)
    }
}

struct Member {
    scanner: Box<dyn Scanner>,
    pruned: Option<PathBuf>,
}

impl Member {
    /// Whether `path` lies outside whatever this member pruned last.
    fn wants(&mut self, path: &Path) -> bool {
        if let Some(pruned) = &self.pruned {
            if path.starts_with(pruned) {
                return false;
            }
            self.pruned = None;
        }
        true
    }
}

/// Several scanners sharing one walk.
///
/// A directory is only entered if at least one member still wants it, and
/// each file is read at most once however many members look at it.
#[derive(Default)]
pub struct Union {
    members: Vec<Member>,
}

impl Union {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scanner: impl Scanner + 'static) -> Self {
        self.push(Box::new(scanner));
        self
    }

    pub fn push(&mut self, scanner: Box<dyn Scanner>) {
        self.members.push(Member { scanner, pruned: None });
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Scanner for Union {
    fn begin(&mut self, resource: &mut Resource) -> Result<()> {
        for member in &mut self.members {
            member.pruned = None;
            member.scanner.begin(resource)?;
        }
        Ok(())
    }

    fn notice_dir(&mut self, resource: &mut Resource, path: &Path) -> Result<bool> {
        let mut descend = false;
        for member in &mut self.members {
            if !member.wants(path) {
                continue;
            }
            if member.scanner.notice_dir(resource, path)? {
                descend = true;
            } else {
                member.pruned = Some(path.to_path_buf());
            }
        }
        Ok(descend)
    }

    fn notice(&mut self, resource: &mut Resource, path: &Path, content: &mut Content) -> Result<()> {
        for member in &mut self.members {
            if member.wants(path) {
                member.scanner.notice(resource, path, content)?;
            }
        }
        Ok(())
    }

    fn end(&mut self, resource: &mut Resource) -> Result<()> {
        for member in &mut self.members {
            member.scanner.end(resource)?;
        }
        Ok(())
    }
}

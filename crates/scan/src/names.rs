use crate::error::Result;
use crate::report::{Phase, Problem};
use crate::resource::Resource;
use crate::visitor::{Content, Scanner};
use std::path::Path;

/// Warns about file and directory names that are not printable ASCII.
///
/// Such names are legal, but tend to break whatever consumes the resource
/// downstream. The scan goes on either way.
#[derive(Debug, Default)]
pub struct NameScanner;

impl NameScanner {
    pub fn new() -> Self {
        Self
    }

    fn check(resource: &mut Resource, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let Some(name) = name.to_str() else {
            resource.problems.push(Problem::warning(
                Phase::Scan,
                "file name is not valid UTF-8",
                format!("{} in {}", path.display(), resource.position),
            ));
            return;
        };
        if let Some(reason) = suspicious(name) {
            resource.problems.push(Problem::warning(
                Phase::Scan,
                format!("file name contains {reason} characters"),
                format!("{} in {}", path.display(), resource.position),
            ));
        }
    }
}

fn suspicious(name: &str) -> Option<&'static str> {
    if name.chars().any(char::is_control) {
        Some("non-printing")
    } else if !name.is_ascii() {
        Some("non-ASCII")
    } else {
        None
    }
}

impl Scanner for NameScanner {
    fn notice_dir(&mut self, resource: &mut Resource, path: &Path) -> Result<bool> {
        Self::check(resource, path);
        Ok(true)
    }

    fn notice(&mut self, resource: &mut Resource, path: &Path, _content: &mut Content) -> Result<()> {
        Self::check(resource, path);
        Ok(())
    }
}

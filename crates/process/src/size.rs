use std::fs;
use std::path::{Path, PathBuf};

/// Total size in bytes of every regular file below `root`.
///
/// Walks with an explicit stack rather than recursion. Symbolic links are
/// never followed, and anything that cannot be read (vanished mid-walk,
/// permission denied, ...) counts as zero bytes: the supervised process is
/// usually still writing to this directory while we measure it.
pub fn directory_size(root: impl AsRef<Path>) -> u64 {
    let root = root.as_ref();
    let Ok(metadata) = fs::symlink_metadata(root) else {
        return 0;
    };
    if metadata.is_file() {
        return metadata.len();
    }
    if !metadata.is_dir() {
        return 0;
    }
    let mut total: u64 = 0;
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            // DirEntry::metadata() does not traverse symlinks on Unix.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                stack.push(entry.path());
            } else if metadata.is_file() {
                total = total.saturating_add(metadata.len());
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(directory_size(temp_dir.path().join("nope")), 0);
    }

    #[test]
    fn counts_nested_files_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.txt"), [0u8; 10]).unwrap();
        fs::write(root.join("a/one.txt"), [0u8; 100]).unwrap();
        fs::write(root.join("a/b/c/deep.txt"), [0u8; 1000]).unwrap();
        assert_eq!(directory_size(root), 1110);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("big.bin"), [0u8; 4096]).unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();
        fs::write(temp_dir.path().join("small.bin"), [0u8; 8]).unwrap();
        assert_eq!(directory_size(temp_dir.path()), 8);
    }
}

use crate::Compression;
use std::path::Path;

const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

impl Compression {
    /// Detect compression from a file name's extension.
    ///
    /// Understands single-format extensions (`.gz`) as well as the tarball
    /// shorthands (`.tgz`, `.tbz2`, `.tbz`, `.txz`, `.tzst`). Anything else,
    /// including a plain `.tar`, is [`Compression::None`].
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "bz2" | "tbz2" | "tbz" => Compression::Bzip2,
                "gz" | "tgz" => Compression::Gzip,
                #[cfg(feature = "xz")]
                "xz" | "txz" => Compression::Xz,
                #[cfg(feature = "zstd")]
                "zst" | "tzst" => Compression::Zstd,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Detect compression format from magic bytes.
    ///
    /// Returns `None` if no magic bytes match or if the input is too short to
    /// detect any format; uncompressed data has no magic bytes of its own.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Some(Compression::Bzip2);
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Some(Compression::Gzip);
        }
        #[cfg(feature = "xz")]
        if bytes.starts_with(&XZ_MAGIC) {
            return Some(Compression::Xz);
        }
        #[cfg(feature = "zstd")]
        if bytes.starts_with(&ZSTD_MAGIC) {
            return Some(Compression::Zstd);
        }
        None
    }
}

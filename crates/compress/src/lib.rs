//! Decompression filters for downloaded archives.
//!
//! This crate wraps several compression libraries behind a unified
//! [`Compression`] enum, providing:
//!
//! - **Format detection** from file names ([`Compression::from_path`]), which
//!   understands tarball shorthands such as `.tgz`, or from magic bytes
//!   ([`Compression::from_magic_bytes`]) when a URL carries no usable extension
//! - **Streaming** filters via wrapped readers/writers ([`Compression::wrap_reader`],
//!   [`Compression::wrap_writer`])
//! - **Bounded unpacking** of tar streams ([`unpack`]) that refuses entries
//!   escaping the destination and stops once a byte limit or deadline is
//!   exceeded
//!
//! Bzip2 and Gzip are always available. XZ and Zstd are behind feature flags.

mod construct;
pub mod error;
mod ops;
mod unpack;
mod util;

pub use crate::unpack::{Limits, Unpacked, unpack};

/// A supported compression format.
///
/// Variants gated behind feature flags (`xz`, `zstd`) are only available when
/// the corresponding feature is enabled. Defaults to [`None`](Self::None)
/// (uncompressed, a plain `.tar`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2, .tbz2, .tbz)
    Bzip2,
    /// Gzip compression (.gz, .tgz)
    Gzip,
    /// XZ/LZMA compression (.xz, .txz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst, .tzst)
    #[cfg(feature = "zstd")]
    Zstd,
}

//! Streaming Filters

use crate::Compression;
use crate::error::Result;
#[cfg(feature = "zstd")]
use crate::error::ErrorKind;
use bzip2::{Compression as BzCompression, read::BzDecoder, write::BzEncoder};
#[cfg(feature = "zstd")]
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

// Writers are only used to produce archives locally (fixtures, re-packing),
// so favour speed over ratio.
const BZIP2_LEVEL: BzCompression = BzCompression::fast();
const GZIP_LEVEL: GzCompression = GzCompression::fast();
#[cfg(feature = "xz")]
const XZ_LEVEL: u32 = 1;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 3;

impl Compression {
    /// Wrap a reader with the appropriate decompression layer.
    ///
    /// Returns a boxed reader that automatically decompresses data.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::{Read, Write};
    /// use trawl_compress::Compression;
    ///
    /// let mut compressed = Vec::new();
    /// {
    ///     let mut writer = Compression::Gzip.wrap_writer(&mut compressed).unwrap();
    ///     writer.write_all(b"Hello, world!").unwrap();
    /// }
    /// let mut reader = Compression::Gzip.wrap_reader(compressed.as_slice()).unwrap();
    /// let mut decompressed = Vec::new();
    /// reader.read_to_end(&mut decompressed).unwrap();
    /// assert_eq!(decompressed, b"Hello, world!");
    /// ```
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
        })
    }

    /// Wrap a writer with the appropriate compression layer.
    ///
    /// Returns a boxed writer that automatically compresses data; the stream
    /// is finished when the writer is dropped.
    pub fn wrap_writer<'a, W: Write + 'a>(&self, writer: W) -> Result<Box<dyn Write + 'a>> {
        Ok(match self {
            Compression::None => Box::new(writer),
            Compression::Bzip2 => Box::new(BzEncoder::new(writer, BZIP2_LEVEL)),
            Compression::Gzip => Box::new(GzEncoder::new(writer, GZIP_LEVEL)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzEncoder::new(writer, XZ_LEVEL)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => {
                Box::new(ZstdEncoder::new(writer, ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?.auto_finish())
            },
        })
    }
}

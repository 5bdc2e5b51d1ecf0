use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Compression {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Compression {
    /// Returns the short name (for logging and displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }

    /// Verify that `bytes` start with the expected magic bytes for this format.
    ///
    /// Useful for cross-checking a format detected from a file extension against
    /// actual file contents: a server may well answer a `.tar.gz` URL with an
    /// HTML error page.
    #[must_use]
    pub fn check_magic_bytes(&self, bytes: &[u8]) -> bool {
        match Self::from_magic_bytes(bytes) {
            Some(f) => *self == f,
            None => matches!(self, Compression::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None, "none")]
    #[case(Compression::Bzip2, "bzip2")]
    #[case(Compression::Gzip, "gzip")]
    #[cfg_attr(feature = "xz", case(Compression::Xz, "xz"))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd, "zstd"))]
    fn test_display(#[case] format: Compression, #[case] expected: &str) {
        assert_eq!(format.to_string(), expected);
    }

    #[rstest]
    #[case(Compression::Gzip, &[0x1F, 0x8B, 0x08], true)]
    #[case(Compression::Gzip, b"<html>", false)]
    #[case(Compression::None, b"<html>", true)]
    #[case(Compression::None, &[0x1F, 0x8B, 0x08], false)]
    #[case(Compression::Bzip2, &[0x42, 0x5A, 0x68], true)]
    fn test_check_magic_bytes(#[case] format: Compression, #[case] bytes: &[u8], #[case] expected: bool) {
        assert_eq!(format.check_magic_bytes(bytes), expected);
    }
}

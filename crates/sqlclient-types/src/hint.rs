//! File-format hints for binary column values.

/// Well-known file formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryHint {
    /// PNG image.
    Png,
    /// JPEG image.
    Jpeg,
    /// GIF image.
    Gif,
    /// Windows bitmap.
    Bmp,
    /// TIFF image, either byte order.
    Tiff,
    /// PDF document.
    Pdf,
}

const SIGNATURES: &[(&[u8], BinaryHint)] = &[
    (b"\x89PNG\r\n\x1a\n", BinaryHint::Png),
    (b"\xFF\xD8\xFF", BinaryHint::Jpeg),
    (b"GIF87a", BinaryHint::Gif),
    (b"GIF89a", BinaryHint::Gif),
    (b"BM", BinaryHint::Bmp),
    (b"II*\x00", BinaryHint::Tiff),
    (b"MM\x00*", BinaryHint::Tiff),
    (b"%PDF-", BinaryHint::Pdf),
];

impl BinaryHint {
    /// Match `data` against the known signatures.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        SIGNATURES
            .iter()
            .find(|(magic, _)| data.starts_with(magic))
            .map(|&(_, hint)| hint)
    }

    /// MIME type of the format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Pdf => "application/pdf",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_signatures() {
        assert_eq!(BinaryHint::detect(b"\xFF\xD8\xFF\xE0rest"), Some(BinaryHint::Jpeg));
        assert_eq!(BinaryHint::detect(b"GIF89a..."), Some(BinaryHint::Gif));
        assert_eq!(BinaryHint::detect(b"BM\x00\x00"), Some(BinaryHint::Bmp));
        assert_eq!(BinaryHint::detect(b"MM\x00*\x00"), Some(BinaryHint::Tiff));
        assert_eq!(BinaryHint::detect(b"%PDF-1.7"), Some(BinaryHint::Pdf));
        assert_eq!(BinaryHint::Pdf.mime_type(), "application/pdf");
    }

    #[test]
    fn test_unknown_or_short() {
        assert_eq!(BinaryHint::detect(b""), None);
        assert_eq!(BinaryHint::detect(b"\x89PN"), None);
        assert_eq!(BinaryHint::detect(b"hello"), None);
    }
}

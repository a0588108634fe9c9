//! Binary signature type detection.
//!
//! Content types are always derived from the leading bytes of a blob, never
//! from caller-supplied labels or filenames.

use thiserror::Error;

/// Failure to recognize a buffer's file signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SniffError {
    #[error("no known file signature matched")]
    Unknown,
}

/// Concrete file type recognized from a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub extension: String,
    pub mime: String,
}

/// Classify a buffer by its file signature.
pub fn classify(bytes: &[u8]) -> Result<FileType, SniffError> {
    let kind = infer::get(bytes).ok_or(SniffError::Unknown)?;

    Ok(FileType {
        extension: kind.extension().to_string(),
        mime: kind.mime_type().to_string(),
    })
}

/// Whether a MIME type belongs to the accepted media families.
pub fn accept(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("video/")
}

/// Classify a buffer and require an accepted media type.
pub fn classify_media(bytes: &[u8]) -> Option<FileType> {
    classify(bytes).ok().filter(|kind| accept(&kind.mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const PDF_HEADER: &[u8] = b"%PDF-1.7\n";

    #[test]
    fn test_classify_png() {
        let kind = classify(PNG_HEADER).unwrap();
        assert_eq!(kind.mime, "image/png");
        assert_eq!(kind.extension, "png");
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(b"just some text"), Err(SniffError::Unknown));
        assert_eq!(classify(&[]), Err(SniffError::Unknown));
    }

    #[test]
    fn test_accept() {
        assert!(accept("image/png"));
        assert!(accept("video/mp4"));
        assert!(!accept("application/pdf"));
        assert!(!accept("text/plain"));
        assert!(!accept("imagex/png"));
    }

    #[test]
    fn test_classify_media_rejects_documents() {
        assert!(classify(PDF_HEADER).is_ok());
        assert!(classify_media(PDF_HEADER).is_none());
        assert!(classify_media(PNG_HEADER).is_some());
    }
}

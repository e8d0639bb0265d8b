// Error types shared by the codecs, builders and the work-queue pipeline

use thiserror::Error;

pub type Result<T, E = CursorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CursorError {
    /// Malformed or truncated container content.
    #[error("invalid cursor data: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// An operation the selected format cannot perform, or an unknown format tag.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A builder was driven into an invalid state (e.g. missing animation frames).
    #[error("invalid builder state: {0}")]
    State(String),

    /// A failure raised on a pipeline worker, re-raised when its queue is awaited.
    #[error("deferred failure on queue {queue}: {source}")]
    Deferred {
        queue: String,
        #[source]
        source: Box<CursorError>,
    },
}

impl CursorError {
    pub fn format(msg: impl Into<String>) -> Self {
        CursorError::Format(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CursorError::State(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        CursorError::Unsupported(msg.into())
    }

    /// True for errors that only mean "this file is not valid content of the
    /// expected format" and that a caller may skip.
    pub fn is_format_error(&self) -> bool {
        match self {
            CursorError::Format(_) | CursorError::Image(_) | CursorError::Xml(_) => true,
            CursorError::Deferred { source, .. } => source.is_format_error(),
            _ => false,
        }
    }

    /// The error as originally raised, looking through deferred wrappers.
    pub fn root(&self) -> &CursorError {
        match self {
            CursorError::Deferred { source, .. } => source.root(),
            other => other,
        }
    }

    /// Maps an unexpected EOF to a data-format error; other I/O errors stay I/O errors.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CursorError::Format(format!("truncated {what}"))
        } else {
            CursorError::Io(err)
        }
    }
}

/// Decodes UTF-8 text content; invalid bytes are a data-format error.
pub(crate) fn utf8_text(bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        CursorError::Format(format!(
            "{what} is not valid UTF-8 (byte offset {})",
            e.utf8_error().valid_up_to()
        ))
    })
}

macro_rules! format_err {
    ($($arg:tt)+) => {
        return Err($crate::error::CursorError::Format(format!($($arg)+)))
    };
}

pub(crate) use format_err;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_keeps_root() {
        let err = CursorError::Deferred {
            queue: "frames:/tmp/a".to_string(),
            source: Box::new(CursorError::state("frame 3 missing")),
        };
        assert!(matches!(err.root(), CursorError::State(_)));
        assert!(!err.is_format_error());
        assert!(err.to_string().contains("frame 3 missing"));
    }

    #[test]
    fn test_eof_becomes_format_error() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(CursorError::from_read(eof, "header").is_format_error());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            CursorError::from_read(denied, "header"),
            CursorError::Io(_)
        ));
    }

    #[test]
    fn test_invalid_utf8_is_format_error() {
        assert_eq!(utf8_text(b"caf\xc3\xa9".to_vec(), "name").unwrap(), "caf\u{e9}");
        let err = utf8_text(b"caf\xe9!".to_vec(), "name").unwrap_err();
        assert!(err.is_format_error());
        assert!(err.to_string().contains("byte offset 3"), "{err}");
    }
}

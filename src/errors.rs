use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the contamination monitoring application.
///
/// # Why structured errors
///
/// Each variant captures context specific to its error domain (capture source,
/// classifier, export, recording, filesystem), providing detailed diagnostic
/// information without requiring callers to parse error strings. The thiserror
/// crate generates Display implementations automatically from format strings.
///
/// The containment policy follows the variants: `Classifier` is fatal to a
/// single frame only, `Source`/`Export`/`Recording` are reported and leave the
/// running session alive. Nothing here terminates the process.
#[derive(Error, Debug)]
pub enum ContamSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source error: {operation} failed (source: {name})")]
    Source {
        name: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Classifier error: {operation} failed")]
    Classifier {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Export error: {reason} ({path:?})")]
    Export { path: PathBuf, reason: String },

    #[error("Recording error: {operation} failed")]
    Recording {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, ContamSegError>;

impl ContamSegError {
    /// フレーム単位で握りつぶせるエラーかどうか
    ///
    /// Classifier エラーは該当フレームの解析出力をスキップするだけで、
    /// 再生中のセッションは継続する（skip-and-continue 方針）。
    pub const fn is_frame_local(&self) -> bool {
        matches!(self, Self::Classifier { .. })
    }
}

/// Convert anyhow errors to configuration errors.
///
/// # Why this conversion exists
///
/// Some dependencies return anyhow::Error which lacks structured error
/// information. Rather than propagating the generic error type throughout the
/// codebase, we convert to our domain-specific error type at boundaries.
impl From<anyhow::Error> for ContamSegError {
    fn from(err: anyhow::Error) -> Self {
        ContamSegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// # Why default values for context
///
/// Some I/O errors occur without specific path/operation context. Rather than
/// requiring all callsites to wrap errors manually, this conversion provides
/// a fallback. Code that has context should construct ContamSegError::FileSystem
/// directly with the specific path and operation.
impl From<std::io::Error> for ContamSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to source errors.
///
/// Decode/encode failures surface while reading frames from still-image
/// sources, so they belong to the capture-source domain.
impl From<image::ImageError> for ContamSegError {
    fn from(err: image::ImageError) -> Self {
        Self::Source {
            name: "unknown".to_string(),
            operation: "image decode".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to classifier errors.
impl From<ort::Error> for ContamSegError {
    fn from(err: ort::Error) -> Self {
        Self::Classifier {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ndarray shape errors to classifier errors.
///
/// # Why classifier error category
///
/// Shape errors occur during tensor operations which are part of model
/// inference, so they're categorized as classifier errors rather than a
/// separate tensor error type. This keeps the error hierarchy flat and
/// focused on user-facing error domains.
impl From<ndarray::ShapeError> for ContamSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Classifier {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_local_classification() {
        let classifier_err = ContamSegError::Classifier {
            operation: "test".to_string(),
            source: Box::new(std::io::Error::other("boom")),
        };
        assert!(classifier_err.is_frame_local());

        let export_err = ContamSegError::Export {
            path: PathBuf::from("/tmp/out"),
            reason: "no samples".to_string(),
        };
        assert!(!export_err.is_frame_local());
    }
}

//! Error taxonomy for layout, styling and export.
//!
//! Every variant is fatal: an export that hits one of these aborts before any
//! byte reaches the caller's output. Conditional expressions are the only
//! lenient path and never produce an error (see [`crate::condition`]).

use rust_xlsxwriter::XlsxError;

/// All errors raised by the gridkit engine.
#[derive(Debug, thiserror::Error)]
pub enum GridkitError {
    /// Malformed cell or range reference.
    #[error("{}", derive_position_error_text(.literal, .section))]
    PositionFormat {
        /// Offending reference literal, verbatim.
        literal: String,
        /// Section label the literal belongs to, when known.
        section: Option<String>,
    },

    /// Data collection is not an ordered sequence of renderable records.
    #[error("Unsupported data shape: {0}")]
    UnsupportedDataShape(String),

    /// Template-level validation failure.
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Failure delegated to the grid sink / document encoder.
    #[error("Grid sink error: {0}")]
    GridSink(String),

    /// YAML template could not be parsed.
    #[error("Template parse error: {0}")]
    Template(#[from] serde_yaml::Error),

    /// I/O failure while writing the serialized document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GridkitError>;

impl GridkitError {
    /// Build a position-format error for `literal` with no section context.
    pub fn position(literal: impl Into<String>) -> Self {
        Self::PositionFormat {
            literal: literal.into(),
            section: None,
        }
    }

    /// Attach a section label to a position-format error; other variants pass through.
    pub fn in_section(self, label: &str) -> Self {
        match self {
            Self::PositionFormat {
                literal,
                section: None,
            } => Self::PositionFormat {
                literal,
                section: Some(label.to_string()),
            },
            other => other,
        }
    }
}

impl From<XlsxError> for GridkitError {
    fn from(err: XlsxError) -> Self {
        Self::GridSink(format!("xlsx write error: {err}"))
    }
}

fn derive_position_error_text(literal: &str, section: &Option<String>) -> String {
    match section {
        Some(label) => format!("Invalid cell reference {literal:?} in section {label:?}"),
        None => format!("Invalid cell reference {literal:?}"),
    }
}

//! # Error Types
//!
//! Every failure in the reader is scoped to the component that triggered it and is
//! turned into local state there (an inline error, a disabled control, an apology
//! message, a placeholder). None of these errors is fatal to the application.
//!
//! ## Error Types
//! - `NotationParseError` - malformed score source, carries line/column where known
//! - `AudioInitError` - synthesis backend unavailable, the widget falls back to visual-only
//! - `StreamTransportError` - assistant connection failed or was interrupted
//! - `ImageGenerationError` - illustration request failed
//! - `ConfigError`, `CurriculumError`, `ReaderError` - startup and navigation errors
//!
//! ## Usage
//! ```rust
//! use theory_reader::{compile, NotationParseError, RenderOptions};
//!
//! match compile("X:1\nK:C\nC D E F", &RenderOptions::full()) {
//!     Ok(score) => println!("{} drawable elements", score.visual.element_count()),
//!     Err(NotationParseError::Syntax { line, column, message }) => {
//!         eprintln!("Syntax error at {}:{}: {}", line, column, message);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotationParseError {
    /// Unexpected character or token in the music body.
    ///
    /// # Example
    /// ```
    /// # use theory_reader::NotationParseError;
    /// let err = NotationParseError::Syntax {
    ///     line: 3,
    ///     column: 5,
    ///     message: "Unexpected character '&'".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "Parse error at line 3, column 5: Unexpected character '&'");
    /// ```
    #[error("Parse error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A recognised header field carries a value that cannot be parsed.
    #[error("Malformed header field {field}: at line {line}: {message}")]
    MalformedHeader {
        line: usize,
        field: char,
        message: String,
    },

    /// A header line uses a field letter outside the notation standard.
    #[error("Unknown header field '{field}:' at line {line}")]
    UnknownField { line: usize, field: char },

    /// Brackets, slurs, quotes or decorations that never close (or close without opening).
    #[error("Unbalanced voice {voice} at line {line}, column {column}: {message}")]
    UnbalancedVoice {
        voice: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Score source is empty")]
    Empty,
}

impl NotationParseError {
    /// Source line of the error, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            NotationParseError::Syntax { line, .. }
            | NotationParseError::MalformedHeader { line, .. }
            | NotationParseError::UnknownField { line, .. }
            | NotationParseError::UnbalancedVoice { line, .. } => Some(*line),
            NotationParseError::Empty => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioInitError {
    #[error("Audio synthesis is not supported: {0}")]
    Unsupported(String),

    #[error("Failed to prepare audio: {0}")]
    Prepare(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamTransportError {
    #[error("No API key configured for the assistant")]
    MissingApiKey,

    #[error("Could not connect to the assistant: {0}")]
    Connect(String),

    #[error("Assistant stream interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageGenerationError {
    #[error("No API key configured for image generation")]
    MissingApiKey,

    #[error("Image request failed: {0}")]
    Request(String),

    #[error("Response did not contain an image")]
    NoImage,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Figment(#[from] figment::Error),
}

#[derive(Error, Debug)]
pub enum CurriculumError {
    #[error("Invalid curriculum data: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate chapter id: {0}")]
    DuplicateChapter(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReaderError {
    #[error("Unknown chapter: {0}")]
    UnknownChapter(String),

    #[error("The curriculum has no chapters")]
    EmptyCurriculum,
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No file types selected")]
    NoFileTypes,

    #[error("Invalid pattern variable '{0}'")]
    InvalidVariable(String),

    #[error("Pattern config error on line {line}: {message}")]
    PatternConfig { line: usize, message: String },

    #[error("Chapter {chapter} failed: {error}")]
    ChapterFailed { chapter: u32, error: ChapterError },

    #[error("Operation cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    pub fn pattern_config(line: usize, message: impl Into<String>) -> Self {
        Self::PatternConfig {
            line,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Coarse classification surfaced to callers next to the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Aborted,
            Self::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Http(e) if e.is_connect() || e.is_request() => ErrorKind::Network,
            Self::ChapterFailed { error, .. } => error.kind(),
            _ => ErrorKind::Unknown,
        }
    }
}

/// Why a single chapter attempt produced no images.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum ChapterError {
    #[error("request timed out")]
    Timeout,

    #[error("page not found (404)")]
    NotFound,

    #[error("access forbidden (403)")]
    Forbidden,

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("page body was empty")]
    EmptyBody,

    #[error("no rule produced a URL for this chapter")]
    NoChapterUrl,

    #[error("no images could be confirmed")]
    NoImages,
}

impl ChapterError {
    /// Classifies a non-OK page fetch. Returns `None` for usable responses.
    pub fn from_page_status(status: u16, body: &str) -> Option<Self> {
        match status {
            404 => Some(Self::NotFound),
            403 => Some(Self::Forbidden),
            408 | 504 | 522 | 524 => Some(Self::Timeout),
            s if s >= 400 => Some(Self::HttpStatus(s)),
            _ if body.trim().is_empty() => Some(Self::EmptyBody),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Forbidden => ErrorKind::Cors,
            Self::HttpStatus(s) if *s >= 500 => ErrorKind::Network,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Network,
    Cors,
    Aborted,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Cors => write!(f, "cors"),
            ErrorKind::Aborted => write!(f, "aborted"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

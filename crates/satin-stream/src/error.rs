use thiserror::Error;

/// Failures of the HTTP fetch collaborator.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for URL: {url}")]
    Status { status: u16, url: String },

    #[error("request timed out: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        let url = error
            .url()
            .map(|u| u.as_str().to_owned())
            .unwrap_or_default();
        if error.is_timeout() {
            Self::Timeout(url)
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                url,
            }
        } else {
            Self::Http(error.to_string())
        }
    }
}

/// Pipeline errors.
///
/// `Fetch` is fatal: the scheduler stores it and the cursor degrades to a
/// clean end of stream. The seek variants are returned synchronously with
/// pipeline state unchanged.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error("chunk fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("seek target outside the buffered window")]
    SeekOutsideWindow,

    #[error("seek not supported on this stream")]
    SeekUnsupported,

    #[error("pipeline closed")]
    Closed,
}

pub type StreamResult<T> = Result<T, StreamError>;

//! Error types surfaced by the request tracker.

/// Errors that can occur when submitting work to the tracker.
#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    /// The submitted id is already tracked. The original request is
    /// unaffected; the caller must pick a fresh id.
    #[error("request {0} is already tracked")]
    DuplicateRequest(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

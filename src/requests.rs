//! Admission records and drained batches.

use std::collections::HashSet;
use std::time::Instant;

use uuid::Uuid;

/// A newly admitted request, handed to the processing loop exactly once.
#[derive(Debug, Clone)]
pub struct NewRequest<P> {
    /// Caller-chosen unique identifier
    pub request_id: String,
    /// Opaque submission payload, passed through untouched
    pub params: P,
    /// When the request entered the tracker
    pub submitted_at: Instant,
}

/// One consistent batch of lifecycle updates taken by the processing loop.
///
/// Admissions appear in submission order. A request aborted before its
/// admission was drained shows up in neither field.
#[derive(Debug)]
pub struct TrackerOutput<P> {
    /// Requests admitted since the previous drain, oldest first
    pub new_requests: Vec<NewRequest<P>>,
    /// Ids of requests that finished since the previous drain
    pub finished_ids: HashSet<String>,
}

impl<P> TrackerOutput<P> {
    /// True when the drain found nothing to hand over.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_requests.is_empty() && self.finished_ids.is_empty()
    }
}

/// Mint a request id for callers that do not bring their own.
#[must_use]
pub fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_id_is_prefixed_and_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_tracker_output_is_empty() {
        let empty: TrackerOutput<()> = TrackerOutput {
            new_requests: Vec::new(),
            finished_ids: HashSet::new(),
        };
        assert!(empty.is_empty());

        let nonempty: TrackerOutput<()> = TrackerOutput {
            new_requests: vec![NewRequest {
                request_id: "req-1".to_string(),
                params: (),
                submitted_at: Instant::now(),
            }],
            finished_ids: HashSet::new(),
        };
        assert!(!nonempty.is_empty());
    }
}

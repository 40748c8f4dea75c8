//! Request lifecycle tracking between async producers and the engine loop.
//!
//! The tracker is the single bridge between the submission side (any number
//! of tasks adding, aborting and observing requests) and the processing side
//! (one engine loop draining a consistent batch of updates per iteration).
//! All state sits behind one mutex; producers signal the loop through a
//! [`Notify`] so an idle engine parks instead of spinning.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::requests::{NewRequest, TrackerOutput};
use crate::streaming::{channel, OutputStream, StreamEnd, StreamSender};

struct TrackerState<P, O> {
    /// Write halves of every tracked stream. An id stays here from admission
    /// until its finished notice is drained, so duplicate submissions are
    /// rejected for that whole window.
    active: AHashMap<String, StreamSender<O>>,
    /// Admissions not yet handed to the processing loop, in submission order
    pending_new: Vec<NewRequest<P>>,
    /// Finished notices not yet handed to the processing loop
    pending_finished: HashSet<String>,
}

impl<P, O> TrackerState<P, O> {
    fn new() -> Self {
        Self {
            active: AHashMap::new(),
            pending_new: Vec::new(),
            pending_finished: HashSet::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending_new.is_empty() || !self.pending_finished.is_empty()
    }
}

struct TrackerInner<P, O> {
    state: Mutex<TrackerState<P, O>>,
    notify: Notify,
    config: TrackerConfig,
}

/// Tracks the lifecycle of every in-flight request.
///
/// Cheaply cloneable handle: construct one tracker and hand clones to the
/// submission side and to the processing loop. `P` is the opaque submission
/// payload carried to the loop; `O` the incremental output type flowing back
/// through each request's [`OutputStream`].
///
/// The drain side assumes a single consumer. Producers may be on any task or
/// thread.
pub struct RequestTracker<P, O> {
    inner: Arc<TrackerInner<P, O>>,
}

impl<P, O> Clone for RequestTracker<P, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, O> Default for RequestTracker<P, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, O> RequestTracker<P, O> {
    /// Create a tracker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker with explicit configuration.
    #[must_use]
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState::new()),
                notify: Notify::new(),
                config,
            }),
        }
    }

    /// Admit a request and return the stream its results will arrive on.
    ///
    /// The admission becomes visible to the processing loop at its next
    /// drain. Fails with [`TrackerError::DuplicateRequest`] if the id is
    /// still tracked; the already-tracked request is left untouched and the
    /// loop is not signalled.
    pub fn add_request(&self, request_id: String, params: P) -> Result<OutputStream<O>> {
        let mut state = self.inner.state.lock();
        if state.active.contains_key(&request_id) {
            return Err(TrackerError::DuplicateRequest(request_id));
        }
        let (sender, stream) = channel(request_id.clone());
        state.active.insert(request_id.clone(), sender);
        state.pending_new.push(NewRequest {
            request_id: request_id.clone(),
            params,
            submitted_at: Instant::now(),
        });
        drop(state);

        self.inner.notify.notify_one();
        if self.inner.config.log_requests {
            info!(request_id = %request_id, "Added request");
        }
        Ok(stream)
    }

    /// Cancel a request.
    ///
    /// The stream terminates immediately with [`StreamEnd::Cancelled`] and
    /// the processing loop picks up the finished notice at its next drain.
    /// Unknown or already finished ids are ignored.
    pub fn abort_request(&self, request_id: &str) {
        if self.finish_request(request_id, StreamEnd::Cancelled) {
            if self.inner.config.log_requests {
                info!(request_id = %request_id, "Aborted request");
            }
        } else {
            debug!(request_id = %request_id, "Ignoring abort for unknown or finished request");
        }
    }

    /// Tear a request down after an engine fault.
    ///
    /// Behaves like [`abort_request`](Self::abort_request) except the stream
    /// terminates with [`StreamEnd::Error`] carrying `reason`.
    pub fn fail_request(&self, request_id: &str, reason: &str) {
        if self.finish_request(request_id, StreamEnd::Error(reason.to_string())) {
            warn!(request_id = %request_id, reason = %reason, "Failed request");
        } else {
            debug!(request_id = %request_id, "Ignoring failure for unknown or finished request");
        }
    }

    /// Tear down every live request at once, ending each stream with
    /// [`StreamEnd::Error`] carrying `reason`. Used when the engine loop
    /// dies and nothing will ever process the work.
    pub fn fail_all_requests(&self, reason: &str) {
        let mut state = self.inner.state.lock();
        let live: Vec<String> = state
            .active
            .iter()
            .filter(|(_, sender)| !sender.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in &live {
            Self::finish_locked(&mut state, request_id, StreamEnd::Error(reason.to_string()));
        }
        drop(state);

        if !live.is_empty() {
            self.inner.notify.notify_one();
            warn!(failed = live.len(), reason = %reason, "Failed all live requests");
        }
    }

    /// Deliver one incremental output for a request, terminating the stream
    /// with [`StreamEnd::Completed`] when `is_final` is set.
    ///
    /// Outputs for unknown or already finished requests are dropped; the
    /// engine loop is allowed to race an abort and lose.
    pub fn process_output(&self, request_id: &str, output: O, is_final: bool) {
        let mut state = self.inner.state.lock();
        let accepted = match state.active.get(request_id) {
            Some(sender) => sender.append(output),
            None => false,
        };
        if !accepted {
            drop(state);
            debug!(request_id = %request_id, "Dropping output for unknown or finished request");
            return;
        }
        if !is_final {
            return;
        }
        Self::finish_locked(&mut state, request_id, StreamEnd::Completed);
        drop(state);

        self.inner.notify.notify_one();
        if self.inner.config.log_requests {
            info!(request_id = %request_id, "Finished request");
        }
    }

    /// Take everything that happened since the previous drain: admissions in
    /// submission order plus the set of newly finished ids.
    ///
    /// Finished ids leave the tracker here, which is also the moment their
    /// ids become reusable for new submissions.
    pub fn drain_pending(&self) -> TrackerOutput<P> {
        let mut state = self.inner.state.lock();
        // One critical section: a producer either lands in this snapshot or
        // signals again after it.
        let new_requests = std::mem::take(&mut state.pending_new);
        let finished_ids = std::mem::take(&mut state.pending_finished);
        for request_id in &finished_ids {
            state.active.remove(request_id);
        }
        drop(state);

        if !new_requests.is_empty() || !finished_ids.is_empty() {
            debug!(
                new_requests = new_requests.len(),
                finished = finished_ids.len(),
                "Drained pending request updates"
            );
        }
        TrackerOutput {
            new_requests,
            finished_ids,
        }
    }

    /// Park until at least one admission or finished notice is pending.
    ///
    /// Level-triggered: returns immediately when work is already pending.
    /// May wake spuriously; callers drain and loop. Single consumer only.
    pub async fn wait_for_work(&self) {
        loop {
            // notify_one with no parked waiter stores a permit, so a signal
            // landing between the check and the await still completes the
            // await instead of being lost.
            let notified = self.inner.notify.notified();
            if self.has_pending() {
                return;
            }
            notified.await;
        }
    }

    /// True when an undrained admission or finished notice exists.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().has_pending()
    }

    /// True while `request_id` is tracked, from admission until its finished
    /// notice is drained.
    #[must_use]
    pub fn is_tracked(&self, request_id: &str) -> bool {
        self.inner.state.lock().active.contains_key(request_id)
    }

    /// Number of currently tracked requests.
    #[must_use]
    pub fn num_tracked(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    fn finish_request(&self, request_id: &str, end: StreamEnd) -> bool {
        let mut state = self.inner.state.lock();
        let finished = Self::finish_locked(&mut state, request_id, end);
        drop(state);

        if finished {
            self.inner.notify.notify_one();
        }
        finished
    }

    /// Terminate a tracked stream and queue the finished notice. Also pulls
    /// any undrained admission so a drain never reports the id as both new
    /// and finished. Returns false if the id is unknown or already finished.
    fn finish_locked(state: &mut TrackerState<P, O>, request_id: &str, end: StreamEnd) -> bool {
        let newly_finished = match state.active.get(request_id) {
            Some(sender) => sender.finish(end),
            None => false,
        };
        if newly_finished {
            state.pending_new.retain(|req| req.request_id != request_id);
            state.pending_finished.insert(request_id.to_string());
        }
        newly_finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn tracker() -> RequestTracker<u32, String> {
        RequestTracker::with_config(TrackerConfig { log_requests: false })
    }

    #[test]
    fn test_new_tracker_uses_default_config_and_starts_idle() {
        let tracker: RequestTracker<u32, String> = RequestTracker::new();
        assert!(!tracker.has_pending());
        assert_eq!(tracker.num_tracked(), 0);

        // Runs the admission path through the default (logging) config.
        let _stream = tracker.add_request("req-1".to_string(), 1).unwrap();
        assert!(tracker.has_pending());

        let tracker: RequestTracker<u32, String> = RequestTracker::default();
        assert!(tracker.drain_pending().is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected_without_signal() {
        let tracker = tracker();
        let _stream = tracker.add_request("req-1".to_string(), 1).unwrap();
        tracker.drain_pending();

        let err = tracker.add_request("req-1".to_string(), 2).unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateRequest(id) if id == "req-1"));
        // The rejected submission must not look like pending work.
        assert!(!tracker.has_pending());
        assert!(tracker.is_tracked("req-1"));
    }

    #[test]
    fn test_id_reusable_after_finish_is_drained() {
        let tracker = tracker();
        let _stream = tracker.add_request("req-1".to_string(), 1).unwrap();
        tracker.abort_request("req-1");
        assert!(tracker.is_tracked("req-1"));

        tracker.drain_pending();
        assert!(!tracker.is_tracked("req-1"));
        assert!(tracker.add_request("req-1".to_string(), 2).is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_work_predates_wait() {
        let tracker = tracker();
        let _stream = tracker.add_request("req-1".to_string(), 1).unwrap();

        timeout(Duration::from_secs(1), tracker.wait_for_work())
            .await
            .expect("wait_for_work should not park while work is pending");
    }

    #[tokio::test]
    async fn test_stale_permit_does_not_report_phantom_work() {
        let tracker = tracker();
        let _stream = tracker.add_request("req-1".to_string(), 1).unwrap();
        tracker.wait_for_work().await;
        tracker.drain_pending();

        // A permit from the earlier submission may still be stored; the wait
        // loop must absorb it and park instead of reporting phantom work.
        let parked = timeout(Duration::from_millis(50), tracker.wait_for_work()).await;
        assert!(parked.is_err(), "wait_for_work woke without pending work");
    }
}

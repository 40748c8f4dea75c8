#![warn(clippy::cast_lossless)]
//! Request lifecycle tracking for engines that serve many concurrent
//! clients from one synchronous processing loop.
//!
//! Producers (HTTP handlers, background tasks) submit and abort requests
//! from any task; the engine loop calls [`RequestTracker::wait_for_work`]
//! and [`RequestTracker::drain_pending`] once per iteration to pick up a
//! consistent batch of admissions and finished notices. Results flow back
//! per request through an [`OutputStream`], which buffers until read and
//! terminates exactly once.
//!
//! The tracker is a cheap clone-and-share handle; create one and pass
//! clones to both sides.

pub mod config;
pub mod error;
pub mod requests;
pub mod streaming;
pub mod tracker;

// Re-export public API types
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use requests::{new_request_id, NewRequest, TrackerOutput};
pub use streaming::{OutputStream, StreamEnd, StreamItem};
pub use tracker::RequestTracker;

//! Tracker configuration.

/// Tuning switches for a request tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Emit an info-level line when a request is added, aborted or finished.
    /// Per-output chatter stays at debug level regardless.
    pub log_requests: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { log_requests: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_enables_request_logging() {
        assert!(TrackerConfig::default().log_requests);
    }
}

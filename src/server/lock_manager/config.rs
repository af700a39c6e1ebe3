//! Detector-tuning constants, separated from the outer
//! [`crate::config::ServiceConfig`] the same way the teacher keeps a
//! `lock_manager::Config` distinct from the server's own config.

use std::time::Duration;

pub const MAX_HOPS: u32 = 64;
pub const PEER_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    pub max_hops: u32,
    pub peer_call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            peer_call_timeout: PEER_CALL_TIMEOUT,
        }
    }
}

//! Keepalive policy for the browser control connection
//!
//! The controlling side can stall for minutes while Chromium renders a heavy
//! page or a local model works through a long prompt. Library defaults of a
//! few tens of seconds tear the connection down during those normal stalls,
//! so the timeouts are passed explicitly when the connection is opened.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepalivePolicy {
    /// How often a ping is sent.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered before the connection is dropped.
    /// Also bounds the opening handshake.
    pub ping_timeout: Duration,
    /// How long closing may take before the connection is abandoned.
    pub close_timeout: Duration,
}

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(120),
            close_timeout: Duration::from_secs(120),
        }
    }
}

impl KeepalivePolicy {
    /// Same policy with both timeouts set to `timeout`.
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self.close_timeout = timeout;
        self
    }
}

/// Everything needed to open the control connection once.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub url: String,
    pub max_frame_size: Option<usize>,
    pub additional_headers: HashMap<String, String>,
    pub keepalive: KeepalivePolicy,
}

impl ConnectParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_frame_size: None,
            additional_headers: HashMap::new(),
            keepalive: KeepalivePolicy::default(),
        }
    }

    pub fn with_keepalive(mut self, keepalive: KeepalivePolicy) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = Some(max_frame_size);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }
}

use crate::message::Dict;
use std::time::Duration;

pub const SUBPROTOCOL: &str = "wamp.2.json";
pub const DEFAULT_AGENT: &str = concat!("wampsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    /// Capacity of the inbound frame channel.
    pub frame_buffer: usize,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: None,
            origin: None,
            frame_buffer: 1024,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub realm: String,
    pub agent: String,
    pub roles: Vec<String>,
    pub authmethods: Vec<String>,
    pub authid: Option<String>,
    pub authrole: Option<String>,
    pub authextra: Option<Dict>,
    /// How long a correlated request may stay unanswered.
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
    pub ping_interval: Option<Duration>,
    /// Per-topic event buffer shared by all handles of that topic.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            realm: "realm1".to_string(),
            agent: DEFAULT_AGENT.to_string(),
            roles: vec![
                "caller".to_string(),
                "subscriber".to_string(),
                "publisher".to_string(),
                "callee".to_string(),
            ],
            authmethods: Vec::new(),
            authid: None,
            authrole: None,
            authextra: None,
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            ping_interval: Some(Duration::from_secs(15)),
            event_buffer: 256,
        }
    }
}

impl SessionConfig {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_authmethod(mut self, method: impl Into<String>) -> Self {
        self.authmethods.push(method.into());
        self
    }

    pub fn with_authid(mut self, authid: impl Into<String>) -> Self {
        self.authid = Some(authid.into());
        self
    }

    pub fn with_authrole(mut self, authrole: impl Into<String>) -> Self {
        self.authrole = Some(authrole.into());
        self
    }

    pub fn with_authextra(mut self, authextra: Dict) -> Self {
        self.authextra = Some(authextra);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }
}

/// Backoff schedule for rebuilding a session after transport loss.
///
/// Sessions never reconnect on their own; whoever owns them asks the policy
/// how long to wait before constructing the next one.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub intervals: Vec<Duration>,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            intervals: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ],
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given zero-based attempt, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let delay = self
            .intervals
            .get(attempt as usize)
            .copied()
            .unwrap_or_else(|| {
                self.intervals
                    .last()
                    .copied()
                    .unwrap_or(Duration::from_secs(16))
            });
        Some(delay)
    }
}

#[derive(Debug, Clone)]
pub struct MergerConfig {
    pub output_buffer: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self { output_buffer: 64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays() {
        let policy = ReconnectPolicy {
            intervals: vec![Duration::from_secs(1), Duration::from_secs(3)],
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::new("sports").with_authmethod("ticket");
        assert_eq!(config.realm, "sports");
        assert_eq!(config.authmethods, vec!["ticket".to_string()]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.roles.contains(&"subscriber".to_string()));
    }
}

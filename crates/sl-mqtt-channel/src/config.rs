use std::time::Duration;

use serde::Deserialize;

use sl_protocol::topics::DEFAULT_PREFIX;

/// Transport tuning, loadable from TOML. Broker address and credentials
/// come from the device identity.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Enable TLS (mTLS). When false, connects plaintext (local dev).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// How long to wait for CONNACK before giving up on a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Capacity of the client-to-event-loop request channel.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    /// Prefix of the shadow topic tree.
    #[serde(default = "default_shadow_prefix")]
    pub shadow_topic_prefix: String,
}

fn default_use_tls() -> bool {
    true
}

fn default_keepalive() -> u16 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_capacity() -> usize {
    64
}

fn default_shadow_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl MqttConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.into())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            use_tls: default_use_tls(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            request_capacity: default_request_capacity(),
            shadow_topic_prefix: default_shadow_prefix(),
        }
    }
}

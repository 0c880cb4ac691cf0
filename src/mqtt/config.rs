use std::time::Duration;

use rumqttc::{MqttOptions, Transport};
use serde::{Deserialize, Serialize};

// rumqttc refuses keep-alive intervals below five seconds
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Broker connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// TLS with the platform's root certificates
    pub use_tls: bool,
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_secs: u64,
    pub max_retry_attempts: u32,
    /// Stop the ingestor once `max_retry_attempts` is reached instead of retrying silently
    pub fail_on_max_retries: bool,
    pub topics: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "flotilla-dispatch".to_string(),
            username: String::new(),
            password: String::new(),
            use_tls: false,
            keep_alive_secs: 5,
            reconnect_delay_secs: 5,
            max_retry_attempts: 5,
            fail_on_max_retries: false,
            topics: vec!["isar/#".to_string(), "sara/#".to_string()],
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("fail_on_max_retries", &self.fail_on_max_retries)
            .field("topics", &self.topics)
            .finish()
    }
}

impl MqttConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(
            self.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));

        if !self.username.is_empty() {
            options.set_credentials(self.username.clone(), self.password.clone());
        }
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_options_from_config() {
        let config = MqttConfig {
            host: "broker.example".to_string(),
            port: 8883,
            username: "flotilla".to_string(),
            password: "secret".to_string(),
            keep_alive_secs: 1,
            ..Default::default()
        };

        let options = config.to_options();
        assert_eq!(options.broker_address(), ("broker.example".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(5));
        assert_eq!(
            options.credentials(),
            Some(("flotilla".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn debug_output_hides_password() {
        let config = MqttConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}

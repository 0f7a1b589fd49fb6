use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default bound on concurrently live sessions of one stub type.
pub const DEFAULT_MAX_SESSIONS: usize = 16;
/// Default watchdog bound for service-internal calls.
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default watchdog bound for client-observable calls.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest shared buffer a session may allocate.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;

const CONFIG_PATHS: [&str; 2] = ["./avcs_config.toml", "./config.toml"];
const ENV_KEYS: [&str; 5] = [
    "AVCS_MAX_SESSIONS",
    "AVCS_SERVICE_TIMEOUT_MS",
    "AVCS_CLIENT_TIMEOUT_MS",
    "AVCS_MAX_BUFFER_SIZE",
    "AVCS_WATCHDOG_RECOVERY",
];

/// Service-wide tunables.
///
/// Built once at startup and handed to [`crate::service::ServiceContext::start`];
/// there is no process-global instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub max_sessions_per_type: usize,
    pub service_call_timeout: Duration,
    pub client_call_timeout: Duration,
    pub max_buffer_size: usize,
    pub watchdog_recovery: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_type: DEFAULT_MAX_SESSIONS,
            service_call_timeout: DEFAULT_SERVICE_TIMEOUT,
            client_call_timeout: DEFAULT_CLIENT_TIMEOUT,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            watchdog_recovery: true,
        }
    }
}

impl ServiceConfig {
    /// Defaults, overridden by environment variables, then by the first config file found.
    pub fn load() -> Self {
        let mut config = Self::default();

        for key in ENV_KEYS {
            if let Ok(value) = env::var(key) {
                config.apply("env", key, &value);
            }
        }

        for path in &CONFIG_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                config.apply_file_content(path, &content);
                break;
            }
        }

        config
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions_per_type = max;
        self
    }

    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_call_timeout = timeout;
        self
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_call_timeout = timeout;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_watchdog_recovery(mut self, enabled: bool) -> Self {
        self.watchdog_recovery = enabled;
        self
    }

    fn apply_file_content(&mut self, origin: &str, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.apply(origin, &key.trim().to_ascii_uppercase(), value);
            }
        }
    }

    fn apply(&mut self, origin: &str, key: &str, value: &str) {
        let key = key.strip_prefix("AVCS_").unwrap_or(key);
        let parsed = match key {
            "MAX_SESSIONS" => value.parse().map(|v| self.max_sessions_per_type = v).is_ok(),
            "SERVICE_TIMEOUT_MS" => value
                .parse()
                .map(|ms| self.service_call_timeout = Duration::from_millis(ms))
                .is_ok(),
            "CLIENT_TIMEOUT_MS" => value
                .parse()
                .map(|ms| self.client_call_timeout = Duration::from_millis(ms))
                .is_ok(),
            "MAX_BUFFER_SIZE" => value.parse().map(|v| self.max_buffer_size = v).is_ok(),
            "WATCHDOG_RECOVERY" => value.parse().map(|v| self.watchdog_recovery = v).is_ok(),
            _ => return,
        };
        if !parsed {
            log::warn!("Ignoring malformed {} value for {}: {:?}", origin, key, value);
        }
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# AVCS Configuration
# Every key may also be set through the environment with an AVCS_ prefix.

# Maximum live sessions per type (codec, demuxer, muxer)
max_sessions = 16

# Watchdog bounds in milliseconds
service_timeout_ms = 10000
client_timeout_ms = 30000

# Largest shared buffer in bytes
max_buffer_size = 8388608

# Trigger recovery when a service-internal call wedges
watchdog_recovery = true
"#;
        fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_sessions_per_type, 16);
        assert_eq!(config.service_call_timeout, Duration::from_secs(10));
        assert_eq!(config.client_call_timeout, Duration::from_secs(30));
        assert!(config.watchdog_recovery);
    }

    #[test]
    fn test_file_content_overrides() {
        let mut config = ServiceConfig::default();
        config.apply_file_content(
            "test",
            "# comment\nmax_sessions = 4\nclient_timeout_ms = \"1500\"\nwatchdog_recovery = false\nunknown = 1\n",
        );
        assert_eq!(config.max_sessions_per_type, 4);
        assert_eq!(config.client_call_timeout, Duration::from_millis(1500));
        assert!(!config.watchdog_recovery);
    }

    #[test]
    fn test_malformed_value_is_ignored() {
        let mut config = ServiceConfig::default();
        config.apply("test", "AVCS_MAX_SESSIONS", "many");
        assert_eq!(config.max_sessions_per_type, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn test_template_round_trip() {
        let dir = std::env::temp_dir().join(format!("avcs-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("avcs_config.toml");
        let _ = fs::remove_file(&path);

        create_default_config_template(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut config = ServiceConfig::default().with_max_sessions(1);
        config.apply_file_content("template", &content);
        assert_eq!(config, ServiceConfig::default());

        let _ = fs::remove_dir_all(&dir);
    }
}

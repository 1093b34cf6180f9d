// Configuration management module
// Loading, validation, and persistence of the daemon configuration

use crate::component::CapabilityKind;
use crate::wamp::is_valid_uri;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default socket path for IPC communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/screen-brightness-server.sock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub components: ComponentsConfig,
    pub brightness: BrightnessConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub realm: String,
    /// HTTP path of the WebSocket endpoint
    pub path: String,
    pub procedure_prefix: String,
    pub socket_path: PathBuf,
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsConfig {
    pub enabled: Vec<CapabilityKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessBackendKind {
    /// systemd-logind SetBrightness over the system bus
    Logind,
    /// Direct writes to the sysfs brightness file
    Sysfs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessConfig {
    pub backlight_path: PathBuf,
    pub backend: BrightnessBackendKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    pub machine_id_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            realm: "realm1".to_string(),
            path: "/ws".to_string(),
            procedure_prefix: "io.xconn.deskconn.deskconnd".to_string(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            call_timeout_secs: 30,
        }
    }
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            enabled: CapabilityKind::ALL.to_vec(),
        }
    }
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            backlight_path: PathBuf::from("/sys/class/backlight"),
            backend: BrightnessBackendKind::Logind,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_xconn._tcp.local.".to_string(),
            instance_name: None,
            machine_id_path: PathBuf::from("/etc/machine-id"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            components: ComponentsConfig::default(),
            brightness: BrightnessConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the XDG config directory
    /// If the file doesn't exist, create a default configuration
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path())
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let default_config = Self::default();
            default_config.save_to(config_path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            Error::config_error(
                config_path.display().to_string(),
                format!("Failed to read config file: {}", e),
            )
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::ConfigSyntax(format!(
                "TOML syntax error in {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the XDG config directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        self.validate()?;

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        fs::create_dir_all(&config_dir).map_err(|e| {
            Error::config_error(
                config_dir.display().to_string(),
                format!("Failed to create config directory: {}", e),
            )
        })?;

        let content = toml::to_string_pretty(self).map_err(|e| {
            Error::config_error(
                config_path.display().to_string(),
                format!("Failed to serialize config: {}", e),
            )
        })?;

        // Write to temporary file first, then rename for atomic operation
        let temp_path = config_dir.join(".config.toml.tmp");

        fs::write(&temp_path, &content).map_err(|e| {
            Error::config_error(
                temp_path.display().to_string(),
                format!("Failed to write temporary config file: {}", e),
            )
        })?;

        fs::rename(&temp_path, config_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::config_error(
                config_path.display().to_string(),
                format!("Failed to save config file: {}", e),
            )
        })?;

        Ok(())
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;

        if server.port == 0 {
            return Err(Error::ConfigValidation(
                "server.port must be non-zero".to_string(),
            ));
        }

        if !is_valid_uri(&server.realm) {
            return Err(Error::ConfigValidation(format!(
                "server.realm '{}' is not a valid WAMP URI",
                server.realm
            )));
        }

        if !is_valid_uri(&server.procedure_prefix) {
            return Err(Error::ConfigValidation(format!(
                "server.procedure_prefix '{}' is not a valid WAMP URI",
                server.procedure_prefix
            )));
        }

        if !server.path.starts_with('/') {
            return Err(Error::ConfigValidation(format!(
                "server.path '{}' must start with '/'",
                server.path
            )));
        }

        if server.path == "/health" {
            return Err(Error::ConfigValidation(
                "server.path '/health' is reserved for the health endpoint".to_string(),
            ));
        }

        if server.call_timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "server.call_timeout_secs must be non-zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for kind in &self.components.enabled {
            if !seen.insert(kind) {
                return Err(Error::ConfigValidation(format!(
                    "Component '{}' is listed more than once in components.enabled",
                    kind
                )));
            }
        }

        let service_type = &self.discovery.service_type;
        if !(service_type.ends_with("._tcp.local.") || service_type.ends_with("._udp.local."))
            || !service_type.starts_with('_')
        {
            return Err(Error::ConfigValidation(format!(
                "discovery.service_type '{}' must look like '_name._tcp.local.'",
                service_type
            )));
        }

        if let Some(name) = &self.discovery.instance_name {
            if name.trim().is_empty() {
                return Err(Error::ConfigValidation(
                    "discovery.instance_name must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn is_enabled(&self, kind: CapabilityKind) -> bool {
        self.components.enabled.contains(&kind)
    }

    /// Full procedure URI for a component suffix
    pub fn procedure_uri(&self, suffix: &str) -> String {
        format!("{}.{}", self.server.procedure_prefix, suffix)
    }

    /// Listen address for the WebSocket server
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    /// Get the configuration directory using XDG config directory
    pub fn get_config_dir() -> PathBuf {
        // Use XDG_CONFIG_HOME if set, otherwise use ~/.config
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".config")
            });

        config_dir.join(env!("CARGO_PKG_NAME"))
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
        let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        env::set_var("XDG_CONFIG_HOME", temp_dir.path());
        (temp_dir, guard)
    }

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.realm, "realm1");
        assert_eq!(config.components.enabled.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, _guard) = setup_test_env();

        let mut config = Config::default();
        config.server.port = 9090;
        config.brightness.backend = BrightnessBackendKind::Sysfs;
        assert!(config.save().is_ok());

        let loaded = Config::load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 9000\n\n[components]\nenabled = [\"screen-lock\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.realm, "realm1");
        assert!(config.is_enabled(CapabilityKind::ScreenLock));
        assert!(!config.is_enabled(CapabilityKind::CursorControl));
    }

    #[test]
    fn test_syntax_error_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigSyntax(_)));
    }

    #[test]
    fn test_unknown_component_kind_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[components]\nenabled = [\"keyboard\"]\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_config_validation_bad_realm() {
        let mut config = Config::default();
        config.server.realm = "realm with spaces".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_path() {
        let mut config = Config::default();
        config.server.path = "ws".to_string();
        assert!(config.validate().is_err());

        config.server.path = "/health".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_component() {
        let mut config = Config::default();
        config.components.enabled.push(CapabilityKind::ScreenLock);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_config_validation_service_type() {
        let mut config = Config::default();
        config.discovery.service_type = "xconn.local".to_string();
        assert!(config.validate().is_err());

        config.discovery.service_type = "_deskconn._tcp.local.".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_procedure_uri() {
        let config = Config::default();
        assert_eq!(
            config.procedure_uri("screen.brightness.get"),
            "io.xconn.deskconn.deskconnd.screen.brightness.get"
        );
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }
}

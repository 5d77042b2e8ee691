use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "HJ_BRIDGE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub http_server: HttpServerConfig,
    pub home_assistant: HomeAssistantConfig,
    pub devices: DevicesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub zkid: String,
    pub device_count: u32,
    pub heartbeat_interval: u64,
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 8000,
            username: String::new(),
            password: String::new(),
            zkid: String::new(),
            device_count: 0,
            heartbeat_interval: 30,
            reconnect_delay_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub entity_prefix: String,
    pub timeout_secs: u64,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8123,
            token: String::new(),
            entity_prefix: "switch.".to_string(),
            timeout_secs: 10,
        }
    }
}

impl HomeAssistantConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DevicesConfig {
    pub curtains: HashMap<String, String>,
    pub lights: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            config = toml::from_str::<Config>(&raw)
                .map_err(|err| format!("{}: {err}", config_path.display()))?;
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        // Gateway settings
        if let Ok(val) = env::var(format!("{}GATEWAY_HOST", ENV_PREFIX)) {
            self.gateway.host = val;
        }
        if let Ok(val) = env::var(format!("{}GATEWAY_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.gateway.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}GATEWAY_USERNAME", ENV_PREFIX)) {
            self.gateway.username = val;
        }
        if let Ok(val) = env::var(format!("{}GATEWAY_PASSWORD", ENV_PREFIX)) {
            self.gateway.password = val;
        }
        if let Ok(val) = env::var(format!("{}GATEWAY_ZKID", ENV_PREFIX)) {
            self.gateway.zkid = val;
        }
        if let Ok(val) = env::var(format!("{}GATEWAY_DEVICE_COUNT", ENV_PREFIX)) {
            if let Ok(count) = val.parse() {
                self.gateway.device_count = count;
            }
        }
        if let Ok(val) = env::var(format!("{}HEARTBEAT_INTERVAL", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.gateway.heartbeat_interval = secs;
            }
        }

        // REST front end
        if let Ok(val) = env::var(format!("{}HTTP_HOST", ENV_PREFIX)) {
            self.http_server.host = val;
        }
        if let Ok(val) = env::var(format!("{}HTTP_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.http_server.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}HTTP_TOKEN", ENV_PREFIX)) {
            self.http_server.token = Some(val);
        }

        // Home Assistant sink
        if let Ok(val) = env::var(format!("{}HA_HOST", ENV_PREFIX)) {
            self.home_assistant.host = val;
        }
        if let Ok(val) = env::var(format!("{}HA_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.home_assistant.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}HA_TOKEN", ENV_PREFIX)) {
            self.home_assistant.token = val;
        }

        // Logging
        if let Ok(val) = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)) {
            self.logging.level = val;
        }
        if let Ok(val) = env::var(format!("{}LOG_FILE", ENV_PREFIX)) {
            self.logging.file = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.gateway.host.trim().is_empty() {
            return Err("gateway.host must be set".into());
        }
        if self.gateway.port == 0 {
            return Err("gateway.port must be non-zero".into());
        }
        if self.gateway.heartbeat_interval == 0 {
            return Err("gateway.heartbeat_interval must be non-zero".into());
        }
        if self.gateway.reconnect_delay_secs == 0 {
            return Err("gateway.reconnect_delay_secs must be non-zero".into());
        }
        if self.http_server.port == 0 {
            return Err("http_server.port must be non-zero".into());
        }
        if self.home_assistant.port == 0 {
            return Err("home_assistant.port must be non-zero".into());
        }
        let has_devices = !self.devices.curtains.is_empty() || !self.devices.lights.is_empty();
        if has_devices && self.home_assistant.token.trim().is_empty() {
            return Err("home_assistant.token is required when devices are mapped".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    PathBuf::from(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

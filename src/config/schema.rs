use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-monitor journal files are kept.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
    #[serde(default, rename = "monitor")]
    pub monitors: Vec<MonitorConfig>,
}

fn default_data_dir() -> String {
    "/var/lib/argus".to_string()
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9205".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen_addr: default_metrics_addr(),
        }
    }
}

/// One backend server descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Server-specific monitor credentials; override the monitor-wide ones.
    #[serde(default)]
    pub monitor_user: Option<String>,
    #[serde(default)]
    pub monitor_password: Option<String>,
    /// Server-specific disk space limits, `path:pct[,path:pct]*`.
    #[serde(default)]
    pub disk_space_threshold: Option<String>,
}

fn default_server_port() -> u16 {
    3306
}

/// One monitor definition
///
/// Durations are plain integers with the unit in the key name, matching the
/// granularity the engine works at.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    /// Monitor flavor; selects the probing strategy.
    #[serde(default = "default_module")]
    pub module: String,
    /// Target tick period in milliseconds.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Journals older than this are discarded at start.
    #[serde(default = "default_journal_max_age_secs")]
    pub journal_max_age_secs: u64,
    /// Deadline for reaction script execution.
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
    /// Reaction script command template; empty disables scripts.
    #[serde(default)]
    pub script: String,
    /// Comma-separated event names the script subscribes to; empty means all.
    #[serde(default)]
    pub events: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_read_timeout_secs: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_write_timeout_secs: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_connect_timeout_secs: u64,
    #[serde(default = "default_connect_attempts")]
    pub backend_connect_attempts: u32,
    /// Monitor credentials.
    pub user: String,
    /// May be stored encrypted; run through the configured decryptor.
    #[serde(default)]
    pub password: String,
    /// Minimum period between disk space queries per server; 0 disables.
    #[serde(default)]
    pub disk_space_check_interval_ms: u64,
    /// Monitor-wide disk space limits, `path:pct[,path:pct]*`; `*` is the
    /// default applied to mounts not explicitly listed.
    #[serde(default)]
    pub disk_space_threshold: String,
    /// Names of the monitored servers, in order.
    #[serde(default)]
    pub servers: Vec<String>,
}

fn default_module() -> String {
    "mariadbmon".to_string()
}

fn default_monitor_interval_ms() -> u64 {
    2000
}

fn default_journal_max_age_secs() -> u64 {
    28800
}

fn default_script_timeout_secs() -> u64 {
    90
}

fn default_backend_timeout_secs() -> u64 {
    3
}

fn default_connect_attempts() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            metrics: MetricsConfig::default(),
            servers: Vec::new(),
            monitors: Vec::new(),
        }
    }
}

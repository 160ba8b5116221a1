use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ladder::RoleLadder;
use crate::rules::{ApprovalRule, RuleSet};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_secs: u64,
    /// Automatic escalations an open item may accumulate before the
    /// scheduler expires it instead of escalating again.
    pub max_auto_escalations: u32,
}

/// Role ladder and amount tiers. Validated into a `RoleLadder` + `RuleSet`
/// at startup; malformed coverage is fatal here, never per request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub roles: Vec<String>,
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub required_roles: Vec<String>,
    pub auto_escalation_secs: i64,
    #[serde(default)]
    pub requires_signature: bool,
    #[serde(default = "default_true")]
    pub allow_batch: bool,
}

fn default_true() -> bool {
    true
}

impl RuleConfig {
    fn to_rule(&self) -> ApprovalRule {
        ApprovalRule {
            name: self.name.clone(),
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            required_roles: self.required_roles.clone(),
            auto_escalation: Duration::seconds(self.auto_escalation_secs),
            requires_signature: self.requires_signature,
            allow_batch: self.allow_batch,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub scheduler_enabled: Option<bool>,
    pub scheduler_tick_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tierflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            scheduler: SchedulerConfig { enabled: true, tick_secs: 60, max_auto_escalations: 5 },
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            roles: vec![
                "foreman".to_string(),
                "site_supervisor".to_string(),
                "operations_manager".to_string(),
                "finance_director".to_string(),
            ],
            rules: vec![
                RuleConfig {
                    name: "petty".to_string(),
                    min_amount: Decimal::ZERO,
                    max_amount: Some(Decimal::new(10_000, 0)),
                    required_roles: vec!["foreman".to_string()],
                    auto_escalation_secs: 86_400,
                    requires_signature: false,
                    allow_batch: true,
                },
                RuleConfig {
                    name: "standard".to_string(),
                    min_amount: Decimal::new(10_000, 0),
                    max_amount: Some(Decimal::new(50_000, 0)),
                    required_roles: vec!["foreman".to_string(), "site_supervisor".to_string()],
                    auto_escalation_secs: 43_200,
                    requires_signature: false,
                    allow_batch: true,
                },
                RuleConfig {
                    name: "major".to_string(),
                    min_amount: Decimal::new(50_000, 0),
                    max_amount: Some(Decimal::new(250_000, 0)),
                    required_roles: vec![
                        "foreman".to_string(),
                        "site_supervisor".to_string(),
                        "operations_manager".to_string(),
                    ],
                    auto_escalation_secs: 28_800,
                    requires_signature: true,
                    allow_batch: false,
                },
                RuleConfig {
                    name: "capital".to_string(),
                    min_amount: Decimal::new(250_000, 0),
                    max_amount: None,
                    required_roles: vec![
                        "foreman".to_string(),
                        "site_supervisor".to_string(),
                        "operations_manager".to_string(),
                        "finance_director".to_string(),
                    ],
                    auto_escalation_secs: 14_400,
                    requires_signature: true,
                    allow_batch: false,
                },
            ],
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tierflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Build the validated role ladder and rule set from workflow config.
    pub fn workflow_engine(&self) -> Result<(RoleLadder, RuleSet), ConfigError> {
        let ladder = RoleLadder::new(self.workflow.roles.clone())
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
        let rules = self.workflow.rules.iter().map(RuleConfig::to_rule).collect();
        let ruleset = RuleSet::new(rules, &ladder)
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
        Ok((ladder, ruleset))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(enabled) = scheduler.enabled {
                self.scheduler.enabled = enabled;
            }
            if let Some(tick_secs) = scheduler.tick_secs {
                self.scheduler.tick_secs = tick_secs;
            }
            if let Some(max_auto_escalations) = scheduler.max_auto_escalations {
                self.scheduler.max_auto_escalations = max_auto_escalations;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(roles) = workflow.roles {
                self.workflow.roles = roles;
            }
            if let Some(rules) = workflow.rules {
                self.workflow.rules = rules;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TIERFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TIERFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TIERFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TIERFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TIERFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TIERFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TIERFLOW_SERVER_PORT") {
            self.server.port = parse_u16("TIERFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TIERFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TIERFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("TIERFLOW_SCHEDULER_ENABLED") {
            self.scheduler.enabled = parse_bool("TIERFLOW_SCHEDULER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TIERFLOW_SCHEDULER_TICK_SECS") {
            self.scheduler.tick_secs = parse_u64("TIERFLOW_SCHEDULER_TICK_SECS", &value)?;
        }
        if let Some(value) = read_env("TIERFLOW_SCHEDULER_MAX_AUTO_ESCALATIONS") {
            self.scheduler.max_auto_escalations =
                parse_u32("TIERFLOW_SCHEDULER_MAX_AUTO_ESCALATIONS", &value)?;
        }

        let log_level =
            read_env("TIERFLOW_LOGGING_LEVEL").or_else(|| read_env("TIERFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TIERFLOW_LOGGING_FORMAT").or_else(|| read_env("TIERFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.scheduler_enabled {
            self.scheduler.enabled = enabled;
        }
        if let Some(tick_secs) = overrides.scheduler_tick_secs {
            self.scheduler.tick_secs = tick_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_scheduler(&self.scheduler)?;
        self.workflow_engine()?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    scheduler: Option<SchedulerPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    enabled: Option<bool>,
    tick_secs: Option<u64>,
    max_auto_escalations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    roles: Option<Vec<String>>,
    rules: Option<Vec<RuleConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tierflow.toml"), PathBuf::from("config/tierflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if scheduler.tick_secs == 0 || scheduler.tick_secs > 3_600 {
        return Err(ConfigError::Validation(
            "scheduler.tick_secs must be in range 1..=3600".to_string(),
        ));
    }

    if scheduler.max_auto_escalations == 0 {
        return Err(ConfigError::Validation(
            "scheduler.max_auto_escalations must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};

    #[test]
    fn default_config_validates_and_builds_the_workflow_engine() {
        let config = AppConfig::default();
        config.validate().expect("default config is valid");

        let (ladder, rules) = config.workflow_engine().expect("engine");
        assert_eq!(ladder.height(), 4);
        assert_eq!(rules.rules().len(), 4);
        assert_eq!(rules.resolve(Decimal::new(5_000, 0)).expect("rule").name, "petty");
        assert_eq!(rules.resolve(Decimal::new(75_000, 0)).expect("rule").name, "major");
        assert_eq!(rules.resolve(Decimal::new(500_000, 0)).expect("rule").name, "capital");
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                log_level: Some("debug".to_string()),
                scheduler_enabled: Some(false),
                scheduler_tick_secs: Some(5),
            },
            ..LoadOptions::default()
        })
        .expect("load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.level, "debug");
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.tick_secs, 5);
    }

    #[test]
    fn missing_required_file_fails() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn non_sqlite_database_url_is_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/tierflow".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn broken_rule_coverage_is_fatal_at_validation_time() {
        let mut config = AppConfig::default();
        // Open a gap between the first two tiers.
        config.workflow.rules[1].min_amount = Decimal::new(20_000, 0);
        let error = config.validate().expect_err("gap must fail validation");
        assert!(matches!(error, ConfigError::Validation(_)));
        assert!(error.to_string().contains("gap"));
    }

    #[test]
    fn zero_tick_scheduler_is_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.tick_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}

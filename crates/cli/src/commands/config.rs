use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tierflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key: &str, env_key: &str| {
        field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "TIERFLOW_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "TIERFLOW_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "TIERFLOW_DATABASE_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "TIERFLOW_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "TIERFLOW_SERVER_PORT"),
    ));
    lines.push(render_line(
        "scheduler.enabled",
        &config.scheduler.enabled.to_string(),
        source("scheduler.enabled", "TIERFLOW_SCHEDULER_ENABLED"),
    ));
    lines.push(render_line(
        "scheduler.tick_secs",
        &config.scheduler.tick_secs.to_string(),
        source("scheduler.tick_secs", "TIERFLOW_SCHEDULER_TICK_SECS"),
    ));
    lines.push(render_line(
        "scheduler.max_auto_escalations",
        &config.scheduler.max_auto_escalations.to_string(),
        source("scheduler.max_auto_escalations", "TIERFLOW_SCHEDULER_MAX_AUTO_ESCALATIONS"),
    ));
    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "TIERFLOW_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "TIERFLOW_LOGGING_FORMAT"),
    ));

    lines.push(format!("- workflow.roles = [{}]", config.workflow.roles.join(", ")));
    for rule in &config.workflow.rules {
        let upper = rule
            .max_amount
            .map(|amount| amount.to_string())
            .unwrap_or_else(|| "unbounded".to_string());
        lines.push(format!(
            "- workflow.rules.{} = {}..{} ({} approver levels)",
            rule.name,
            rule.min_amount,
            upper,
            rule.required_roles.len()
        ));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("tierflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/tierflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

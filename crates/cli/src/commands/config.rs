use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use careline_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One rendered setting: dotted key, display value, and env keys in lookup order.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Setting {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(&setting, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", setting.key, setting.value));
    }
    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Setting::new("database.url", &config.database.url, &["CARELINE_DATABASE_URL"]),
        Setting::new(
            "database.max_connections",
            config.database.max_connections,
            &["CARELINE_DATABASE_MAX_CONNECTIONS"],
        ),
        Setting::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["CARELINE_DATABASE_TIMEOUT_SECS"],
        ),
        Setting::new("llm.provider", config.llm.provider.as_str(), &["CARELINE_LLM_PROVIDER"]),
        Setting::new("llm.model", &config.llm.model, &["CARELINE_LLM_MODEL"]),
        Setting::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["CARELINE_LLM_BASE_URL"],
        ),
        Setting::new("llm.api_key", api_key, &["CARELINE_LLM_API_KEY", "OPENAI_API_KEY"]),
        Setting::new("llm.temperature", config.llm.temperature, &["CARELINE_LLM_TEMPERATURE"]),
        Setting::new("llm.max_tokens", config.llm.max_tokens, &["CARELINE_LLM_MAX_TOKENS"]),
        Setting::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.map_or_else(|| "<unset>".to_string(), |secs| secs.to_string()),
            &["CARELINE_LLM_TIMEOUT_SECS"],
        ),
        Setting::new(
            "agent.max_iterations",
            config.agent.max_iterations,
            &["CARELINE_AGENT_MAX_ITERATIONS"],
        ),
        Setting::new(
            "agent.warning_threshold",
            config.agent.warning_threshold,
            &["CARELINE_AGENT_WARNING_THRESHOLD"],
        ),
        Setting::new(
            "agent.tool_log_limit",
            config.agent.tool_log_limit,
            &["CARELINE_AGENT_TOOL_LOG_LIMIT"],
        ),
        Setting::new(
            "agent.tool_calling",
            format!("{:?}", config.agent.tool_calling).to_lowercase(),
            &["CARELINE_AGENT_TOOL_CALLING"],
        ),
        Setting::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CARELINE_SERVER_BIND_ADDRESS"],
        ),
        Setting::new("server.port", config.server.port, &["CARELINE_SERVER_PORT"]),
        Setting::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["CARELINE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Setting::new(
            "logging.level",
            &config.logging.level,
            &["CARELINE_LOGGING_LEVEL", "CARELINE_LOG_LEVEL"],
        ),
        Setting::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["CARELINE_LOGGING_FORMAT", "CARELINE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("careline.toml"), PathBuf::from("config/careline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(setting: &Setting, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = setting.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, setting.key)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
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

#[cfg(test)]
mod tests {
    use careline_core::config::AppConfig;
    use toml::Value;

    use super::{contains_path, settings};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[llm]\nmodel = \"llama3.1\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.base_url"));
        assert!(!contains_path(&doc, "agent.max_iterations"));
    }

    #[test]
    fn api_key_is_never_rendered() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-live-secret".to_string().into());

        let rendered = settings(&config);
        let api_key = rendered.iter().find(|setting| setting.key == "llm.api_key").expect("key");

        assert_eq!(api_key.value, "<redacted>");
        assert!(rendered.iter().all(|setting| !setting.value.contains("sk-live")));
    }
}

//! Service configuration.
//!
//! The TOML file holds server, database and router settings plus an optional
//! list of seed providers. Seeds are imported into the registry only when it
//! is empty; after that the registry is authoritative.
//!
//! Provider credentials may reference environment variables (`${VAR}`), and a
//! provider without `api_key` picks up `LLMPOOL_<NAME>_API_KEY` when set.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::adapter::ApiFamily;
use crate::pool::PoolType;

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. "127.0.0.1:8080"
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, created on first start
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Router tuning knobs.
///
/// `max_retries` is only the fallback: the value stored under the
/// `max_retries` setting wins and is re-read on every dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Attempts per channel before failing over
    pub max_retries: u32,
    /// Total per-attempt timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect-phase timeout in seconds
    pub connect_timeout_secs: u64,
    /// Base delay before retrying the same channel (0 disables)
    pub retry_backoff_ms: u64,
    /// `max_tokens` sent to anthropic-family providers
    pub anthropic_max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            retry_backoff_ms: 500,
            anthropic_max_tokens: 4096,
        }
    }
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the `llmpool` target; `RUST_LOG` overrides
    pub level: String,
    /// Persist one row per dispatch to the database
    pub log_dispatches: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dispatches: true,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> String {
    "./llmpool.db".to_string()
}

fn default_priority() -> i64 {
    100
}

fn default_weight() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

/// Credential holder. Debug, Display and Serialize never show the value.
///
/// One value may carry several comma-separated keys; see [`split_credentials`].
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        ApiKey(SecretString::from(value))
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        ApiKey::from(value.to_string())
    }
}

/// Split a comma-separated credential set into individual keys.
///
/// Whitespace is trimmed and empty entries are dropped, so `"a, ,b,"`
/// yields two keys.
pub fn split_credentials(raw: &str) -> Vec<ApiKey> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ApiKey::from)
        .collect()
}

/// Where a seed provider's credential came from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Written out in the config file
    Literal,
    /// Built from `${VAR}` references
    EnvExpanded,
    /// Found in the convention variable named here
    Convention(String),
    None,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Literal => f.write_str("literal"),
            KeySource::EnvExpanded => f.write_str("environment"),
            KeySource::Convention(var) => write!(f, "${}", var),
            KeySource::None => f.write_str("missing"),
        }
    }
}

/// Seed provider, the config-file form of a registry record.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// API root, e.g. "https://api.openai.com/v1"
    pub url: String,
    /// One or more comma-separated keys, `${VAR}` references allowed
    pub api_key: Option<ApiKey>,
    pub pool: PoolType,
    #[serde(default)]
    pub api_family: ApiFamily,
    /// Tried left to right
    #[serde(default)]
    pub models: Vec<String>,
    /// Lower sorts first
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub primary: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Provider '{provider}': cannot resolve '{var}' in api_key: {reason}")]
    EnvVar {
        var: String,
        provider: String,
        reason: String,
    },
}

/// `LLMPOOL_<NAME>_API_KEY`, with the provider name upper-cased and `-` or
/// spaces turned into `_`.
pub fn convention_env_var_name(provider_name: &str) -> String {
    let name: String = provider_name
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("LLMPOOL_{}_API_KEY", name)
}

/// Replace every `${VAR}` in `input` using `lookup`.
///
/// A missing variable, an empty name or a dangling `${` is an error naming
/// the provider.
fn expand_references<F>(
    pattern: &Regex,
    input: &str,
    provider: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let failure = |var: &str, reason: &str| ConfigError::EnvVar {
        var: var.to_string(),
        provider: provider.to_string(),
        reason: reason.to_string(),
    };

    let mut expanded = String::with_capacity(input.len());
    let mut cursor = 0;

    for caps in pattern.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        if name.is_empty() {
            return Err(failure("${}", "empty variable name"));
        }
        let value = lookup(name).ok_or_else(|| failure(name, "variable is not set"))?;

        expanded.push_str(&input[cursor..whole.start()]);
        expanded.push_str(&value);
        cursor = whole.end();
    }

    let tail = &input[cursor..];
    if tail.contains("${") {
        return Err(failure(tail, "unclosed '${'"));
    }
    expanded.push_str(tail);
    Ok(expanded)
}

impl Config {
    /// Load a config file without touching the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse_str(&read_file(path.as_ref())?)
    }

    /// Parse and validate TOML; `api_key` values are taken verbatim.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving credentials from the environment.
    ///
    /// Returns the config with one `(provider name, KeySource)` per seed.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut config: Config = toml::from_str(&read_file(path.as_ref())?)?;
        let sources = config.resolve_keys(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok((config, sources))
    }

    /// Resolve every seed's credential in place.
    fn resolve_keys<F>(&mut self, lookup: F) -> Result<Vec<(String, KeySource)>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pattern = Regex::new(r"\$\{([^}]*)\}")
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        let mut sources = Vec::with_capacity(self.providers.len());

        for provider in &mut self.providers {
            let source = match provider.api_key.take() {
                Some(key) if key.expose_secret().contains("${") => {
                    let value =
                        expand_references(&pattern, key.expose_secret(), &provider.name, &lookup)?;
                    provider.api_key = Some(ApiKey::from(value));
                    KeySource::EnvExpanded
                }
                Some(key) => {
                    provider.api_key = Some(key);
                    KeySource::Literal
                }
                None => {
                    let var = convention_env_var_name(&provider.name);
                    match lookup(&var) {
                        Some(value) => {
                            provider.api_key = Some(ApiKey::from(value));
                            KeySource::Convention(var)
                        }
                        None => KeySource::None,
                    }
                }
            };
            sources.push((provider.name.clone(), source));
        }

        Ok(sources)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.router.max_retries == 0 {
            return Err(ConfigError::Validation(
                "router.max_retries must be at least 1".to_string(),
            ));
        }

        if let Some(index) = self.providers.iter().position(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "provider #{} has an empty name",
                index + 1
            )));
        }

        if let Some(p) = self.providers.iter().find(|p| p.url.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "provider '{}' has an empty url",
                p.name
            )));
        }

        for pool in PoolType::ALL {
            let primaries: Vec<&str> = self
                .providers
                .iter()
                .filter(|p| p.pool == pool && p.primary)
                .map(|p| p.name.as_str())
                .collect();
            if primaries.len() > 1 {
                return Err(ConfigError::Validation(format!(
                    "pool '{}' has more than one primary provider ({})",
                    pool,
                    primaries.join(", ")
                )));
            }
        }

        if self.providers.is_empty() {
            tracing::debug!("No seed providers; the registry is managed through the admin API");
        }
        Ok(())
    }

    /// Database settings, defaulted when the section is absent.
    pub fn database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn expand(input: &str, pairs: &[(&str, &str)]) -> Result<String, ConfigError> {
        let pattern = Regex::new(r"\$\{([^}]*)\}").unwrap();
        expand_references(&pattern, input, "alpha", lookup_from(pairs))
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = Config::parse_str("[server]\nlisten = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert!(config.providers.is_empty());
        assert_eq!(config.router.max_retries, 3);
        assert_eq!(config.router.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.router.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.router.anthropic_max_tokens, 4096);
        assert_eq!(config.database().path, "./llmpool.db");
        assert!(config.logging.log_dispatches);
    }

    #[test]
    fn partial_router_section_keeps_other_defaults() {
        let config = Config::parse_str("[server]\n[router]\nretry_backoff_ms = 0\n").unwrap();
        assert_eq!(config.router.retry_backoff(), Duration::ZERO);
        assert_eq!(config.router.max_retries, 3);
    }

    #[test]
    fn seeds_parse_with_family_and_pool() {
        let toml = r#"
            [server]

            [database]
            path = "./test.db"

            [router]
            max_retries = 2

            [[providers]]
            name = "meta-openai"
            url = "https://api.openai.com/v1"
            api_key = "sk-a,sk-b"
            pool = "metadata"
            models = ["gpt-4o-mini", "gpt-4o"]
            priority = 1
            primary = true

            [[providers]]
            name = "deep-gemini"
            url = "https://generativelanguage.googleapis.com/v1beta"
            api_key = "g-key"
            pool = "analysis"
            api_family = "gemini"
            models = ["gemini-1.5-pro"]

            [logging]
            level = "debug"
            log_dispatches = false
        "#;

        let config = Config::parse_str(toml).unwrap();
        let (meta, deep) = (&config.providers[0], &config.providers[1]);
        assert_eq!(meta.pool, PoolType::Metadata);
        assert_eq!(meta.api_family, ApiFamily::OpenAi);
        assert_eq!(meta.models, vec!["gpt-4o-mini", "gpt-4o"]);
        assert!(meta.primary);
        assert_eq!(deep.api_family, ApiFamily::Gemini);
        assert_eq!(deep.priority, 100);
        assert_eq!(deep.weight, 10);
        assert!(deep.enabled);
        assert_eq!(config.router.max_retries, 2);
        assert!(!config.logging.log_dispatches);
    }

    #[test]
    fn one_primary_per_pool() {
        let same_pool = r#"
            [server]
            [[providers]]
            name = "a"
            url = "https://a.test/v1"
            pool = "metadata"
            primary = true
            [[providers]]
            name = "b"
            url = "https://b.test/v1"
            pool = "metadata"
            primary = true
        "#;
        let err = Config::parse_str(same_pool).unwrap_err().to_string();
        assert!(err.contains("more than one primary"), "{}", err);

        let split_pools = same_pool.replacen("pool = \"metadata\"", "pool = \"analysis\"", 1);
        assert!(Config::parse_str(&split_pools).is_ok());
    }

    #[test]
    fn rejects_zero_retries_and_unknown_pool() {
        assert!(matches!(
            Config::parse_str("[server]\n[router]\nmax_retries = 0\n"),
            Err(ConfigError::Validation(_))
        ));

        let unknown = "[server]\n[[providers]]\nname = \"a\"\nurl = \"https://a.test\"\npool = \"translation\"\n";
        assert!(matches!(Config::parse_str(unknown), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn empty_url_rejected() {
        let toml = "[server]\n[[providers]]\nname = \"blank\"\nurl = \" \"\npool = \"analysis\"\n";
        let err = Config::parse_str(toml).unwrap_err().to_string();
        assert!(err.contains("blank"), "{}", err);
    }

    #[test]
    fn empty_name_rejected() {
        let toml = "[server]\n[[providers]]\nname = \"ok\"\nurl = \"https://ok.test\"\npool = \"analysis\"\n[[providers]]\nname = \"\"\nurl = \"https://x.test\"\npool = \"analysis\"\n";
        let err = Config::parse_str(toml).unwrap_err().to_string();
        assert!(err.contains("provider #2"), "{}", err);
    }

    #[test]
    fn api_key_never_printed() {
        let key = ApiKey::from("sk-super-secret");
        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(key.to_string(), "[REDACTED]");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"[REDACTED]\"");

        let config = Config::parse_str(
            "[server]\n[[providers]]\nname = \"p\"\nurl = \"https://p.test\"\napi_key = \"sk-ABCD1234secret\"\npool = \"metadata\"\n",
        )
        .unwrap();
        let debug = format!("{:?}", config.providers[0]);
        assert!(!debug.contains("sk-ABCD1234secret"));
    }

    #[test]
    fn credentials_split_and_trimmed() {
        let keys = split_credentials(" sk-a, ,sk-b,");
        let exposed: Vec<&str> = keys.iter().map(|k| k.expose_secret()).collect();
        assert_eq!(exposed, vec!["sk-a", "sk-b"]);
        assert!(split_credentials(" , ").is_empty());
    }

    #[test]
    fn expansion_substitutes_each_reference() {
        let vars = [("KEY_A", "sk-a"), ("KEY_B", "sk-b")];
        assert_eq!(expand("${KEY_A},${KEY_B}", &vars).unwrap(), "sk-a,sk-b");
        assert_eq!(expand("pre-${KEY_A}-post", &vars).unwrap(), "pre-sk-a-post");
        assert_eq!(expand("literal", &[]).unwrap(), "literal");
    }

    #[test]
    fn expansion_errors_name_variable_and_provider() {
        let missing = expand("${MISSING}", &[]).unwrap_err().to_string();
        assert!(missing.contains("MISSING") && missing.contains("alpha"), "{}", missing);

        let unclosed = expand("${A}${OPEN", &[("A", "x")]).unwrap_err().to_string();
        assert!(unclosed.contains("unclosed"), "{}", unclosed);

        let empty = expand("${}", &[]).unwrap_err().to_string();
        assert!(empty.contains("empty variable name"), "{}", empty);
    }

    #[test]
    fn convention_name() {
        assert_eq!(convention_env_var_name("alpha"), "LLMPOOL_ALPHA_API_KEY");
        assert_eq!(
            convention_env_var_name("provider-beta"),
            "LLMPOOL_PROVIDER_BETA_API_KEY"
        );
        assert_eq!(convention_env_var_name("my service"), "LLMPOOL_MY_SERVICE_API_KEY");
    }

    #[test]
    fn resolve_keys_reports_each_source() {
        let toml = r#"
            [server]
            [[providers]]
            name = "lit"
            url = "https://a.test"
            api_key = "sk-literal"
            pool = "metadata"
            [[providers]]
            name = "env"
            url = "https://b.test"
            api_key = "${K1},${K2}"
            pool = "metadata"
            [[providers]]
            name = "conv-one"
            url = "https://c.test"
            pool = "analysis"
            [[providers]]
            name = "bare"
            url = "https://d.test"
            pool = "analysis"
        "#;
        let mut config = Config::parse_str(toml).unwrap();
        let sources = config
            .resolve_keys(lookup_from(&[
                ("K1", "sk-1"),
                ("K2", "sk-2"),
                ("LLMPOOL_CONV_ONE_API_KEY", "sk-conv"),
            ]))
            .unwrap();

        let kinds: Vec<&KeySource> = sources.iter().map(|(_, s)| s).collect();
        assert_eq!(
            kinds,
            vec![
                &KeySource::Literal,
                &KeySource::EnvExpanded,
                &KeySource::Convention("LLMPOOL_CONV_ONE_API_KEY".to_string()),
                &KeySource::None,
            ]
        );

        let keys: Vec<Option<&str>> = config
            .providers
            .iter()
            .map(|p| p.api_key.as_ref().map(ApiKey::expose_secret))
            .collect();
        assert_eq!(
            keys,
            vec![Some("sk-literal"), Some("sk-1,sk-2"), Some("sk-conv"), None]
        );
    }
}

use std::path::{Path, PathBuf};

use appledger_core::FlagColor;
use appledger_rules::{FallbackRule, MappingRule, MatchSpec, MatchType, RuleError, RuleMatcher};
use appledger_ynab::BuildOptions;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const TOKEN_ENV: &str = "YNAB_API_TOKEN";
pub const DEFAULT_API_URL: &str = "https://api.ynab.com/v1";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const DEFAULT_SUBJECT_FILTER: &str = "Your receipt from Apple.";
pub const DEFAULT_SENDER_FILTER: &str = "no_reply@email.apple.com";
pub const DEFAULT_MAX_AGE_DAYS: u32 = 7;
pub const DEFAULT_MAX_RESULTS: u32 = 10;
const SUPPORTED_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file found; looked in: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound(Vec<PathBuf>),
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("'version' is required")]
    MissingVersion,
    #[error("Unsupported config version: {0}. Expected 1.")]
    UnsupportedVersion(i64),
    #[error("'{0}' must be a non-empty string")]
    Missing(String),
    #[error("'{0}' must be a positive integer")]
    NotPositive(String),
    #[error("'app.mode' must be one of: email, local (got '{0}')")]
    InvalidMode(String),
    #[error("'{key}': {message}")]
    InvalidFlag { key: String, message: String },
    #[error("Rule '{rule_id}': {message}")]
    InvalidMatchType { rule_id: String, message: String },
    #[error("'email' section is required when 'app.mode' is 'email'")]
    MissingEmailSection,
    #[error(transparent)]
    Rules(#[from] RuleError),
}

// ── Document shape ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    version: Option<i64>,
    ynab: Option<RawYnab>,
    #[serde(default)]
    app: RawApp,
    email: Option<RawEmail>,
    mappings: Option<RawMappings>,
}

#[derive(Debug, Deserialize)]
struct RawYnab {
    api_token: Option<String>,
    budget_id: Option<String>,
    api_url: Option<String>,
    lookback_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApp {
    mode: Option<String>,
    log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawEmail {
    inbox_dir: Option<PathBuf>,
    subject_filter: Option<String>,
    sender_filter: Option<String>,
    max_age_days: Option<i64>,
    max_results: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawMappings {
    defaults: Option<RawDefaults>,
    #[serde(default)]
    rules: Vec<RawRule>,
    fallback: Option<RawFallback>,
}

#[derive(Debug, Deserialize)]
struct RawDefaults {
    ynab_account_id: Option<String>,
    ynab_flag_color: Option<String>,
    currency: Option<String>,
    single_line_memo: Option<bool>,
    split_payee_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    id: Option<String>,
    enabled: Option<bool>,
    #[serde(rename = "match")]
    matcher: Option<RawMatch>,
    ynab_category_id: Option<String>,
    ynab_payee_name: Option<String>,
    ynab_flag_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFallback {
    enabled: Option<bool>,
    ynab_category_id: Option<String>,
    ynab_payee_name: Option<String>,
    ynab_flag_color: Option<String>,
}

// ── Validated configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Local,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YnabConfig {
    pub api_token: String,
    pub budget_id: String,
    pub api_url: String,
    pub lookback_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub mode: AppMode,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub inbox_dir: PathBuf,
    pub subject_filter: String,
    pub sender_filter: String,
    pub max_age_days: u32,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDefaults {
    pub account_id: String,
    pub flag_color: Option<FlagColor>,
    pub currency: String,
    pub single_line_memo: bool,
    pub split_payee_name: String,
}

/// Everything a run needs, validated and with defaults resolved.
pub struct RuntimeConfig {
    pub path: PathBuf,
    pub ynab: YnabConfig,
    pub app: AppConfig,
    pub email: Option<EmailConfig>,
    pub defaults: MappingDefaults,
    pub matcher: RuleMatcher,
}

impl RuntimeConfig {
    /// Reads and validates `path`. A non-empty `YNAB_API_TOKEN` overrides the file token.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let env_token = std::env::var(TOKEN_ENV).ok();
        let config = Self::from_toml_str(&content, path, env_token)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str, path: &Path, env_token: Option<String>) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;

        let version = raw.version.ok_or(ConfigError::MissingVersion)?;
        if version != SUPPORTED_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let raw_ynab = raw.ynab.ok_or_else(|| ConfigError::Missing("ynab".into()))?;
        let api_token = env_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| non_empty(raw_ynab.api_token))
            .ok_or_else(|| ConfigError::Missing("ynab.api_token".into()))?;
        let ynab = YnabConfig {
            api_token,
            budget_id: required(raw_ynab.budget_id, "ynab.budget_id")?,
            api_url: non_empty(raw_ynab.api_url).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            lookback_days: positive(raw_ynab.lookback_days, "ynab.lookback_days", DEFAULT_LOOKBACK_DAYS)?,
        };

        let mode = match non_empty(raw.app.mode).map(|m| m.to_lowercase()).as_deref() {
            None | Some("local") => AppMode::Local,
            Some("email") => AppMode::Email,
            Some(other) => return Err(ConfigError::InvalidMode(other.to_string())),
        };
        let app = AppConfig {
            mode,
            log_path: raw.app.log_path,
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let email = match (raw.email, mode) {
            (Some(e), _) => Some(email_config(e, base_dir, mode)?),
            (None, AppMode::Email) => return Err(ConfigError::MissingEmailSection),
            (None, AppMode::Local) => None,
        };

        let mappings = raw.mappings.ok_or_else(|| ConfigError::Missing("mappings".into()))?;
        let raw_defaults = mappings
            .defaults
            .ok_or_else(|| ConfigError::Missing("mappings.defaults".into()))?;
        let defaults = MappingDefaults {
            account_id: required(raw_defaults.ynab_account_id, "mappings.defaults.ynab_account_id")?,
            flag_color: flag(raw_defaults.ynab_flag_color, "mappings.defaults.ynab_flag_color")?,
            currency: non_empty(raw_defaults.currency).unwrap_or_else(|| "USD".to_string()),
            single_line_memo: raw_defaults.single_line_memo.unwrap_or(true),
            split_payee_name: non_empty(raw_defaults.split_payee_name).unwrap_or_else(|| "Apple".to_string()),
        };

        let rules = mappings
            .rules
            .into_iter()
            .map(mapping_rule)
            .collect::<Result<Vec<_>, _>>()?;
        let fallback = mappings.fallback.map(fallback_rule).transpose()?;
        let matcher = RuleMatcher::new(rules, fallback)?;

        Ok(RuntimeConfig {
            path: path.to_path_buf(),
            ynab,
            app,
            email,
            defaults,
            matcher,
        })
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            account_id: self.defaults.account_id.clone(),
            default_flag: self.defaults.flag_color,
            single_line_memo: self.defaults.single_line_memo,
            split_payee_name: self.defaults.split_payee_name.clone(),
        }
    }
}

/// `--config`, then `./config.toml`, then the per-user config directory.
pub fn discover(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::ProjectDirs::from("com", "appledger", "appledger") {
        candidates.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    let found = candidates.iter().find(|p| p.is_file()).cloned();
    found.ok_or(ConfigError::NotFound(candidates))
}

fn email_config(raw: RawEmail, base_dir: &Path, mode: AppMode) -> Result<EmailConfig, ConfigError> {
    let inbox_dir = match (raw.inbox_dir, mode) {
        (Some(dir), _) if dir.is_absolute() => dir,
        (Some(dir), _) => base_dir.join(dir),
        (None, AppMode::Email) => return Err(ConfigError::Missing("email.inbox_dir".into())),
        (None, AppMode::Local) => base_dir.to_path_buf(),
    };
    Ok(EmailConfig {
        inbox_dir,
        subject_filter: non_empty(raw.subject_filter).unwrap_or_else(|| DEFAULT_SUBJECT_FILTER.to_string()),
        sender_filter: non_empty(raw.sender_filter).unwrap_or_else(|| DEFAULT_SENDER_FILTER.to_string()),
        max_age_days: positive(raw.max_age_days, "email.max_age_days", DEFAULT_MAX_AGE_DAYS)?,
        max_results: positive(raw.max_results, "email.max_results", DEFAULT_MAX_RESULTS)?,
    })
}

fn mapping_rule(raw: RawRule) -> Result<MappingRule, ConfigError> {
    let id = required(raw.id, "mappings.rules[].id")?;
    let raw_match = raw
        .matcher
        .ok_or_else(|| ConfigError::Missing(format!("mappings.rules[{id}].match")))?;
    let kind: MatchType = required(raw_match.kind, "match.type")?
        .parse()
        .map_err(|message| ConfigError::InvalidMatchType {
            rule_id: id.clone(),
            message,
        })?;
    let value = required(raw_match.value, "match.value")?;
    Ok(MappingRule {
        flag_color: flag(raw.ynab_flag_color, &format!("mappings.rules[{id}].ynab_flag_color"))?,
        id,
        enabled: raw.enabled.unwrap_or(true),
        matcher: MatchSpec::new(kind, value),
        category_id: non_empty(raw.ynab_category_id).unwrap_or_default(),
        payee_name: non_empty(raw.ynab_payee_name).unwrap_or_default(),
    })
}

fn fallback_rule(raw: RawFallback) -> Result<FallbackRule, ConfigError> {
    Ok(FallbackRule {
        enabled: raw.enabled.unwrap_or(true),
        category_id: non_empty(raw.ynab_category_id).unwrap_or_default(),
        payee_name: non_empty(raw.ynab_payee_name).unwrap_or_default(),
        flag_color: flag(raw.ynab_flag_color, "mappings.fallback.ynab_flag_color")?,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &str) -> Result<String, ConfigError> {
    non_empty(value).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn positive(value: Option<i64>, key: &str, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) if v > 0 => u32::try_from(v).map_err(|_| ConfigError::NotPositive(key.to_string())),
        Some(_) => Err(ConfigError::NotPositive(key.to_string())),
    }
}

fn flag(value: Option<String>, key: &str) -> Result<Option<FlagColor>, ConfigError> {
    non_empty(value)
        .map(|v| {
            v.parse::<FlagColor>().map_err(|message| ConfigError::InvalidFlag {
                key: key.to_string(),
                message,
            })
        })
        .transpose()
}

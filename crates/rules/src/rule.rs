use appledger_core::FlagColor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

impl MatchType {
    /// Evaluation order across the whole rule list.
    pub const PRECEDENCE: [MatchType; 3] = [MatchType::Exact, MatchType::Contains, MatchType::Regex];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Regex => "regex",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(MatchType::Exact),
            "contains" => Ok(MatchType::Contains),
            "regex" => Ok(MatchType::Regex),
            other => Err(format!("Unknown match type: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(rename = "type")]
    pub kind: MatchType,
    pub value: String,
}

impl MatchSpec {
    pub fn new(kind: MatchType, value: impl Into<String>) -> Self {
        MatchSpec {
            kind,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub id: String,
    pub enabled: bool,
    pub matcher: MatchSpec,
    pub category_id: String,
    pub payee_name: String,
    pub flag_color: Option<FlagColor>,
}

/// Applied to line items no rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRule {
    pub enabled: bool,
    pub category_id: String,
    pub payee_name: String,
    pub flag_color: Option<FlagColor>,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("At least one mapping rule is required")]
    NoRules,
    #[error("Mapping rule id '{0}' is used more than once")]
    DuplicateId(String),
    #[error("Mapping rule '{0}' has an empty id or match value")]
    EmptyField(String),
    #[error("Mapping rule '{0}' is enabled but has no ynab_payee_name")]
    MissingPayee(String),
    #[error("Fallback mapping is enabled but has no ynab_payee_name")]
    FallbackMissingPayee,
    #[error("Mapping rule '{0}' is enabled but has no ynab_category_id")]
    MissingCategory(String),
    #[error("Fallback mapping is enabled but has no ynab_category_id")]
    FallbackMissingCategory,
    #[error("Mapping rule '{rule_id}' has an invalid regex: {source}")]
    InvalidRegex {
        rule_id: String,
        #[source]
        source: regex::Error,
    },
}

pub mod matcher;
pub mod rule;

pub use matcher::{allocate_tax, MappingError, MatchOutcome, MatchedLine, RuleMatcher};
pub use rule::{FallbackRule, MappingRule, MatchSpec, MatchType, RuleError};

/// Rule id recorded on lines resolved by the fallback rule.
pub const FALLBACK_RULE_ID: &str = "fallback";

use std::collections::HashSet;

use appledger_core::{allocate, AllocationError, FlagColor, LineItem, Money};
use serde::Serialize;
use thiserror::Error;

use crate::rule::{FallbackRule, MappingRule, MatchType, RuleError};
use crate::FALLBACK_RULE_ID;

/// A line item with its resolved payee, category and share of the tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedLine {
    pub item: LineItem,
    pub rule_id: String,
    pub payee_name: String,
    pub category_id: String,
    pub used_fallback: bool,
    pub flag_color: Option<FlagColor>,
    pub allocated_tax: Money,
}

impl MatchedLine {
    pub fn total(&self) -> Money {
        self.item.amount + self.allocated_tax
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No mapping rule for: {}", .0.join("; "))]
pub struct MappingError(pub Vec<String>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedLine>,
    /// Subscription names with no rule and no enabled fallback, in receipt order.
    pub unmapped: Vec<String>,
}

impl MatchOutcome {
    pub fn fallback_count(&self) -> usize {
        self.matched.iter().filter(|l| l.used_fallback).count()
    }

    /// All lines, or the full list of unmapped names. Never a partial result.
    pub fn into_result(self) -> Result<Vec<MatchedLine>, MappingError> {
        if self.unmapped.is_empty() {
            Ok(self.matched)
        } else {
            Err(MappingError(self.unmapped))
        }
    }
}

/// Internal pairing of a rule with its precompiled regex (if applicable).
struct CompiledRule {
    rule: MappingRule,
    compiled_regex: Option<regex::Regex>,
}

impl CompiledRule {
    fn matches(&self, name: &str) -> bool {
        let pattern = self.rule.matcher.value.as_str();
        match self.rule.matcher.kind {
            MatchType::Exact => name == pattern,
            MatchType::Contains => name.contains(pattern),
            MatchType::Regex => self
                .compiled_regex
                .as_ref()
                .is_some_and(|re| re.is_match(name)),
        }
    }
}

pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
    fallback: Option<FallbackRule>,
}

impl RuleMatcher {
    /// Validates and compiles the rule set once, before any receipt is read.
    pub fn new(rules: Vec<MappingRule>, fallback: Option<FallbackRule>) -> Result<Self, RuleError> {
        if rules.is_empty() {
            return Err(RuleError::NoRules);
        }

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for mut rule in rules {
            rule.matcher.value = rule.matcher.value.trim().to_string();
            if rule.id.trim().is_empty() || rule.matcher.value.is_empty() {
                return Err(RuleError::EmptyField(rule.id));
            }
            if !seen.insert(rule.id.clone()) {
                return Err(RuleError::DuplicateId(rule.id));
            }
            if rule.enabled && rule.payee_name.trim().is_empty() {
                return Err(RuleError::MissingPayee(rule.id));
            }
            if rule.enabled && rule.category_id.trim().is_empty() {
                return Err(RuleError::MissingCategory(rule.id));
            }
            let compiled_regex = match rule.matcher.kind {
                MatchType::Regex => Some(regex::Regex::new(&rule.matcher.value).map_err(|source| {
                    RuleError::InvalidRegex {
                        rule_id: rule.id.clone(),
                        source,
                    }
                })?),
                _ => None,
            };
            compiled.push(CompiledRule { rule, compiled_regex });
        }

        if let Some(fb) = &fallback {
            if fb.enabled && fb.payee_name.trim().is_empty() {
                return Err(RuleError::FallbackMissingPayee);
            }
            if fb.enabled && fb.category_id.trim().is_empty() {
                return Err(RuleError::FallbackMissingCategory);
            }
        }

        Ok(Self {
            rules: compiled,
            fallback,
        })
    }

    /// First enabled rule that matches, trying every exact rule before any contains
    /// rule and every contains rule before any regex rule.
    pub fn find_rule(&self, subscription_name: &str) -> Option<&MappingRule> {
        let name = subscription_name.trim();
        MatchType::PRECEDENCE.iter().find_map(|kind| {
            self.rules
                .iter()
                .filter(|cr| cr.rule.enabled && cr.rule.matcher.kind == *kind)
                .find(|cr| cr.matches(name))
                .map(|cr| &cr.rule)
        })
    }

    pub fn match_items(&self, items: &[LineItem]) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        let fallback = self.fallback.as_ref().filter(|fb| fb.enabled);

        for item in items {
            if let Some(rule) = self.find_rule(&item.subscription_name) {
                tracing::debug!(rule = %rule.id, item = %item.subscription_name, "rule matched");
                outcome.matched.push(MatchedLine {
                    item: item.clone(),
                    rule_id: rule.id.clone(),
                    payee_name: rule.payee_name.clone(),
                    category_id: rule.category_id.clone(),
                    used_fallback: false,
                    flag_color: rule.flag_color,
                    allocated_tax: Money::zero(),
                });
            } else if let Some(fb) = fallback {
                tracing::warn!("No rule for '{}', using fallback", item.subscription_name);
                outcome.matched.push(MatchedLine {
                    item: item.clone(),
                    rule_id: FALLBACK_RULE_ID.to_string(),
                    payee_name: fb.payee_name.clone(),
                    category_id: fb.category_id.clone(),
                    used_fallback: true,
                    flag_color: fb.flag_color,
                    allocated_tax: Money::zero(),
                });
            } else {
                outcome.unmapped.push(item.subscription_name.clone());
            }
        }
        outcome
    }

    /// Flag colour of the enabled fallback rule, if any.
    pub fn fallback_flag(&self) -> Option<FlagColor> {
        self.fallback
            .as_ref()
            .filter(|fb| fb.enabled)
            .and_then(|fb| fb.flag_color)
    }
}

/// Writes each line's largest-remainder share of `tax_total` into `allocated_tax`.
pub fn allocate_tax(lines: &mut [MatchedLine], tax_total: Money) -> Result<(), AllocationError> {
    let amounts: Vec<Money> = lines.iter().map(|l| l.item.amount).collect();
    let shares = allocate(&amounts, tax_total)?;
    for (line, share) in lines.iter_mut().zip(shares) {
        line.allocated_tax = share;
    }
    Ok(())
}

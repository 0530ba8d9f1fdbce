//! Evaluation of Mojang's `rules` blocks on libraries and arguments.

use crate::game::installer::types::OsType;
use crate::game::launcher::version_parser::{Rule, RuleAction};
use regex::Regex;
use std::collections::HashMap;

/// Platform and feature flags a rule is evaluated against.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub os: OsType,
    /// Raw `std::env::consts::ARCH` value compared with `os.arch`
    pub arch: String,
    pub os_version: String,
    pub features: HashMap<String, bool>,
}

impl RuleContext {
    pub fn current() -> Self {
        Self {
            os: OsType::current(),
            arch: std::env::consts::ARCH.to_string(),
            os_version: sysinfo::System::os_version().unwrap_or_default(),
            features: HashMap::new(),
        }
    }

    pub fn for_os(os: OsType) -> Self {
        Self {
            os,
            arch: "x86_64".to_string(),
            os_version: String::new(),
            features: HashMap::new(),
        }
    }

    pub fn with_feature(mut self, name: &str, enabled: bool) -> Self {
        self.features.insert(name.to_string(), enabled);
        self
    }

    fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

fn rule_matches(rule: &Rule, ctx: &RuleContext) -> bool {
    if let Some(os_rule) = &rule.os {
        if let Some(name) = &os_rule.name {
            if name != ctx.os.as_str() {
                return false;
            }
        }
        if let Some(arch) = &os_rule.arch {
            if arch != &ctx.arch {
                return false;
            }
        }
        if let Some(version_expr) = &os_rule.version {
            // an unparsable pattern never matches
            match Regex::new(version_expr) {
                Ok(re) if re.is_match(&ctx.os_version) => {}
                _ => return false,
            }
        }
    }

    if let Some(features) = &rule.features {
        if features.iter().any(|(name, want)| ctx.feature(name) != *want) {
            return false;
        }
    }

    true
}

/// Last matching rule decides; nothing matching means disallowed.
pub fn rules_allow(rules: &[Rule], ctx: &RuleContext) -> bool {
    if rules.is_empty() {
        return true;
    }
    let mut allowed = false;
    for rule in rules {
        if rule_matches(rule, ctx) {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    allowed
}

/// True when any rule in the list gates on the given feature.
pub fn mentions_feature(rules: &[Rule], feature: &str) -> bool {
    rules.iter().any(|r| {
        r.features
            .as_ref()
            .map(|f| f.contains_key(feature))
            .unwrap_or(false)
    })
}

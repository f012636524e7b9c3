//! Package rule matching and uplink resolution
//!
//! Rules are glob patterns over package names, evaluated in declaration
//! order. The first specific rule that matches wins; a catch-all `**` rule
//! only applies when nothing more specific matched.

use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use indexmap::IndexMap;
use mirra_config::PackageRule;
use mirra_core::error::MirraError;
use mirra_uplink::Uplink;
use tracing::{debug, warn};

use crate::StorageResult;

/// Uplink implementations keyed by name, in configuration order
pub type UplinkRegistry = IndexMap<String, Arc<dyn Uplink>>;

const CATCH_ALL: &str = "**";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A package rule compiled against the uplink registry
#[derive(Debug)]
struct CompiledRule {
    source: String,
    pattern: Pattern,
    rule: PackageRule,
    /// Eligible uplinks, unknown names already dropped
    uplinks: Vec<Arc<dyn Uplink>>,
}

/// Resolves package names to the ordered uplinks allowed to serve them
#[derive(Debug)]
pub struct PackageRouter {
    rules: Vec<CompiledRule>,
    catch_all: Option<usize>,
}

impl PackageRouter {
    /// Compile package rules against the available uplinks.
    ///
    /// Rule patterns that reference an uplink missing from `registry` keep
    /// working; the missing uplink is reported once and ignored.
    pub fn new(packages: &IndexMap<String, PackageRule>, registry: &UplinkRegistry) -> StorageResult<Self> {
        let mut rules = Vec::with_capacity(packages.len());
        let mut catch_all = None;

        for (source, rule) in packages {
            let pattern = Pattern::new(source).map_err(|e| MirraError::ConfigValidation {
                field: format!("packages.\"{}\"", source),
                reason: e.to_string(),
            })?;

            let mut uplinks = Vec::with_capacity(rule.proxy.len());
            for name in &rule.proxy {
                match registry.get(name) {
                    Some(uplink) => uplinks.push(Arc::clone(uplink)),
                    None => warn!("Package rule '{}' proxies to unknown uplink '{}', ignoring it", source, name),
                }
            }

            if source == CATCH_ALL && catch_all.is_none() {
                catch_all = Some(rules.len());
            }
            rules.push(CompiledRule {
                source: source.clone(),
                pattern,
                rule: rule.clone(),
                uplinks,
            });
        }

        Ok(Self { rules, catch_all })
    }

    fn matching(&self, name: &str) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .find(|compiled| compiled.source != CATCH_ALL && compiled.pattern.matches_with(name, MATCH_OPTIONS))
            .or_else(|| self.catch_all.map(|index| &self.rules[index]))
    }

    /// Pattern and rule governing a package, if any
    pub fn rule_for(&self, name: &str) -> Option<(&str, &PackageRule)> {
        self.matching(name).map(|compiled| (compiled.source.as_str(), &compiled.rule))
    }

    /// Ordered uplinks eligible to serve a package.
    ///
    /// Empty when no rule matches or the matching rule proxies nowhere.
    pub fn resolve(&self, name: &str) -> Vec<Arc<dyn Uplink>> {
        match self.matching(name) {
            Some(compiled) => {
                debug!("Package {} matched rule '{}'", name, compiled.source);
                compiled.uplinks.clone()
            },
            None => {
                debug!("Package {} matched no rule", name);
                Vec::new()
            },
        }
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

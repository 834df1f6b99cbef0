use super::CompatibilityLevel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Free-form schema annotations: tags by JSON path, arbitrary properties,
/// and the names of properties whose values are sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sensitive: BTreeSet<String>,
}

impl Metadata {
    /// Merge `over` onto `base`. Maps union with `over` winning per key.
    pub fn merge(base: Option<&Metadata>, over: Option<&Metadata>) -> Option<Metadata> {
        match (base, over) {
            (None, None) => None,
            (Some(m), None) | (None, Some(m)) => Some(m.clone()),
            (Some(base), Some(over)) => {
                let mut out = base.clone();
                out.tags.extend(over.tags.clone());
                out.properties.extend(over.properties.clone());
                out.sensitive.extend(over.sensitive.iter().cloned());
                Some(out)
            }
        }
    }
}

/// A single data-contract rule attached to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub kind: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Rules attached to a schema, split by when they execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migration_rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_rules: Vec<Rule>,
}

impl RuleSet {
    /// Merge by rule name: `over` rules replace same-named `base` rules,
    /// and otherwise append.
    pub fn merge(base: Option<&RuleSet>, over: Option<&RuleSet>) -> Option<RuleSet> {
        fn merge_rules(base: &[Rule], over: &[Rule]) -> Vec<Rule> {
            let mut out: Vec<Rule> = base
                .iter()
                .filter(|b| !over.iter().any(|o| o.name == b.name))
                .cloned()
                .collect();
            out.extend(over.iter().cloned());
            out
        }

        match (base, over) {
            (None, None) => None,
            (Some(r), None) | (None, Some(r)) => Some(r.clone()),
            (Some(base), Some(over)) => Some(RuleSet {
                migration_rules: merge_rules(&base.migration_rules, &over.migration_rules),
                domain_rules: merge_rules(&base.domain_rules, &over.domain_rules),
            }),
        }
    }
}

/// Per-subject (or global) registry configuration.
///
/// A `Config` with no explicit compatibility level inherits the global
/// default at read time; the stored record keeps the field absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_level: Option<CompatibilityLevel>,
    /// Metadata property whose value partitions versions into independent
    /// compatibility groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rule_set: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_rule_set: Option<RuleSet>,
}

impl Config {
    pub fn with_level(level: CompatibilityLevel) -> Self {
        Self {
            compatibility_level: Some(level),
            ..Default::default()
        }
    }

    /// Field-wise update: non-null fields of `new` win over `old`.
    pub fn updated_with(&self, new: &Config) -> Config {
        Config {
            compatibility_level: new.compatibility_level.or(self.compatibility_level),
            compatibility_group: new
                .compatibility_group
                .clone()
                .or_else(|| self.compatibility_group.clone()),
            default_metadata: new
                .default_metadata
                .clone()
                .or_else(|| self.default_metadata.clone()),
            override_metadata: new
                .override_metadata
                .clone()
                .or_else(|| self.override_metadata.clone()),
            default_rule_set: new
                .default_rule_set
                .clone()
                .or_else(|| self.default_rule_set.clone()),
            override_rule_set: new
                .override_rule_set
                .clone()
                .or_else(|| self.override_rule_set.clone()),
        }
    }
}

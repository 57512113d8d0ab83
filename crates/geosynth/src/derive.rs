//! Rule-driven extraction of coded attributes from names and descriptions.
//!
//! Rules run in their configured order. A field keeps the first value any rule
//! assigns to it; later rules never overwrite it. A rule that does not match leaves
//! its fields unset, which is the normal case for most entities.
//!
//! Two rule families exist:
//! - `regex`: capture groups of a pattern become field values.
//! - `lookup`: a token (the whole text, or the first capture of `key_pattern`) is
//!   matched against a vocabulary; the first matching entry supplies a fixed tuple of
//!   field values.
//!
//! Texts are upper-cased and trimmed before matching.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::{Category, Classification, MatchMode};
use crate::error::{EngineError, Result};
use crate::tree::GeoEntity;

/// Which entity text a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Name,
    Description,
    /// The secondary class tag from classification.
    Class,
}

fn default_sources() -> Vec<TextSource> {
    vec![TextSource::Name]
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LookupEntry {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

/// Serialized form of a derivation rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationRuleSpec {
    Regex {
        name: String,
        /// Texts tried in order; the first one the pattern matches is used.
        #[serde(default = "default_sources")]
        sources: Vec<TextSource>,
        /// Categories the rule applies to; empty means all.
        #[serde(default)]
        applies_to: Vec<Category>,
        pattern: String,
        /// Field name to capture group index.
        fields: BTreeMap<String, usize>,
    },
    Lookup {
        name: String,
        #[serde(default = "default_sources")]
        sources: Vec<TextSource>,
        #[serde(default)]
        applies_to: Vec<Category>,
        #[serde(default)]
        key_pattern: Option<String>,
        mode: MatchMode,
        entries: Vec<LookupEntry>,
    },
}

/// Attributes derived for one entity, keyed by logical field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedAttributes(BTreeMap<String, String>);

impl DerivedAttributes {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set `field` unless an earlier rule already did. Returns whether it was set.
    fn offer(&mut self, field: &str, value: &str) -> bool {
        if self.0.contains_key(field) || value.is_empty() {
            return false;
        }
        self.0.insert(field.to_owned(), value.to_owned());
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex {
        pattern: Regex,
        fields: Vec<(String, usize)>,
    },
    Lookup {
        key_pattern: Option<Regex>,
        mode: MatchMode,
        entries: Vec<LookupEntry>,
    },
}

#[derive(Debug, Clone)]
struct DerivationRule {
    name: String,
    sources: Vec<TextSource>,
    applies_to: Vec<Category>,
    matcher: Matcher,
}

fn compile_pattern(rule: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| EngineError::Pattern {
        rule: rule.to_owned(),
        source,
    })
}

impl DerivationRule {
    fn compile(spec: &DerivationRuleSpec) -> Result<Self> {
        match spec {
            DerivationRuleSpec::Regex {
                name,
                sources,
                applies_to,
                pattern,
                fields,
            } => {
                let pattern = compile_pattern(name, pattern)?;
                for (field, &group) in fields {
                    if group == 0 || group >= pattern.captures_len() {
                        return Err(EngineError::Configuration(format!(
                            "rule '{name}': field '{field}' refers to missing capture group {group}"
                        )));
                    }
                }

                Ok(Self {
                    name: name.clone(),
                    sources: sources.clone(),
                    applies_to: applies_to.clone(),
                    matcher: Matcher::Regex {
                        pattern,
                        fields: fields.iter().map(|(f, &g)| (f.clone(), g)).collect(),
                    },
                })
            }
            DerivationRuleSpec::Lookup {
                name,
                sources,
                applies_to,
                key_pattern,
                mode,
                entries,
            } => {
                let key_pattern = key_pattern
                    .as_deref()
                    .map(|p| compile_pattern(name, p))
                    .transpose()?;

                let entries = entries
                    .iter()
                    .map(|e| LookupEntry {
                        key: e.key.trim().to_uppercase(),
                        fields: e.fields.clone(),
                    })
                    .collect();

                Ok(Self {
                    name: name.clone(),
                    sources: sources.clone(),
                    applies_to: applies_to.clone(),
                    matcher: Matcher::Lookup {
                        key_pattern,
                        mode: *mode,
                        entries,
                    },
                })
            }
        }
    }

    fn applies(&self, category: Category) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&category)
    }

    /// Apply to the first source text that matches.
    fn apply(&self, texts: &Texts<'_>, out: &mut DerivedAttributes) {
        for source in &self.sources {
            let text = texts.get(*source);
            if text.is_empty() {
                continue;
            }

            if self.apply_text(text, out) {
                log::trace!("rule '{}' matched {:?} text '{text}'", self.name, source);
                return;
            }
        }
    }

    fn apply_text(&self, text: &str, out: &mut DerivedAttributes) -> bool {
        match &self.matcher {
            Matcher::Regex { pattern, fields } => {
                let Some(caps) = pattern.captures(text) else {
                    return false;
                };

                for (field, group) in fields {
                    if let Some(m) = caps.get(*group) {
                        out.offer(field, m.as_str());
                    }
                }
                true
            }
            Matcher::Lookup {
                key_pattern,
                mode,
                entries,
            } => {
                let token = match key_pattern {
                    Some(re) => match re.captures(text).and_then(|c| c.get(1)) {
                        Some(m) => m.as_str().trim(),
                        None => return false,
                    },
                    None => text,
                };

                let hit = entries.iter().find(|e| match mode {
                    MatchMode::Exact => token == e.key,
                    MatchMode::Prefix => token.starts_with(&e.key),
                    MatchMode::Contains => token.contains(&e.key),
                });

                match hit {
                    Some(entry) => {
                        for (field, value) in &entry.fields {
                            out.offer(field, value);
                        }
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

struct Texts<'a> {
    name: String,
    description: String,
    class: &'a str,
}

impl Texts<'_> {
    fn get(&self, source: TextSource) -> &str {
        match source {
            TextSource::Name => &self.name,
            TextSource::Description => &self.description,
            TextSource::Class => self.class,
        }
    }
}

/// Compiled derivation rules.
#[derive(Debug, Clone, Default)]
pub struct AttributeEngine {
    rules: Vec<DerivationRule>,
}

impl AttributeEngine {
    pub fn new(specs: &[DerivationRuleSpec]) -> Result<Self> {
        let rules = specs
            .iter()
            .map(DerivationRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn derive(&self, entity: &GeoEntity, classification: &Classification) -> DerivedAttributes {
        self.derive_text(
            &entity.name,
            &entity.description,
            classification,
        )
    }

    /// Derive from raw texts.
    pub fn derive_text(
        &self,
        name: &str,
        description: &str,
        classification: &Classification,
    ) -> DerivedAttributes {
        let class = classification.class_str().trim().to_uppercase();
        let texts = Texts {
            name: name.trim().to_uppercase(),
            description: description.trim().to_uppercase(),
            class: &class,
        };

        let mut out = DerivedAttributes::default();
        for rule in self.rules.iter().filter(|r| r.applies(classification.category)) {
            rule.apply(&texts, &mut out);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn cable() -> Classification {
        Classification {
            category: Category::Cable,
            class: None,
        }
    }

    fn engine() -> AttributeEngine {
        AttributeEngine::new(&[
            DerivationRuleSpec::Regex {
                name: "fo tubes".into(),
                sources: default_sources(),
                applies_to: vec![Category::Cable],
                pattern: r"FO\s*(\d+)\s*/\s*(\d+)\s*T".into(),
                fields: [("core_count".to_string(), 1), ("tube_count".to_string(), 2)].into(),
            },
            DerivationRuleSpec::Lookup {
                name: "fo cores".into(),
                sources: default_sources(),
                applies_to: vec![Category::Cable],
                key_pattern: Some(r"FO\s*(\d+)".into()),
                mode: MatchMode::Exact,
                entries: vec![
                    LookupEntry {
                        key: "24".into(),
                        fields: fields(&[("tube_count", "2"), ("core_count", "24")]),
                    },
                    LookupEntry {
                        key: "48".into(),
                        fields: fields(&[("tube_count", "4"), ("core_count", "48")]),
                    },
                ],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_regex_wins_over_later_lookup() {
        let attrs = engine().derive_text("fo 24/3t - seg a", "", &cable());
        assert_eq!(attrs.get("tube_count"), Some("3"));
        assert_eq!(attrs.get("core_count"), Some("24"));
    }

    #[test]
    fn test_lookup_fills_when_regex_misses() {
        let attrs = engine().derive_text("FO 48 FEEDER", "", &cable());
        assert_eq!(attrs.get("tube_count"), Some("4"));
        assert_eq!(attrs.get("core_count"), Some("48"));
    }

    #[test]
    fn test_unmatched_leaves_fields_unset() {
        let attrs = engine().derive_text("DROP WIRE", "", &cable());
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_category_restriction() {
        let cabinet = Classification {
            category: Category::Cabinet,
            class: Some("FDT".into()),
        };
        assert!(engine().derive_text("FO 24/2T", "", &cabinet).is_empty());
    }

    #[test]
    fn test_sources_fall_through_to_description() {
        let engine = AttributeEngine::new(&[DerivationRuleSpec::Lookup {
            name: "fdt type".into(),
            sources: vec![TextSource::Name, TextSource::Description],
            applies_to: Vec::new(),
            key_pattern: None,
            mode: MatchMode::Prefix,
            entries: vec![LookupEntry {
                key: "FDT 72".into(),
                fields: fields(&[("equipment_type", "FDT TYPE 72 CORE")]),
            }],
        }])
        .unwrap();

        let attrs = engine.derive_text("CABINET X", "fdt 72 outdoor", &cable());
        assert_eq!(attrs.get("equipment_type"), Some("FDT TYPE 72 CORE"));
    }

    #[test]
    fn test_bad_capture_group_rejected() {
        let err = AttributeEngine::new(&[DerivationRuleSpec::Regex {
            name: "bad".into(),
            sources: default_sources(),
            applies_to: Vec::new(),
            pattern: r"AE(\d+)".into(),
            fields: [("ae".to_string(), 2)].into(),
        }]);
        assert!(matches!(err, Err(EngineError::Configuration(_))));
    }
}

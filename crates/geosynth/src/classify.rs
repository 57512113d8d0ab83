//! Ordered rule table mapping folder labels (and optionally names) to categories.
//!
//! Folder names are typed by field surveyors and drift between archives, so matching
//! is tolerant (prefix / substring) and strictly ordered: the first rule that matches
//! decides. Nothing matching yields [`Category::Unclassified`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::tree::GeoEntity;

/// Closed set of domain categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cabinet,
    AnchorNew,
    AnchorExisting,
    Cable,
    Boundary,
    Unclassified,
}

impl Category {
    pub fn is_anchor(self) -> bool {
        matches!(self, Category::AnchorNew | Category::AnchorExisting)
    }
}

/// Category plus secondary class tag (e.g. `FDT`, `7-4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Classification {
    pub category: Category,
    pub class: Option<String>,
}

impl Classification {
    pub fn unclassified() -> Self {
        Self {
            category: Category::Unclassified,
            class: None,
        }
    }

    pub fn class_str(&self) -> &str {
        self.class.as_deref().unwrap_or("")
    }
}

/// Which label a rule tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// The top-level folder, `folder_path[0]`.
    #[default]
    Folder,
    /// The placemark name, upper-cased.
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    Prefix,
    Contains,
}

/// Where the secondary class tag comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "from", content = "value", rename_all = "snake_case")]
pub enum ClassSource {
    #[default]
    None,
    /// A constant tag.
    Fixed(String),
    /// Text following the matched token, trimmed of blanks and separators.
    Suffix,
    /// First capture group of a pattern applied to the tested label.
    Pattern(String),
}

/// Serialized form of one classification rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClassRuleSpec {
    pub name: String,
    #[serde(default)]
    pub target: RuleTarget,
    pub mode: MatchMode,
    pub value: String,
    pub category: Category,
    #[serde(default)]
    pub class: ClassSource,
}

#[derive(Debug, Clone)]
enum CompiledClass {
    None,
    Fixed(String),
    Suffix,
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct ClassRule {
    name: String,
    target: RuleTarget,
    mode: MatchMode,
    value: String,
    category: Category,
    class: CompiledClass,
}

impl ClassRule {
    fn compile(spec: &ClassRuleSpec) -> Result<Self> {
        let value = spec.value.trim().to_uppercase();
        if value.is_empty() {
            return Err(EngineError::Configuration(format!(
                "classification rule '{}' has an empty match value",
                spec.name
            )));
        }

        let class = match &spec.class {
            ClassSource::None => CompiledClass::None,
            ClassSource::Fixed(tag) => CompiledClass::Fixed(tag.clone()),
            ClassSource::Suffix => CompiledClass::Suffix,
            ClassSource::Pattern(p) => {
                CompiledClass::Pattern(Regex::new(p).map_err(|source| EngineError::Pattern {
                    rule: spec.name.clone(),
                    source,
                })?)
            }
        };

        Ok(Self {
            name: spec.name.clone(),
            target: spec.target,
            mode: spec.mode,
            value,
            category: spec.category,
            class,
        })
    }

    /// Byte offset just past the matched token, if the rule matches.
    fn match_end(&self, label: &str) -> Option<usize> {
        match self.mode {
            MatchMode::Exact => (label == self.value).then_some(label.len()),
            MatchMode::Prefix => label.starts_with(&self.value).then_some(self.value.len()),
            MatchMode::Contains => label.find(&self.value).map(|at| at + self.value.len()),
        }
    }

    fn class_tag(&self, label: &str, end: usize) -> Option<String> {
        let tag = match &self.class {
            CompiledClass::None => return None,
            CompiledClass::Fixed(tag) => tag.clone(),
            CompiledClass::Suffix => label[end..]
                .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == ':')
                .to_owned(),
            CompiledClass::Pattern(re) => re
                .captures(label)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().split_whitespace().collect::<String>())
                .unwrap_or_default(),
        };

        (!tag.is_empty()).then_some(tag)
    }
}

/// Compiled, ordered classification rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassRule>,
}

impl Classifier {
    pub fn new(specs: &[ClassRuleSpec]) -> Result<Self> {
        let rules = specs.iter().map(ClassRule::compile).collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify an entity. Depends only on its folder path and name.
    pub fn classify(&self, entity: &GeoEntity) -> Classification {
        self.classify_labels(entity.category_hint(), &entity.name)
    }

    /// Classify from raw labels; both are normalized to trimmed upper case.
    pub fn classify_labels(&self, folder: &str, name: &str) -> Classification {
        let folder = folder.trim().to_uppercase();
        let name = name.trim().to_uppercase();

        for rule in &self.rules {
            let label = match rule.target {
                RuleTarget::Folder => folder.as_str(),
                RuleTarget::Name => name.as_str(),
            };

            if let Some(end) = rule.match_end(label) {
                log::trace!("'{label}' matched rule '{}'", rule.name);
                return Classification {
                    category: rule.category,
                    class: rule.class_tag(label, end),
                };
            }
        }

        Classification::unclassified()
    }
}

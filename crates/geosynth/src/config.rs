//! Engine configuration: rule tables, lookup vocabularies and output profiles.
//!
//! All of it is data. A default set is embedded from `rules/default.json`; callers
//! can load a replacement file at run time.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::ClassRuleSpec;
use crate::derive::DerivationRuleSpec;
use crate::error::{EngineError, Result};
use crate::geo::GeodesicMethod;
use crate::spatial::{DistanceMetric, MatcherKind};
use crate::synth::{FieldSource, SynthesisProfile};

const BUILTIN_RULES: &str = include_str!("../rules/default.json");

pub const DEFAULT_UNRESOLVED_MARKER: &str = "UNRESOLVED";

fn default_marker() -> String {
    DEFAULT_UNRESOLVED_MARKER.to_owned()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub kind: MatcherKind,
    #[serde(default)]
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub classification: Vec<ClassRuleSpec>,
    #[serde(default)]
    pub derivation: Vec<DerivationRuleSpec>,
    #[serde(default)]
    pub profiles: Vec<SynthesisProfile>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub length_method: GeodesicMethod,
    /// Written to anchor columns when no candidate exists.
    #[serde(default = "default_marker")]
    pub unresolved_marker: String,
}

impl EngineConfig {
    /// The embedded default rules.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_RULES)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        log::info!("loading rules from {}", path.display());
        Self::from_json_str(&json)
    }

    pub fn profile(&self, name: &str) -> Result<&SynthesisProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| EngineError::UnknownProfile(name.to_owned()))
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                return Err(EngineError::Configuration("profile with empty name".into()));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate profile '{}'",
                    profile.name
                )));
            }

            let wants_anchor = profile
                .columns
                .iter()
                .any(|c| c.value == FieldSource::NearestAnchor);
            if wants_anchor && profile.anchor.is_none() {
                return Err(EngineError::Configuration(format!(
                    "profile '{}' has an anchor column but no anchor filter",
                    profile.name
                )));
            }
        }

        Ok(())
    }
}

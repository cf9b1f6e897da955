//! Pipeline configuration.
//!
//! Everything here has a built-in default matching the PPMI downloads, so the config file is
//! optional. An example:
//!
//! ```toml
//! [events]
//! "Screening Visit" = "SC"
//! "Baseline Collection" = "BL"
//! "Visit 01" = "V01"
//!
//! [[entry_rules]]
//! test = "CSF Hemoglobin"
//! text = "below detection limit"
//! value = 0.0
//! ```
//!
//! A table given in the file replaces the default table wholesale.
use crate::{ArcStr, EventTable};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How visit labels in long-format files translate to visit codes.
    pub events: EventTable,
    /// Replacements for known non-numeric placeholders.
    pub entry_rules: Vec<EntryRule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            events: EventTable::ppmi(),
            entry_rules: EntryRule::ppmi(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<PipelineConfig> {
            let text = fs::read_to_string(path)?;
            PipelineConfig::from_toml(&text)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading configuration from \"{}\"", path.display()))
    }

    /// Load the config at `path`, or use the defaults if no path was given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        for rule in config.entry_rules.iter() {
            ensure!(
                rule.value.is_finite(),
                "replacement for \"{}\" in test \"{}\" must be a finite number",
                rule.text,
                rule.test
            );
        }
        Ok(config)
    }
}

/// Replace a piece of placeholder text in one test's column with a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRule {
    /// Canonical test name (the column in the wide table).
    pub test: ArcStr,
    /// The exact entry to replace, ignoring surrounding whitespace.
    pub text: ArcStr,
    pub value: f64,
}

impl EntryRule {
    pub fn new(test: impl Into<ArcStr>, text: impl Into<ArcStr>, value: f64) -> Self {
        Self {
            test: test.into(),
            text: text.into(),
            value,
        }
    }

    /// Placeholders found in the biospecimen analysis results.
    pub fn ppmi() -> Vec<Self> {
        vec![
            Self::new("CSF Hemoglobin", "below detection limit", 0.),
            Self::new("CSF Hemoglobin", ">12500 ng/ml", 12500.),
            Self::new("CSF Hemoglobin", ">12500ng/ml", 12500.),
        ]
    }

    pub fn matches(&self, test: &str, entry: &str) -> bool {
        *self.test == *test && *self.text == *entry.trim()
    }
}

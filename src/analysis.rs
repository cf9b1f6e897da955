//! Which cohorts and (visit, test) pairs an analysis uses.
//!
//! The analysis specification is a JSON file like
//!
//! ```json
//! {
//!   "employdata": {
//!     "cohort": ["HC", "PD"],
//!     "biomarkers": { "events": ["BL"], "tests": ["Abeta 42", "Total tau"] },
//!     "updrs3": { "events": ["BL", "V04"], "tests": ["Rigidity"] }
//!   }
//! }
//! ```
//!
//! Each dataset entry asks for every combination of its events and tests.
use crate::{ArcStr, CohortRequest, VisitCode};
use itertools::Itertools;
use qu::ick_use::*;
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, fs, path::Path};

#[derive(Debug, Deserialize)]
struct SpecFile {
    #[serde(rename = "employdata")]
    contents: SpecContents,
}

#[derive(Debug, Deserialize)]
struct SpecContents {
    #[serde(rename = "cohort", default)]
    cohorts: Vec<ArcStr>,
    #[serde(flatten)]
    datasets: BTreeMap<ArcStr, DatasetRequest>,
}

#[derive(Debug, Deserialize)]
struct DatasetRequest {
    #[serde(default)]
    events: Vec<ArcStr>,
    #[serde(default)]
    tests: Vec<ArcStr>,
}

/// One column of a selection table: a test at a visit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selection {
    pub visit: VisitCode,
    pub test: ArcStr,
}

impl Selection {
    pub fn new(visit: VisitCode, test: impl Into<ArcStr>) -> Self {
        Self {
            visit,
            test: test.into(),
        }
    }

    /// The column name, e.g. `Abeta 42 [BL]`.
    pub fn column_name(&self) -> String {
        format!("{} [{}]", self.test, self.visit)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.visit, self.test)
    }
}

/// A validated analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisSpec {
    pub cohorts: CohortRequest,
    /// No repeats, in the order first requested.
    pub selections: Vec<Selection>,
}

impl AnalysisSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<AnalysisSpec> {
            let text = fs::read_to_string(path)?;
            AnalysisSpec::from_str(&text)
        }
        let path = path.as_ref();
        inner(path)
            .with_context(|| format!("loading analysis specification \"{}\"", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let file: SpecFile = serde_json::from_str(text)?;
        let contents = file.contents;
        let cohorts = CohortRequest::parse(contents.cohorts.iter().map(|c| &**c))?;

        let mut pairs = vec![];
        for (name, dataset) in contents.datasets.iter() {
            for (event, test) in dataset.events.iter().cartesian_product(dataset.tests.iter()) {
                let visit = event
                    .parse::<VisitCode>()
                    .with_context(|| format!("in dataset \"{}\"", name))?;
                pairs.push(Selection::new(visit, test.clone()));
            }
        }
        let selections: Vec<Selection> = pairs.into_iter().unique().collect();
        ensure!(!selections.is_empty(), "no (visit, test) pairs requested");
        Ok(Self {
            cohorts,
            selections,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Cohort;

    #[test]
    fn cross_product() {
        let spec = AnalysisSpec::from_str(
            r#"{
                "employdata": {
                    "cohort": ["PD", "HC"],
                    "updrs3": { "events": ["BL", "V04"], "tests": ["Rigidity", "Tremor"] },
                    "biomarkers": { "events": ["BL"], "tests": ["Abeta 42", "Rigidity"] }
                }
            }"#,
        )
        .unwrap();
        assert!(spec.cohorts.contains(Cohort::Parkinsons));
        assert!(spec.cohorts.contains(Cohort::HealthyControl));
        let columns: Vec<String> = spec.selections.iter().map(Selection::column_name).collect();
        assert_eq!(
            columns,
            [
                "Abeta 42 [BL]",
                "Rigidity [BL]",
                "Tremor [BL]",
                "Rigidity [V04]",
                "Tremor [V04]",
            ]
        );
    }

    #[test]
    fn configuration_errors() {
        let no_cohort = r#"{"employdata": {"ds": {"events": ["BL"], "tests": ["A"]}}}"#;
        let err = AnalysisSpec::from_str(no_cohort).unwrap_err();
        assert!(err.to_string().contains("no cohorts"));

        let bad_cohort =
            r#"{"employdata": {"cohort": ["PD", "GENPD"], "ds": {"events": ["BL"], "tests": ["A"]}}}"#;
        let err = AnalysisSpec::from_str(bad_cohort).unwrap_err();
        assert!(err.to_string().contains("GENPD"));

        let bad_visit = r#"{"employdata": {"cohort": ["PD"], "ds": {"events": ["V99"], "tests": ["A"]}}}"#;
        assert!(AnalysisSpec::from_str(bad_visit).is_err());

        let nothing = r#"{"employdata": {"cohort": ["PD"]}}"#;
        assert!(AnalysisSpec::from_str(nothing).is_err());
    }
}

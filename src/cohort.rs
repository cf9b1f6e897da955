use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// The diagnostic group a subject was enrolled in.
///
/// Ordering is the order the cohorts are reported in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Cohort {
    #[serde(rename = "HC")]
    HealthyControl,
    #[serde(rename = "PD")]
    Parkinsons,
    /// Scans without evidence of dopaminergic deficit.
    #[serde(rename = "SWEDD")]
    Swedd,
}

impl Cohort {
    pub const ALL: [Cohort; 3] = [Cohort::HealthyControl, Cohort::Parkinsons, Cohort::Swedd];

    /// The code used in the `ENROLL_CAT` column and in analysis specifications.
    pub fn code(self) -> &'static str {
        match self {
            Cohort::HealthyControl => "HC",
            Cohort::Parkinsons => "PD",
            Cohort::Swedd => "SWEDD",
        }
    }

    /// A human-readable label for the cohort.
    pub fn label(self) -> &'static str {
        match self {
            Cohort::HealthyControl => "Healthy control",
            Cohort::Parkinsons => "Parkinson's disease",
            Cohort::Swedd => "Scan without evidence of dopaminergic deficit",
        }
    }
}

impl FromStr for Cohort {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.trim() {
            "HC" => Cohort::HealthyControl,
            "PD" => Cohort::Parkinsons,
            "SWEDD" => Cohort::Swedd,
            _ => bail!("unknown cohort \"{}\"", input),
        })
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The cohorts an analysis asks for. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRequest(BTreeSet<Cohort>);

impl CohortRequest {
    /// Validate a list of cohort codes.
    ///
    /// An empty list, or any code that isn't a known cohort, is a configuration error.
    pub fn parse<S: AsRef<str>>(codes: impl IntoIterator<Item = S>) -> Result<Self> {
        let cohorts = codes
            .into_iter()
            .map(|code| code.as_ref().parse::<Cohort>())
            .collect::<Result<BTreeSet<_>>>()?;
        Self::new(cohorts)
    }

    pub fn new(cohorts: impl IntoIterator<Item = Cohort>) -> Result<Self> {
        let cohorts: BTreeSet<_> = cohorts.into_iter().collect();
        ensure!(!cohorts.is_empty(), "no cohorts specified for analysis");
        Ok(Self(cohorts))
    }

    pub fn contains(&self, cohort: Cohort) -> bool {
        self.0.contains(&cohort)
    }

    pub fn iter(&self) -> impl Iterator<Item = Cohort> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for CohortRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = self.0.iter();
        if let Some(cohort) = parts.next() {
            write!(f, "{}", cohort)?;
        }
        for cohort in parts {
            write!(f, ", {}", cohort)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_request() {
        let req = CohortRequest::parse(["PD", "HC", "PD"]).unwrap();
        assert!(req.contains(Cohort::Parkinsons));
        assert!(req.contains(Cohort::HealthyControl));
        assert!(!req.contains(Cohort::Swedd));
        assert_eq!(req.to_string(), "HC, PD");
    }

    #[test]
    fn empty_request_is_an_error() {
        let err = CohortRequest::parse(Vec::<String>::new()).unwrap_err();
        assert!(err.to_string().contains("no cohorts"));
    }

    #[test]
    fn unknown_cohort_is_named() {
        let err = CohortRequest::parse(["HC", "PRODROMA"]).unwrap_err();
        assert!(err.to_string().contains("PRODROMA"));
    }
}

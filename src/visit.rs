//! Study visits ("events" in PPMI speak), and the translation from the free-text labels used by
//! the biospecimen files.
use crate::ArcStr;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A scheduled study timepoint.
///
/// The ordering is the study timeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum VisitCode {
    #[serde(rename = "SC")]
    Screening,
    #[serde(rename = "BL")]
    Baseline,
    V01,
    V02,
    V03,
    V04,
    V05,
    V06,
    V07,
    V08,
    V09,
    V10,
    V11,
    V12,
}

impl VisitCode {
    /// The whole study timeline, in order.
    pub const ALL: [VisitCode; 14] = [
        VisitCode::Screening,
        VisitCode::Baseline,
        VisitCode::V01,
        VisitCode::V02,
        VisitCode::V03,
        VisitCode::V04,
        VisitCode::V05,
        VisitCode::V06,
        VisitCode::V07,
        VisitCode::V08,
        VisitCode::V09,
        VisitCode::V10,
        VisitCode::V11,
        VisitCode::V12,
    ];

    /// The code used in the `EVENT_ID` column.
    pub fn code(self) -> &'static str {
        use VisitCode::*;
        match self {
            Screening => "SC",
            Baseline => "BL",
            V01 => "V01",
            V02 => "V02",
            V03 => "V03",
            V04 => "V04",
            V05 => "V05",
            V06 => "V06",
            V07 => "V07",
            V08 => "V08",
            V09 => "V09",
            V10 => "V10",
            V11 => "V11",
            V12 => "V12",
        }
    }
}

impl FromStr for VisitCode {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        VisitCode::ALL
            .into_iter()
            .find(|visit| visit.code() == input)
            .ok_or_else(|| format_err!("unrecognised visit code \"{}\"", input))
    }
}

impl fmt::Display for VisitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Translation from free-text visit labels to visit codes.
///
/// Labels without an entry are not part of the study timeline, and rows carrying them are
/// dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTable(BTreeMap<ArcStr, VisitCode>);

impl EventTable {
    /// The labels used in the PPMI biospecimen analysis files.
    ///
    /// Both "Visit 01" and "Visit 02" map to `V02`. This is how the data was prepared for all
    /// previous analyses, so it is kept here; supply a custom table to change it.
    pub fn ppmi() -> Self {
        use VisitCode::*;
        Self::from_iter([
            ("Screening Visit", Screening),
            ("Baseline Collection", Baseline),
            ("Visit 01", V02),
            ("Visit 02", V02),
            ("Visit 03", V03),
            ("Visit 04", V04),
            ("Visit 05", V05),
            ("Visit 06", V06),
            ("Visit 07", V07),
            ("Visit 08", V08),
            ("Visit 09", V09),
            ("Visit 10", V10),
            ("Visit 11", V11),
            ("Visit 12", V12),
        ])
    }

    /// Look up the visit code for a label, if it has one.
    pub fn translate(&self, label: &str) -> Option<VisitCode> {
        self.0.get(label.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, VisitCode)> + '_ {
        self.0.iter().map(|(label, visit)| (&**label, *visit))
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::ppmi()
    }
}

impl<L: Into<ArcStr>> FromIterator<(L, VisitCode)> for EventTable {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (L, VisitCode)>,
    {
        Self(
            iter.into_iter()
                .map(|(label, visit)| (label.into(), visit))
                .collect(),
        )
    }
}

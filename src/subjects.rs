//! The study subjects, read from the patient status file.
use crate::{load_orig, read_orig, util::optional_string, ArcStr, Cohort, SubjectId};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    ops::Deref,
    path::Path,
};

/// The enrollment status that makes a subject part of the study.
const ENROLLED: &str = "Enrolled";

#[derive(Debug, Clone, Deserialize)]
struct StatusRaw {
    #[serde(rename = "PATNO")]
    subject_id: SubjectId,
    #[serde(rename = "ENROLL_STATUS", deserialize_with = "optional_string", default)]
    status: Option<ArcStr>,
    #[serde(rename = "ENROLL_CAT", deserialize_with = "optional_string", default)]
    category: Option<ArcStr>,
}

/// An enrolled subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// `None` for enrollment categories outside HC/PD/SWEDD (e.g. genetic or prodromal
    /// cohorts). These subjects are in the cube but never match a cohort filter.
    pub cohort: Option<Cohort>,
}

/// All enrolled subjects, sorted by ID, with a pre-built index for the `id` field.
///
/// Built once per run and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Subject>", into = "Vec<Subject>")]
pub struct SubjectRegistry {
    els: Vec<Subject>,
    id_idx: BTreeMap<SubjectId, usize>,
}

impl SubjectRegistry {
    /// Load the registry from a PPMI `Patient_Status.csv` file.
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<StatusRaw> = load_orig(path)?;
        Ok(Self::from_status_rows(raw))
    }

    /// Like `load_orig`, but from any reader.
    pub fn read_orig(reader: impl io::Read) -> Result<Self> {
        let raw: Vec<StatusRaw> = read_orig(reader).context("reading subject status")?;
        Ok(Self::from_status_rows(raw))
    }

    fn from_status_rows(rows: Vec<StatusRaw>) -> Self {
        let mut subjects = BTreeMap::new();
        let mut uncategorised = BTreeSet::new();
        for row in rows {
            if row.status.as_deref() != Some(ENROLLED) {
                continue;
            }
            let cohort = match row.category.as_deref().map(str::parse::<Cohort>) {
                Some(Ok(cohort)) => Some(cohort),
                Some(Err(_)) | None => {
                    uncategorised.insert(row.category.clone());
                    None
                }
            };
            if subjects.insert(row.subject_id, cohort).is_some() {
                event!(
                    Level::WARN,
                    "subject {} is listed more than once, using the last entry",
                    row.subject_id
                );
            }
        }
        if !uncategorised.is_empty() {
            event!(
                Level::INFO,
                "enrollment categories outside HC/PD/SWEDD: {:?}",
                uncategorised
            );
        }
        Self::new(
            subjects
                .into_iter()
                .map(|(id, cohort)| Subject { id, cohort })
                .collect(),
        )
    }

    /// Position of the subject on the cube's subject axis.
    pub fn index_of(&self, id: SubjectId) -> Option<usize> {
        self.id_idx.get(&id).copied()
    }

    pub fn find_by_id(&self, id: SubjectId) -> Option<&Subject> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn contains(&self, id: SubjectId) -> bool {
        self.id_idx.contains_key(&id)
    }

    pub fn cohort_of(&self, id: SubjectId) -> Option<Cohort> {
        self.find_by_id(id)?.cohort
    }

    pub fn count_cohorts(&self) -> BTreeMap<Cohort, usize> {
        // B Tree so we get a predictable ordering.
        let mut map: BTreeMap<Cohort, usize> = Cohort::ALL.into_iter().map(|c| (c, 0)).collect();
        for cohort in self.els.iter().filter_map(|subject| subject.cohort) {
            *map.entry(cohort).or_insert(0) += 1;
        }
        map
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subject> + '_ {
        self.els.iter()
    }

    /// Subjects must be unique. They are sorted by ID here.
    fn new(mut els: Vec<Subject>) -> Self {
        els.sort_by_key(|subject| subject.id);
        let mut this = Self {
            els,
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.id, idx);
        }
    }
}

impl Deref for SubjectRegistry {
    type Target = [Subject];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl From<Vec<Subject>> for SubjectRegistry {
    fn from(from: Vec<Subject>) -> Self {
        Self::new(from)
    }
}

impl From<SubjectRegistry> for Vec<Subject> {
    fn from(from: SubjectRegistry) -> Self {
        from.els
    }
}

impl FromIterator<Subject> for SubjectRegistry {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Subject>,
    {
        Self::new(iter.into_iter().collect())
    }
}

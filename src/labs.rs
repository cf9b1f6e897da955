//! Biospecimen analysis results.
//!
//! Unlike the other PPMI downloads, these files have one row per test result, with free-text
//! visit labels, and tests that had to be re-run appear once per run. Preparing them for the
//! cube takes four steps:
//!
//! 1. [`LabRecords::discard_obsolete`] keeps only the latest run of each test.
//! 2. [`LabRecords::normalize_events`] translates visit labels to visit codes.
//! 3. [`WideTable::from_observations`] gives one row per subject visit, one column per test.
//! 4. [`WideTable::clean_entries`] replaces known placeholder text with numbers.
use crate::{
    create_output, load_orig, read_orig, util, ArcStr, EntryRule, EventTable, SubjectId,
    VisitCode,
};
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::Deserialize;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    ops::Deref,
    path::Path,
    sync::Arc,
};

#[derive(Debug, Clone, Deserialize)]
struct LabRecordRaw {
    #[serde(rename = "PATNO")]
    subject_id: Option<SubjectId>,
    #[serde(rename = "CLINICAL_EVENT")]
    clinical_event: ArcStr,
    #[serde(rename = "TYPE")]
    test_type: ArcStr,
    #[serde(rename = "TESTNAME")]
    test_name: ArcStr,
    #[serde(rename = "TESTVALUE")]
    test_value: ArcStr,
    #[serde(rename = "RUNDATE")]
    run_date: ArcStr,
}

/// A row in a biospecimen analysis results file.
///
/// Empty key fields are kept as they are: they still distinguish one group of runs from another.
#[derive(Debug, Clone, PartialEq)]
pub struct LabRecord {
    pub subject_id: Option<SubjectId>,
    /// Free-text visit label, e.g. "Baseline Collection".
    pub clinical_event: ArcStr,
    /// Specimen type, e.g. "Cerebrospinal fluid".
    pub test_type: ArcStr,
    pub test_name: ArcStr,
    /// As written in the file. Not necessarily a number.
    pub test_value: ArcStr,
    /// As written in the file.
    pub run_date_text: ArcStr,
    /// `None` if the run date was missing or in an unknown format.
    pub run_date: Option<NaiveDate>,
}

impl From<LabRecordRaw> for LabRecord {
    fn from(from: LabRecordRaw) -> Self {
        Self {
            subject_id: from.subject_id,
            clinical_event: from.clinical_event,
            test_type: from.test_type,
            test_name: from.test_name,
            test_value: from.test_value,
            run_date: util::parse_run_date(&from.run_date),
            run_date_text: from.run_date,
        }
    }
}

impl LabRecord {
    pub fn new(
        subject_id: SubjectId,
        clinical_event: &str,
        test_type: &str,
        test_name: &str,
        test_value: &str,
        run_date: &str,
    ) -> Self {
        Self {
            subject_id: Some(subject_id),
            clinical_event: clinical_event.into(),
            test_type: test_type.into(),
            test_name: test_name.into(),
            test_value: test_value.into(),
            run_date: util::parse_run_date(run_date),
            run_date_text: run_date.into(),
        }
    }

    /// Records with the same key are runs of the same test.
    pub fn group_key(&self) -> (Option<SubjectId>, &str, &str, &str) {
        (
            self.subject_id,
            &self.clinical_event,
            &self.test_type,
            &self.test_name,
        )
    }

    /// Order by key, then by run date.
    ///
    /// Parsed dates decide first. A run with no usable date counts as older than any dated run,
    /// and the raw text breaks any remaining tie.
    fn cmp_runs(&self, other: &Self) -> Ordering {
        self.group_key()
            .cmp(&other.group_key())
            .then_with(|| self.run_date.cmp(&other.run_date))
            .then_with(|| self.run_date_text.cmp(&other.run_date_text))
    }
}

/// A test result after deduplication and visit translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub subject_id: SubjectId,
    pub visit: VisitCode,
    pub test_name: ArcStr,
    /// `None` if the result was blank.
    pub value: Option<ArcStr>,
}

/// The parsed list of lab records.
#[derive(Debug, Clone)]
pub struct LabRecords {
    els: Arc<Vec<LabRecord>>,
}

impl LabRecords {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<LabRecordRaw> = load_orig(path.as_ref())?;
        let this = Self::from_raw(raw);
        this.warn_undated(&path.as_ref().display().to_string());
        Ok(this)
    }

    /// Like `load_orig`, but from any reader.
    pub fn read_orig(reader: impl io::Read) -> Result<Self> {
        let raw: Vec<LabRecordRaw> = read_orig(reader).context("reading lab records")?;
        let this = Self::from_raw(raw);
        this.warn_undated("input");
        Ok(this)
    }

    fn from_raw(raw: Vec<LabRecordRaw>) -> Self {
        raw.into_iter().map(LabRecord::from).collect()
    }

    fn warn_undated(&self, source: &str) {
        let undated = self.els.iter().filter(|rec| rec.run_date.is_none()).count();
        if undated > 0 {
            event!(
                Level::WARN,
                "{} of {} records in {} have no usable run date",
                undated,
                self.els.len(),
                source
            );
        }
    }

    /// Join several sets of records together.
    pub fn concat(sets: impl IntoIterator<Item = LabRecords>) -> Self {
        sets.into_iter()
            .flat_map(|set| set.iter().collect::<Vec<_>>())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = LabRecord> + '_ {
        self.els.iter().cloned()
    }

    /// Keep only the most recent run of each test.
    ///
    /// Records are sorted newest-first within their key, so the first record of each run of
    /// equal keys is the one to keep. The result is sorted ascending.
    pub fn discard_obsolete(&self) -> Self {
        let mut sorted: Vec<LabRecord> = self.els.to_vec();
        sorted.sort_by(|a, b| b.cmp_runs(a));

        let mut kept: Vec<LabRecord> = Vec::with_capacity(sorted.len());
        for rec in sorted {
            let is_newest = kept
                .last()
                .map_or(true, |last| last.group_key() != rec.group_key());
            if is_newest {
                kept.push(rec);
            }
        }
        kept.sort_by(|a, b| a.cmp_runs(b));

        event!(
            Level::INFO,
            "kept {} of {} records after discarding obsolete runs",
            kept.len(),
            self.els.len()
        );
        Self::new(kept)
    }

    /// Translate visit labels to visit codes.
    ///
    /// Records with a label that isn't in `events`, or with no subject number, are dropped.
    pub fn normalize_events(&self, events: &EventTable) -> Vec<Observation> {
        let mut unknown_labels = BTreeSet::new();
        let observations: Vec<Observation> = self
            .els
            .iter()
            .filter_map(|rec| {
                let subject_id = rec.subject_id?;
                let Some(visit) = events.translate(&rec.clinical_event) else {
                    unknown_labels.insert(rec.clinical_event.clone());
                    return None;
                };
                let value = if util::is_blank(&rec.test_value) {
                    None
                } else {
                    Some(rec.test_value.clone())
                };
                Some(Observation {
                    subject_id,
                    visit,
                    test_name: rec.test_name.clone(),
                    value,
                })
            })
            .collect();
        event!(
            Level::DEBUG,
            "dropped {} records, unrecognised visit labels: {:?}",
            self.els.len() - observations.len(),
            unknown_labels
        );
        observations
    }

    fn new(els: Vec<LabRecord>) -> Self {
        Self { els: Arc::new(els) }
    }
}

impl Deref for LabRecords {
    type Target = [LabRecord];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl FromIterator<LabRecord> for LabRecords {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = LabRecord>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// One row per (subject, visit), one column per test.
///
/// Columns are in the order tests are first seen. Rows are sorted by subject, then visit.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    tests: Vec<ArcStr>,
    rows: BTreeMap<(SubjectId, VisitCode), Vec<Option<ArcStr>>>,
}

impl WideTable {
    /// Build the table as a union over all tests, so a subject visit missing some test gets an
    /// empty cell for it rather than being dropped.
    ///
    /// There should be at most one observation per (subject, visit, test). Tests run on more
    /// than one specimen type can break this; the first observation wins and the rest are
    /// reported.
    pub fn from_observations(observations: &[Observation]) -> Self {
        let mut tests: Vec<ArcStr> = Vec::new();
        let mut test_idx: HashMap<ArcStr, usize> = HashMap::new();
        for obs in observations {
            if !test_idx.contains_key(&obs.test_name) {
                test_idx.insert(obs.test_name.clone(), tests.len());
                tests.push(obs.test_name.clone());
            }
        }

        let mut rows: BTreeMap<(SubjectId, VisitCode), Vec<Option<ArcStr>>> = BTreeMap::new();
        let mut filled = BTreeSet::new();
        for obs in observations {
            let col = test_idx[&obs.test_name];
            if !filled.insert((obs.subject_id, obs.visit, col)) {
                event!(
                    Level::WARN,
                    "subject {} has more than one \"{}\" result at {}, keeping the first",
                    obs.subject_id,
                    obs.test_name,
                    obs.visit
                );
                continue;
            }
            let row = rows
                .entry((obs.subject_id, obs.visit))
                .or_insert_with(|| vec![None; tests.len()]);
            row[col] = obs.value.clone();
        }
        Self { tests, rows }
    }

    pub fn tests(&self) -> &[ArcStr] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, subject_id: SubjectId, visit: VisitCode, test: &str) -> Option<&str> {
        let col = self.tests.iter().position(|t| **t == *test)?;
        self.rows.get(&(subject_id, visit))?[col].as_deref()
    }

    pub fn rows(&self) -> impl Iterator<Item = (SubjectId, VisitCode, &[Option<ArcStr>])> + '_ {
        self.rows
            .iter()
            .map(|((subject, visit), values)| (*subject, *visit, &values[..]))
    }

    /// Replace placeholder entries using `rules`. Returns how many entries were replaced.
    pub fn clean_entries(&mut self, rules: &[EntryRule]) -> usize {
        let mut replaced = 0;
        for (col, test) in self.tests.iter().enumerate() {
            let rules: Vec<&EntryRule> = rules.iter().filter(|r| r.test == *test).collect();
            if rules.is_empty() {
                continue;
            }
            for row in self.rows.values_mut() {
                let Some(entry) = &row[col] else {
                    continue;
                };
                if let Some(rule) = rules.iter().find(|rule| rule.matches(test, entry)) {
                    row[col] = Some(rule.value.to_string().into());
                    replaced += 1;
                }
            }
        }
        replaced
    }

    /// Write in the standard PPMI layout: `PATNO`, `EVENT_ID`, then one column per test.
    pub fn write_csv(&self, writer: impl io::Write) -> Result {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(
            ["PATNO", "EVENT_ID"]
                .into_iter()
                .chain(self.tests.iter().map(|t| &**t)),
        )?;
        for ((subject, visit), values) in self.rows.iter() {
            out.write_record(
                [subject.to_string(), visit.to_string()]
                    .into_iter()
                    .chain(values.iter().map(|v| v.as_deref().unwrap_or("").to_string())),
            )?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>, overwrite: bool) -> Result {
        let path = path.as_ref();
        let file = create_output(path, overwrite)?;
        self.write_csv(io::BufWriter::new(file))
            .with_context(|| format!("writing table to \"{}\"", path.display()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const RESULTS: &str = "\
PATNO,GENDER,DIAGNOSIS,CLINICAL_EVENT,TYPE,TESTNAME,TESTVALUE,UNITS,RUNDATE
3001,Male,PD,Baseline Collection,Cerebrospinal fluid,X,5,pg/ml,2012-01-10
3001,Male,PD,Baseline Collection,Cerebrospinal fluid,X,7,pg/ml,2013-03-02
3002,Female,Control,Baseline Collection,Cerebrospinal fluid,X,4,pg/ml,2012-01-10
3002,Female,Control,Visit 01,Cerebrospinal fluid,CSF Hemoglobin,below detection limit,ng/ml,2012-05-01
3002,Female,Control,Unscheduled Visit,Cerebrospinal fluid,X,9,pg/ml,2012-05-01
";

    fn records() -> LabRecords {
        LabRecords::read_orig(RESULTS.as_bytes()).unwrap()
    }

    #[test]
    fn latest_run_wins() {
        let records = records();
        assert_eq!(records.len(), 5);
        let clean = records.discard_obsolete();
        assert_eq!(clean.len(), 4);
        let runs: Vec<_> = clean
            .iter()
            .filter(|rec| rec.subject_id == Some(3001))
            .collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(&*runs[0].test_value, "7");
    }

    #[test]
    fn one_record_per_group() {
        let records: LabRecords = vec![
            LabRecord::new(1, "Visit 03", "Plasma", "A", "1", "2014-02-01"),
            LabRecord::new(1, "Visit 03", "Plasma", "A", "3", "2014-06-01"),
            LabRecord::new(1, "Visit 03", "Plasma", "A", "2", "2014-04-01"),
            LabRecord::new(1, "Visit 03", "Serum", "A", "8", "2014-01-01"),
            LabRecord::new(2, "Visit 03", "Plasma", "A", "6", "2013-01-01"),
        ]
        .into_iter()
        .collect();
        let clean = records.discard_obsolete();
        let values: Vec<_> = clean
            .iter()
            .map(|rec| (rec.subject_id, rec.test_type, rec.test_value))
            .map(|(id, ty, v)| (id, ty.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            values,
            [
                (Some(1), "Plasma".into(), "3".into()),
                (Some(1), "Serum".into(), "8".into()),
                (Some(2), "Plasma".into(), "6".into()),
            ]
        );
    }

    #[test]
    fn dated_runs_beat_undated_runs() {
        let records: LabRecords = vec![
            LabRecord::new(1, "Visit 03", "Plasma", "A", "1", "2014-02-01"),
            LabRecord::new(1, "Visit 03", "Plasma", "A", "2", "unknown"),
            LabRecord::new(1, "Visit 03", "Plasma", "A", "3", ""),
        ]
        .into_iter()
        .collect();
        let clean = records.discard_obsolete();
        assert_eq!(clean.len(), 1);
        assert_eq!(&*clean[0].test_value, "1");
    }

    #[test]
    fn missing_keys_still_group() {
        let input = "\
PATNO,CLINICAL_EVENT,TYPE,TESTNAME,TESTVALUE,RUNDATE
,Baseline Collection,,X,1,2012-01-01
,Baseline Collection,,X,2,2013-01-01
";
        let clean = LabRecords::read_orig(input.as_bytes())
            .unwrap()
            .discard_obsolete();
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].subject_id, None);
        assert_eq!(&*clean[0].test_value, "2");
        // no subject number means no observation
        assert!(clean.normalize_events(&EventTable::ppmi()).is_empty());
    }

    #[test]
    fn unknown_visits_are_dropped() {
        let obs = records().discard_obsolete().normalize_events(&EventTable::ppmi());
        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|o| VisitCode::ALL.contains(&o.visit)));
        let hb = obs
            .iter()
            .find(|o| &*o.test_name == "CSF Hemoglobin")
            .unwrap();
        assert_eq!(hb.visit, VisitCode::V02);
    }

    #[test]
    fn baseline_example() {
        let obs = records().discard_obsolete().normalize_events(&EventTable::ppmi());
        let table = WideTable::from_observations(&obs);
        assert_eq!(table.get(3001, VisitCode::Baseline, "X"), Some("7"));
        assert_eq!(
            table
                .rows()
                .filter(|(subject, _, _)| *subject == 3001)
                .count(),
            1
        );
    }

    #[test]
    fn outer_union_of_tests() {
        let obs = records().discard_obsolete().normalize_events(&EventTable::ppmi());
        let table = WideTable::from_observations(&obs);
        assert_eq!(table.len(), 3);
        let tests: Vec<&str> = table.tests().iter().map(|t| &**t).collect();
        assert_eq!(tests, ["X", "CSF Hemoglobin"]);
        // 3002 at V02 only had hemoglobin measured
        assert_eq!(table.get(3002, VisitCode::V02, "X"), None);
        assert_eq!(
            table.get(3002, VisitCode::V02, "CSF Hemoglobin"),
            Some("below detection limit")
        );
        assert_eq!(table.get(3002, VisitCode::Baseline, "X"), Some("4"));
    }

    #[test]
    fn duplicate_observations_keep_first() {
        let obs = vec![
            Observation {
                subject_id: 1,
                visit: VisitCode::Baseline,
                test_name: "A".into(),
                value: Some("1".into()),
            },
            Observation {
                subject_id: 1,
                visit: VisitCode::Baseline,
                test_name: "A".into(),
                value: Some("2".into()),
            },
        ];
        let table = WideTable::from_observations(&obs);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1, VisitCode::Baseline, "A"), Some("1"));
    }

    #[test]
    fn placeholder_entries() {
        let obs = records().discard_obsolete().normalize_events(&EventTable::ppmi());
        let mut table = WideTable::from_observations(&obs);
        assert_eq!(table.clean_entries(&EntryRule::ppmi()), 1);
        assert_eq!(table.get(3002, VisitCode::V02, "CSF Hemoglobin"), Some("0"));
        assert_eq!(table.clean_entries(&EntryRule::ppmi()), 0);
    }

    #[test]
    fn csv_layout() {
        let obs = records().discard_obsolete().normalize_events(&EventTable::ppmi());
        let table = WideTable::from_observations(&obs);
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "\
PATNO,EVENT_ID,X,CSF Hemoglobin
3001,BL,7,
3002,BL,4,
3002,V02,,below detection limit
"
        );
    }
}

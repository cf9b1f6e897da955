//! The three-axis (visit, subject, test) data cube.
//!
//! Source files follow the standard PPMI layout: a `PATNO` column, an `EVENT_ID` column, and one
//! column per test code. Every cell starts out [`Cell::NotObserved`]. Values for the same
//! canonical test are added together, so several source codes can feed one test.
//!
//! # Persisted format
//!
//! A cube file (extension `.bin`) is the 8 bytes `PPMICUBE`, a little-endian `u32` format
//! version, then the bincode encoding of [`DataCube`].
use crate::{
    create_bin, open_bin, util, SelectionSpec, Subject, SubjectId, SubjectRegistry,
    TestDirectory, VisitCode,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Read, Write},
    path::Path,
};
use term_data_table::{Cell as TableCell, Row, Table};

const MAGIC: &[u8; 8] = b"PPMICUBE";
const FORMAT_VERSION: u32 = 1;

/// The contents of a cube cell.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Cell {
    /// No source file had a value here.
    #[default]
    NotObserved,
    Valid(f64),
    /// At least one value for this cell wasn't a number. Stays invalid.
    Invalid,
}

/// What happened when a raw value was added to a cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Accumulated {
    /// The cell had no value and now has this one.
    Initialized(f64),
    /// This value was added to the cell.
    Added(f64),
    /// The raw value was blank, so the cell wasn't touched.
    Blank,
    /// The raw value wasn't a number.
    MarkedInvalid,
    /// The cell was already invalid.
    Ignored,
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Valid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_observed(&self) -> bool {
        !matches!(self, Cell::NotObserved)
    }

    /// Add a raw value from a source file to this cell.
    ///
    /// Non-numeric text marks the cell invalid, which is not an error. An error here means the
    /// aggregation itself went wrong.
    pub fn accumulate(&mut self, raw: &str) -> Result<Accumulated> {
        if matches!(self, Cell::Invalid) {
            return Ok(Accumulated::Ignored);
        }
        if util::is_blank(raw) {
            return Ok(Accumulated::Blank);
        }
        let Some(value) = util::parse_number(raw) else {
            *self = Cell::Invalid;
            return Ok(Accumulated::MarkedInvalid);
        };
        // a cell seen for the first time starts from zero
        let (sum, outcome) = match self {
            Cell::Valid(prev) => (*prev + value, Accumulated::Added(value)),
            _ => (0. + value, Accumulated::Initialized(value)),
        };
        ensure!(
            sum.is_finite(),
            "adding {} to {:?} does not give a finite number",
            value,
            self
        );
        *self = Cell::Valid(sum);
        Ok(outcome)
    }
}

/// Counts of cell states.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CellCounts {
    pub valid: usize,
    pub invalid: usize,
    pub not_observed: usize,
}

impl CellCounts {
    fn add(&mut self, cell: &Cell) {
        match cell {
            Cell::NotObserved => self.not_observed += 1,
            Cell::Valid(_) => self.valid += 1,
            Cell::Invalid => self.invalid += 1,
        }
    }
}

/// A dense (visit, subject, test) array of cells.
///
/// The axes are fixed when the cube is created. Cells are stored visit-major, then subject, then
/// test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCube {
    subjects: SubjectRegistry,
    visits: Vec<VisitCode>,
    directory: TestDirectory,
    cells: Vec<Cell>,
}

impl DataCube {
    /// An empty cube over the given axes.
    pub fn new(
        subjects: SubjectRegistry,
        visits: Vec<VisitCode>,
        directory: TestDirectory,
    ) -> Result<Self> {
        ensure!(!subjects.is_empty(), "the cube needs at least one subject");
        ensure!(!visits.is_empty(), "the cube needs at least one visit");
        ensure!(!directory.is_empty(), "the cube needs at least one test");
        for (i, visit) in visits.iter().enumerate() {
            ensure!(
                !visits[..i].contains(visit),
                "visit {} is listed more than once",
                visit
            );
        }
        let len = visits.len() * subjects.len() * directory.len();
        Ok(Self {
            subjects,
            visits,
            directory,
            cells: vec![Cell::NotObserved; len],
        })
    }

    pub fn subjects(&self) -> &SubjectRegistry {
        &self.subjects
    }

    pub fn visits(&self) -> &[VisitCode] {
        &self.visits
    }

    pub fn directory(&self) -> &TestDirectory {
        &self.directory
    }

    pub fn visit_index(&self, visit: VisitCode) -> Option<usize> {
        self.visits.iter().position(|v| *v == visit)
    }

    fn offset(&self, visit_idx: usize, subject_idx: usize, test_idx: usize) -> Result<usize> {
        let (n_subjects, n_tests) = (self.subjects.len(), self.directory.len());
        ensure!(
            visit_idx < self.visits.len() && subject_idx < n_subjects && test_idx < n_tests,
            "cube index ({}, {}, {}) out of bounds ({}, {}, {})",
            visit_idx,
            subject_idx,
            test_idx,
            self.visits.len(),
            n_subjects,
            n_tests
        );
        Ok((visit_idx * n_subjects + subject_idx) * n_tests + test_idx)
    }

    /// The cell at the given axis positions, if they are in bounds.
    pub fn cell_at(&self, visit_idx: usize, subject_idx: usize, test_idx: usize) -> Option<&Cell> {
        let offset = self.offset(visit_idx, subject_idx, test_idx).ok()?;
        self.cells.get(offset)
    }

    /// Add a raw value to a cell, returning the cell's offset and what happened.
    fn accumulate_at(
        &mut self,
        visit_idx: usize,
        subject_idx: usize,
        test_idx: usize,
        raw: &str,
    ) -> Result<(usize, Accumulated)> {
        let offset = self.offset(visit_idx, subject_idx, test_idx)?;
        let outcome = self.cells[offset].accumulate(raw)?;
        Ok((offset, outcome))
    }

    /// Look up a cell by visit, subject number, and canonical test name.
    pub fn cell(&self, visit: VisitCode, subject: SubjectId, test: &str) -> Option<Cell> {
        self.cell_at(
            self.visit_index(visit)?,
            self.subjects.index_of(subject)?,
            self.directory.test_index(test)?,
        )
        .copied()
    }

    /// Every subject's cell for one visit and test, in subject order.
    ///
    /// `None` if the cube doesn't hold the visit or the test.
    pub fn column(
        &self,
        visit: VisitCode,
        test: &str,
    ) -> Option<impl Iterator<Item = (&Subject, Cell)> + '_> {
        let visit_idx = self.visit_index(visit)?;
        let test_idx = self.directory.test_index(test)?;
        let n_tests = self.directory.len();
        let start = visit_idx * self.subjects.len() * n_tests + test_idx;
        Some(
            self.subjects
                .iter()
                .zip(self.cells[start..].iter().step_by(n_tests).copied()),
        )
    }

    pub fn counts(&self) -> CellCounts {
        let mut counts = CellCounts::default();
        for cell in self.cells.iter() {
            counts.add(cell);
        }
        counts
    }

    /// Cell counts for each test, across all visits and subjects.
    pub fn coverage(&self) -> Vec<(&str, CellCounts)> {
        let n_tests = self.directory.len();
        let mut counts = vec![CellCounts::default(); n_tests];
        for (i, cell) in self.cells.iter().enumerate() {
            counts[i % n_tests].add(cell);
        }
        self.directory
            .tests()
            .iter()
            .map(|t| &**t)
            .zip(counts)
            .collect()
    }

    pub fn term_table(&self) -> Table {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(TableCell::from("Test"))
                .with_cell(TableCell::from("Values"))
                .with_cell(TableCell::from("Invalid"))
                .with_cell(TableCell::from("Not observed")),
        );
        for (test, counts) in self.coverage() {
            table.add_row(
                Row::new()
                    .with_cell(TableCell::from(test.to_string()))
                    .with_cell(TableCell::from(counts.valid.to_string()))
                    .with_cell(TableCell::from(counts.invalid.to_string()))
                    .with_cell(TableCell::from(counts.not_observed.to_string())),
            );
        }
        table
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = open_bin(path)?;
        Self::read_from(reader)
            .with_context(|| format!("unable to load data from \"{}\"", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        let mut writer = create_bin(path)?;
        self.write_to(&mut writer)
            .and_then(|()| Ok(writer.flush()?))
            .with_context(|| format!("unable to save data to \"{}\"", path.display()))
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read_from(mut reader: impl Read) -> Result<Self> {
        let mut magic = [0; 8];
        reader
            .read_exact(&mut magic)
            .context("file too short for a cube header")?;
        ensure!(&magic == MAGIC, "not a data cube file");
        let mut version = [0; 4];
        reader
            .read_exact(&mut version)
            .context("file too short for a cube header")?;
        let version = u32::from_le_bytes(version);
        ensure!(
            version == FORMAT_VERSION,
            "unsupported cube format version {} (expected {})",
            version,
            FORMAT_VERSION
        );
        let cube: DataCube = bincode::deserialize_from(reader)?;
        let expected = cube.visits.len() * cube.subjects.len() * cube.directory.len();
        ensure!(
            cube.cells.len() == expected,
            "cube has {} cells but its axes need {}",
            cube.cells.len(),
            expected
        );
        Ok(cube)
    }
}

/// What happened while reading one source file.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Data rows in the file.
    pub rows: usize,
    /// Rows for a subject or visit that isn't in the cube.
    pub skipped_rows: usize,
    /// Numbers added to the cube.
    pub values: usize,
    /// Cells newly marked invalid.
    pub invalid_cells: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.rows += other.rows;
        self.skipped_rows += other.skipped_rows;
        self.values += other.values;
        self.invalid_cells += other.invalid_cells;
    }
}

/// Fills a cube one source file at a time.
///
/// Cells hold running sums while files are being read. [`CubeBuilder::finish`] recomputes each
/// sum from its values in sorted order, so the finished cube doesn't depend on the order files
/// or columns were read in.
pub struct CubeBuilder {
    cube: DataCube,
    /// Every value added to a cell, by cell offset.
    contributions: BTreeMap<usize, Vec<f64>>,
}

impl CubeBuilder {
    /// Start an empty cube covering the whole study timeline.
    pub fn new(subjects: SubjectRegistry, directory: TestDirectory) -> Result<Self> {
        Ok(Self {
            cube: DataCube::new(subjects, VisitCode::ALL.to_vec(), directory)?,
            contributions: BTreeMap::new(),
        })
    }

    /// Build a cube from every file in a selection specification.
    pub fn build(subjects: SubjectRegistry, spec: &SelectionSpec) -> Result<DataCube> {
        let mut builder = Self::new(subjects, spec.test_directory()?)?;
        let mut total = IngestReport::default();
        for file in spec.files() {
            total.merge(builder.ingest_file(&file)?);
        }
        event!(
            Level::INFO,
            "read {} rows in total ({} skipped), {} values, {} invalid cells",
            total.rows,
            total.skipped_rows,
            total.values,
            total.invalid_cells
        );
        builder.finish()
    }

    pub fn ingest_file(&mut self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref();
        let file =
            fs::File::open(path).with_context(|| format!("while opening \"{}\"", path.display()))?;
        self.ingest_reader(&path.display().to_string(), io::BufReader::new(file))
            .with_context(|| format!("while loading \"{}\"", path.display()))
    }

    /// Add the values in a source file to the cube. `source` names the file in diagnostics.
    pub fn ingest_reader(&mut self, source: &str, reader: impl Read) -> Result<IngestReport> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let subject_col = headers
            .iter()
            .position(|h| h == "PATNO")
            .ok_or_else(|| format_err!("no PATNO column"))?;
        let visit_col = headers
            .iter()
            .position(|h| h == "EVENT_ID")
            .ok_or_else(|| format_err!("no EVENT_ID column"))?;
        // (column, test index) for the columns we are interested in
        let columns: Vec<(usize, usize)> = headers
            .iter()
            .enumerate()
            .filter_map(|(col, code)| Some((col, self.cube.directory.resolve(code)?)))
            .collect();
        if columns.is_empty() {
            event!(Level::WARN, "no selected test columns in {}", source);
        }

        let mut report = IngestReport::default();
        for record in reader.records() {
            let record = record?;
            report.rows += 1;

            let subject = record
                .get(subject_col)
                .and_then(|s| s.parse::<SubjectId>().ok());
            let visit = record
                .get(visit_col)
                .and_then(|s| s.parse::<VisitCode>().ok());
            let (Some(subject), Some(visit)) = (subject, visit) else {
                report.skipped_rows += 1;
                continue;
            };
            let (Some(subject_idx), Some(visit_idx)) =
                (self.cube.subjects.index_of(subject), self.cube.visit_index(visit))
            else {
                report.skipped_rows += 1;
                continue;
            };

            for (col, test_idx) in columns.iter().copied() {
                let raw = record.get(col).unwrap_or("");
                match self.cube.accumulate_at(visit_idx, subject_idx, test_idx, raw) {
                    Ok((offset, Accumulated::Initialized(value) | Accumulated::Added(value))) => {
                        report.values += 1;
                        self.contributions.entry(offset).or_default().push(value);
                    }
                    Ok((offset, Accumulated::MarkedInvalid)) => {
                        self.contributions.remove(&offset);
                        report.invalid_cells += 1;
                        event!(
                            Level::WARN,
                            "non-numerical data \"{}\" in {}: subject {}, test {}, visit {}",
                            raw,
                            source,
                            subject,
                            self.cube.directory.tests()[test_idx],
                            visit
                        );
                    }
                    Ok((_, Accumulated::Blank | Accumulated::Ignored)) => (),
                    Err(e) => {
                        event!(
                            Level::ERROR,
                            "unexpected error adding \"{}\" in {}: subject {}, column {}, visit {}",
                            raw,
                            source,
                            subject,
                            &headers[col],
                            visit
                        );
                        return Err(e);
                    }
                }
            }
        }
        event!(
            Level::DEBUG,
            "skipped {} rows with unknown subject or visit in {}",
            report.skipped_rows,
            source
        );
        event!(Level::INFO, "read {} entries in database {}", report.rows, source);
        Ok(report)
    }

    /// Sum each cell's values smallest first.
    pub fn finish(mut self) -> Result<DataCube> {
        for (offset, mut values) in self.contributions {
            if !matches!(self.cube.cells[offset], Cell::Valid(_)) {
                continue;
            }
            values.sort_by(f64::total_cmp);
            let sum: f64 = values.iter().sum();
            ensure!(
                sum.is_finite(),
                "values {:?} do not add up to a finite number",
                values
            );
            self.cube.cells[offset] = Cell::Valid(sum);
        }
        Ok(self.cube)
    }
}

//! Ingest PPMI study data into a three-axis (visit, subject, test) data cube, and slice it into
//! cohort tables for analysis.
//!
//! The pipeline runs in three steps, each with its own binary:
//!
//! 1. `prepare_biomarkers` cleans the long-format biospecimen results into the standard
//!    one-row-per-visit layout (see [`labs`]).
//! 2. `build_cube` reads every file named in a selection specification into a [`DataCube`] and
//!    persists it.
//! 3. `cohort_stats` slices the persisted cube by cohort and (visit, test) pairs, and reports
//!    summary statistics.
pub mod analysis;
pub mod cohort;
pub mod config;
pub mod cube;
pub mod labs;
pub mod selection;
pub mod stats;
pub mod subjects;
pub mod table;
mod util;
pub mod visit;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::de::DeserializeOwned;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    analysis::{AnalysisSpec, Selection},
    cohort::{Cohort, CohortRequest},
    config::{EntryRule, PipelineConfig},
    cube::{Cell, CubeBuilder, DataCube, IngestReport},
    labs::{LabRecord, LabRecords, Observation, WideTable},
    selection::{SelectionSpec, TestDirectory},
    stats::{ColumnStats, SummaryStats},
    subjects::{Subject, SubjectRegistry},
    table::{DataCounts, SelectionTable, TableRow},
    util::header,
    visit::{EventTable, VisitCode},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
/// The PPMI subject number (`PATNO`).
pub type SubjectId = u64;

/// Open a bincode file for reading.
fn open_bin(path: &Path) -> Result<io::BufReader<fs::File>> {
    check_extension(path, "bin")?;
    let file = fs::File::open(path)
        .with_context(|| format!("unable to load data from \"{}\"", path.display()))?;
    Ok(io::BufReader::new(file))
}

/// Create a bincode file for writing, warning if something is already there.
fn create_bin(path: &Path) -> Result<io::BufWriter<fs::File>> {
    fn inner(path: &Path) -> Result<io::BufWriter<fs::File>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        // it seems File::options().create_new(true) doesn't work on the server, so fall back to
        // checking for existence.
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        Ok(io::BufWriter::new(fs::File::create(path)?))
    }
    check_extension(path, "bin")?;
    inner(path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Create a text output file, refusing to replace an existing one unless `overwrite` is set.
fn create_output(path: &Path, overwrite: bool) -> Result<fs::File> {
    fn inner(path: &Path, overwrite: bool) -> Result<fs::File> {
        ensure!(
            overwrite || !util::path_exists(path)?,
            "file already exists"
        );
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        Ok(fs::File::create(path)?)
    }
    inner(path, overwrite).with_context(|| format!("unable to write \"{}\"", path.display()))
}

/// Load typed rows from a CSV extract with a header row.
fn load_orig<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let reader =
        fs::File::open(path).with_context(|| format!("while opening \"{}\"", path.display()))?;
    read_orig(reader).with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Like `load_orig`, but from any reader.
fn read_orig<T: DeserializeOwned>(reader: impl io::Read) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(Into::into)
}

/// Resolve `path` against `base` if it is relative.
fn resolve_path(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_owned(),
    }
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extensions() {
        assert!(check_extension(Path::new("cube.bin"), "bin").is_ok());
        assert!(check_extension(Path::new("cube.pkl"), "bin").is_err());
        assert!(check_extension(Path::new("cube"), "bin").is_err());
    }

    #[test]
    fn relative_paths() {
        let base = Path::new("/data/spec");
        assert_eq!(
            resolve_path(Some(base), Path::new("bio.csv")),
            PathBuf::from("/data/spec/bio.csv")
        );
        assert_eq!(
            resolve_path(Some(base), Path::new("/abs/bio.csv")),
            PathBuf::from("/abs/bio.csv")
        );
        assert_eq!(
            resolve_path(None, Path::new("bio.csv")),
            PathBuf::from("bio.csv")
        );
    }
}

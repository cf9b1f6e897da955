//! Slice a saved cube by cohort and (visit, test), and report summary statistics.
use clap::Parser;
use ppmi_cube::{header, AnalysisSpec, DataCube, SelectionTable, SummaryStats};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Analysis specification (JSON).
    analysis: PathBuf,
    /// The cube saved by `build_cube`.
    #[clap(long, short, default_value = "ppmi_cube.bin")]
    cube: PathBuf,
    /// Write the selected data to this CSV file.
    #[clap(long)]
    table_out: Option<PathBuf>,
    /// Write the normalized data to this CSV file.
    #[clap(long)]
    normalized_out: Option<PathBuf>,
    /// Write the summary statistics to this JSON file.
    #[clap(long)]
    stats_out: Option<PathBuf>,
    /// Normalize with statistics from this JSON file instead of from the selected data.
    #[clap(long)]
    stats_in: Option<PathBuf>,
    /// If set, allow overwriting existing output files
    #[clap(long)]
    overwrite: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let cube = DataCube::load(&opt.cube)?;
    let spec = AnalysisSpec::load(&opt.analysis)?;
    let table = SelectionTable::from_analysis(&cube, &spec)?;

    header("Selection");
    println!("cohorts: {}", spec.cohorts);
    println!("columns: {}", table.columns.len());
    println!("{}", table.data_count().term_table());

    let stats = SummaryStats::compute(&table);
    header("Statistics");
    println!("{}", stats.term_table());

    if let Some(path) = &opt.table_out {
        table.save_csv(path, opt.overwrite)?;
    }
    if let Some(path) = &opt.stats_out {
        stats.save_json(path, opt.overwrite)?;
    }
    if let Some(path) = &opt.normalized_out {
        let normalized = match &opt.stats_in {
            Some(stats_path) => SummaryStats::load_json(stats_path)?.normalize(&table)?,
            None => stats.normalize(&table)?,
        };
        normalized.save_csv(path, opt.overwrite)?;
    }
    Ok(())
}

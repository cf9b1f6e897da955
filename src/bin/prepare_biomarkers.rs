//! Convert biospecimen analysis results into the standard PPMI layout.
use clap::Parser;
use ppmi_cube::{header, LabRecords, PipelineConfig, WideTable};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Biospecimen analysis result files. Their records are combined before cleaning.
    #[clap(required = true)]
    inputs: Vec<PathBuf>,
    /// Where to write the cleaned table.
    #[clap(long, short)]
    output: PathBuf,
    /// Visit label and entry cleaning tables (TOML). Defaults to the PPMI tables.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// If set, allow overwriting an existing file at the output location
    #[clap(long)]
    overwrite: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = PipelineConfig::load_or_default(opt.config.as_deref())?;
    let records = LabRecords::concat(
        opt.inputs
            .iter()
            .map(LabRecords::load_orig)
            .collect::<Result<Vec<_>>>()?,
    );

    header("Records");
    println!("total records: {}", records.len());
    let records = records.discard_obsolete();
    println!("after discarding obsolete runs: {}", records.len());
    let observations = records.normalize_events(&config.events);
    println!("at recognised visits: {}", observations.len());

    let mut table = WideTable::from_observations(&observations);
    let replaced = table.clean_entries(&config.entry_rules);

    header("Output");
    println!("subject visits: {}", table.len());
    println!("tests: {}", table.tests().len());
    println!("placeholder entries replaced: {}", replaced);

    table.save_csv(&opt.output, opt.overwrite)?;
    println!("written to {}", opt.output.display());
    Ok(())
}

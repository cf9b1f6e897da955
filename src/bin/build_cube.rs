//! Read every file in a selection specification into a data cube, and save it.
use clap::Parser;
use ppmi_cube::{header, CubeBuilder, SelectionSpec, SubjectRegistry};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// The PPMI patient status file.
    #[clap(long, short)]
    status: PathBuf,
    /// Selection specification (JSON).
    #[clap(long, short = 'e')]
    selection: PathBuf,
    /// Where to save the cube. Must end in `.bin`.
    #[clap(long, short, default_value = "ppmi_cube.bin")]
    output: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let subjects = SubjectRegistry::load_orig(&opt.status)?;
    let spec = SelectionSpec::load(&opt.selection)?;

    header("Subjects");
    println!("enrolled subjects: {}", subjects.len());
    for (cohort, count) in subjects.count_cohorts() {
        println!("{}: {}", cohort.label(), count);
    }

    let cube = CubeBuilder::build(subjects, &spec)?;

    header("Coverage");
    let counts = cube.counts();
    println!(
        "values: {}, invalid: {}, not observed: {}",
        counts.valid, counts.invalid, counts.not_observed
    );
    println!("{}", cube.term_table());

    cube.save(&opt.output)?;
    println!("saved to {}", opt.output.display());
    Ok(())
}

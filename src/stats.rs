//! Per-column summary statistics and z-score normalization.
use crate::{create_output, Cohort, SelectionTable};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::{collections::BTreeMap, io, path::Path};
use term_data_table::{Cell as TableCell, Row, Table};

/// Statistics for one column of a selection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    /// `None` if the column was empty.
    pub mean: Option<f64>,
    /// Sample standard deviation. `None` with fewer than two values.
    pub std_dev: Option<f64>,
    /// Only cohorts present in the table have an entry.
    pub cohort_means: BTreeMap<Cohort, f64>,
}

impl ColumnStats {
    fn compute(column: String, values: Vec<f64>) -> Self {
        let count = values.len();
        let data = Data::new(values);
        Self {
            column,
            count,
            mean: data.mean().filter(|v| v.is_finite()),
            std_dev: data.std_dev().filter(|v| v.is_finite()),
            cohort_means: BTreeMap::new(),
        }
    }

    pub fn cohort_mean(&self, cohort: Cohort) -> Option<f64> {
        self.cohort_means.get(&cohort).copied()
    }

    /// The z-score of `value`.
    fn z_score(&self, value: f64) -> Result<f64> {
        let (Some(mean), Some(std_dev)) = (self.mean, self.std_dev) else {
            bail!("no mean and standard deviation for \"{}\"", self.column);
        };
        ensure!(
            std_dev > 0.,
            "standard deviation of \"{}\" is zero",
            self.column
        );
        Ok((value - mean) / std_dev)
    }
}

/// Global mean, standard deviation, and cohort means for each column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    columns: Vec<ColumnStats>,
}

impl SummaryStats {
    pub fn compute(table: &SelectionTable) -> Self {
        let present = table.data_count().present_cohorts();
        let columns = table
            .column_names()
            .enumerate()
            .map(|(idx, name)| {
                let mut stats = ColumnStats::compute(name, table.column(idx).collect());
                for cohort in present.iter().copied() {
                    let values: Vec<f64> = table.cohort_column(idx, cohort).collect();
                    if let Some(mean) = Data::new(values).mean().filter(|v| v.is_finite()) {
                        stats.cohort_means.insert(cohort, mean);
                    }
                }
                stats
            })
            .collect();
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|stats| stats.column == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnStats> + '_ {
        self.columns.iter()
    }

    /// Express every value in `table` as standard deviations from its column mean.
    ///
    /// The statistics are used as they are, so `table` doesn't have to be the table they were
    /// computed from. Every column needs statistics with a non-zero standard deviation.
    pub fn normalize(&self, table: &SelectionTable) -> Result<SelectionTable> {
        let stats = table
            .column_names()
            .map(|name| {
                self.get(&name)
                    .ok_or_else(|| format_err!("no statistics for column \"{}\"", name))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut out = table.clone();
        for row in out.rows.iter_mut() {
            for (value, stats) in row.values.iter_mut().zip(stats.iter()) {
                *value = stats.z_score(*value)?;
            }
        }
        // also catches columns with bad statistics in an empty table
        for stats in stats {
            stats.z_score(0.)?;
        }
        Ok(out)
    }

    /// Rows are statistics, columns are table columns. Missing statistics show as `n/a`.
    pub fn term_table(&self) -> Table {
        fn show(value: Option<f64>) -> TableCell<'static> {
            match value {
                Some(v) => TableCell::from(format!("{:.4}", v)),
                None => TableCell::from("n/a"),
            }
        }

        let mut header = Row::new().with_cell(TableCell::from(""));
        for stats in self.columns.iter() {
            header = header.with_cell(TableCell::from(stats.column.clone()));
        }
        let mut table = Table::new().with_row(header);

        let mut mean = Row::new().with_cell(TableCell::from("global mean"));
        let mut std_dev = Row::new().with_cell(TableCell::from("std dev"));
        for stats in self.columns.iter() {
            mean = mean.with_cell(show(stats.mean));
            std_dev = std_dev.with_cell(show(stats.std_dev));
        }
        table.add_row(mean);
        table.add_row(std_dev);
        for cohort in Cohort::ALL {
            let mut row = Row::new().with_cell(TableCell::from(format!("{} mean", cohort)));
            for stats in self.columns.iter() {
                row = row.with_cell(show(stats.cohort_mean(cohort)));
            }
            table.add_row(row);
        }
        table
    }

    pub fn write_json(&self, writer: impl io::Write) -> Result {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn save_json(&self, path: impl AsRef<Path>, overwrite: bool) -> Result {
        let path = path.as_ref();
        let file = create_output(path, overwrite)?;
        self.write_json(io::BufWriter::new(file))
            .with_context(|| format!("writing statistics to \"{}\"", path.display()))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<SummaryStats> {
            let file = std::fs::File::open(path)?;
            Ok(serde_json::from_reader(io::BufReader::new(file))?)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading statistics from \"{}\"", path.display()))
    }
}

//! Slicing the cube into a subjects x selections table.
use crate::{create_output, AnalysisSpec, Cohort, CohortRequest, DataCube, Selection, SubjectId};
use qu::ick_use::*;
use std::{io, path::Path};
use term_data_table::{Cell as TableCell, Row, Table};

/// A subject's row in a selection table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub subject_id: SubjectId,
    pub cohort: Cohort,
    /// One value per column.
    pub values: Vec<f64>,
}

/// Complete cases only: every row has a value in every column.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTable {
    pub columns: Vec<Selection>,
    pub rows: Vec<TableRow>,
}

impl SelectionTable {
    /// Take the requested (visit, test) columns for subjects in any of the requested cohorts,
    /// dropping subjects with a missing or invalid value in any column.
    ///
    /// A selection the cube doesn't hold is an error.
    pub fn assemble(
        cube: &DataCube,
        cohorts: &CohortRequest,
        selections: &[Selection],
    ) -> Result<Self> {
        let subjects = cube.subjects();
        // values[subject][selection]
        let mut values: Vec<Vec<Option<f64>>> = vec![vec![]; subjects.len()];
        for selection in selections {
            let column = cube
                .column(selection.visit, &selection.test)
                .ok_or_else(|| format_err!("unknown event or test {}", selection))?;
            for (row, (_, cell)) in values.iter_mut().zip(column) {
                row.push(cell.value());
            }
        }

        let rows: Vec<TableRow> = subjects
            .iter()
            .zip(values)
            .filter_map(|(subject, values)| {
                let cohort = subject.cohort.filter(|c| cohorts.contains(*c))?;
                let values = values.into_iter().collect::<Option<Vec<f64>>>()?;
                Some(TableRow {
                    subject_id: subject.id,
                    cohort,
                    values,
                })
            })
            .collect();
        if rows.is_empty() {
            event!(
                Level::WARN,
                "no subjects in cohorts {} have values for all selections",
                cohorts
            );
        }
        Ok(Self {
            columns: selections.to_vec(),
            rows,
        })
    }

    pub fn from_analysis(cube: &DataCube, spec: &AnalysisSpec) -> Result<Self> {
        Self::assemble(cube, &spec.cohorts, &spec.selections)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        self.columns.iter().map(Selection::column_name)
    }

    /// All values in one column.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row.values[idx])
    }

    /// Values in one column for subjects in `cohort`.
    pub fn cohort_column(&self, idx: usize, cohort: Cohort) -> impl Iterator<Item = f64> + '_ {
        self.rows
            .iter()
            .filter(move |row| row.cohort == cohort)
            .map(move |row| row.values[idx])
    }

    pub fn data_count(&self) -> DataCounts {
        let mut counts = DataCounts::default();
        for row in self.rows.iter() {
            counts.subjects += 1;
            match row.cohort {
                Cohort::HealthyControl => counts.hc += 1,
                Cohort::Parkinsons => counts.pd += 1,
                Cohort::Swedd => counts.swedd += 1,
            }
        }
        if counts.subjects == 0 {
            event!(Level::WARN, "no subjects selected");
        }
        counts
    }

    /// Columns are `PATNO`, `COHORT`, then one per selection.
    pub fn write_csv(&self, writer: impl io::Write) -> Result {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(
            ["PATNO".to_string(), "COHORT".to_string()]
                .into_iter()
                .chain(self.column_names()),
        )?;
        for row in self.rows.iter() {
            out.write_record(
                [row.subject_id.to_string(), row.cohort.to_string()]
                    .into_iter()
                    .chain(row.values.iter().map(|v| v.to_string())),
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

    pub fn term_table(&self) -> Table {
        let mut header = Row::new()
            .with_cell(TableCell::from("PATNO"))
            .with_cell(TableCell::from("Cohort"));
        for name in self.column_names() {
            header = header.with_cell(TableCell::from(name));
        }
        let mut table = Table::new().with_row(header);
        for row in self.rows.iter() {
            let mut cells = Row::new()
                .with_cell(TableCell::from(row.subject_id.to_string()))
                .with_cell(TableCell::from(row.cohort.code()));
            for value in row.values.iter() {
                cells = cells.with_cell(TableCell::from(format!("{:.3}", value)));
            }
            table.add_row(cells);
        }
        table
    }
}

/// Subject counts for a selection table.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DataCounts {
    pub subjects: usize,
    pub hc: usize,
    pub pd: usize,
    pub swedd: usize,
}

impl DataCounts {
    pub fn get(&self, cohort: Cohort) -> usize {
        match cohort {
            Cohort::HealthyControl => self.hc,
            Cohort::Parkinsons => self.pd,
            Cohort::Swedd => self.swedd,
        }
    }

    /// The cohorts with at least one subject.
    pub fn present_cohorts(&self) -> Vec<Cohort> {
        Cohort::ALL
            .into_iter()
            .filter(|c| self.get(*c) > 0)
            .collect()
    }

    pub fn term_table(&self) -> Table {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(TableCell::from("subjects"))
                .with_cell(TableCell::from(self.subjects.to_string())),
        );
        for cohort in Cohort::ALL {
            table.add_row(
                Row::new()
                    .with_cell(TableCell::from(cohort.code()))
                    .with_cell(TableCell::from(self.get(cohort).to_string())),
            );
        }
        table
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CubeBuilder, Subject, SubjectRegistry, TestDirectory, VisitCode};

    fn cube() -> DataCube {
        let subjects: SubjectRegistry = vec![
            Subject {
                id: 1,
                cohort: Some(Cohort::Parkinsons),
            },
            Subject {
                id: 2,
                cohort: Some(Cohort::Parkinsons),
            },
            Subject {
                id: 3,
                cohort: Some(Cohort::HealthyControl),
            },
            Subject {
                id: 4,
                cohort: None,
            },
        ]
        .into_iter()
        .collect();
        let t = |s: &str| -> crate::ArcStr { s.into() };
        let directory =
            TestDirectory::new(vec![t("A"), t("B")], vec![(t("A"), t("A")), (t("B"), t("B"))])
                .unwrap();
        let mut builder = CubeBuilder::new(subjects, directory).unwrap();
        builder
            .ingest_reader(
                "test",
                "\
PATNO,EVENT_ID,A,B
1,BL,1,10
2,BL,3,20
3,BL,5,30
4,BL,7,40
1,V04,2,
2,V04,x,
3,V04,6,
"
                .as_bytes(),
            )
            .unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn pd_only() {
        let cube = cube();
        let cohorts = CohortRequest::parse(["PD"]).unwrap();
        let table = SelectionTable::assemble(
            &cube,
            &cohorts,
            &[
                Selection::new(VisitCode::Baseline, "A"),
                Selection::new(VisitCode::Baseline, "B"),
            ],
        )
        .unwrap();
        let ids: Vec<_> = table.rows.iter().map(|r| r.subject_id).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(table.rows[1].values, [3., 20.]);
        assert_eq!(
            table.data_count(),
            DataCounts {
                subjects: 2,
                hc: 0,
                pd: 2,
                swedd: 0,
            }
        );
        assert_eq!(table.data_count().present_cohorts(), [Cohort::Parkinsons]);
    }

    #[test]
    fn complete_cases_only() {
        let cube = cube();
        let cohorts = CohortRequest::parse(["PD", "HC"]).unwrap();
        let table = SelectionTable::assemble(
            &cube,
            &cohorts,
            &[
                Selection::new(VisitCode::Baseline, "B"),
                Selection::new(VisitCode::V04, "A"),
            ],
        )
        .unwrap();
        // subject 2 has an invalid value at V04, subject 4 has no cohort
        let ids: Vec<_> = table.rows.iter().map(|r| r.subject_id).collect();
        assert_eq!(ids, [1, 3]);
        assert!(table.rows.iter().all(|r| r.values.len() == 2));

        let empty = SelectionTable::assemble(
            &cube,
            &cohorts,
            &[Selection::new(VisitCode::V04, "B")],
        )
        .unwrap();
        assert!(empty.is_empty());
        assert!(empty.data_count().present_cohorts().is_empty());
    }

    #[test]
    fn unknown_selection() {
        let cube = cube();
        let cohorts = CohortRequest::parse(["PD"]).unwrap();
        let err =
            SelectionTable::assemble(&cube, &cohorts, &[Selection::new(VisitCode::Baseline, "C")])
                .unwrap_err();
        assert!(err.to_string().contains("(BL, C)"));
    }

    #[test]
    fn csv_layout() {
        let cube = cube();
        let cohorts = CohortRequest::parse(["HC", "PD"]).unwrap();
        let table =
            SelectionTable::assemble(&cube, &cohorts, &[Selection::new(VisitCode::Baseline, "A")])
                .unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "PATNO,COHORT,A [BL]\n1,PD,1\n2,PD,3\n3,HC,5\n"
        );
    }
}

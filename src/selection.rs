//! Which files and tests go into the cube.
//!
//! The selection specification is a JSON file like
//!
//! ```json
//! {
//!   "selectdata": {
//!     "biomarkers": {
//!       "filename": "Biomarkers_clean.csv",
//!       "testlist": ["Abeta 42", "Total tau"],
//!       "testdict": { "Abeta 42": "Abeta 42", "Total tau": "Total tau" }
//!     },
//!     "updrs3": {
//!       "filename": "MDS_UPDRS_Part_III.csv",
//!       "testlist": ["Rigidity"],
//!       "testdict": { "NP3RIGN": "Rigidity", "NP3RIGRU": "Rigidity" }
//!     }
//!   }
//! }
//! ```
//!
//! `testdict` maps column names in the file to canonical test names. Several columns can map to
//! the same test, in which case their values are added together.
use crate::{resolve_path, ArcStr};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectionSpec {
    #[serde(rename = "selectdata")]
    datasets: BTreeMap<ArcStr, DatasetSelection>,
    /// Directory the spec was loaded from, for resolving relative filenames.
    #[serde(skip)]
    base: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetSelection {
    pub filename: PathBuf,
    #[serde(rename = "testlist", default)]
    pub tests: Vec<ArcStr>,
    #[serde(rename = "testdict", default)]
    pub codes: BTreeMap<ArcStr, ArcStr>,
}

impl SelectionSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<SelectionSpec> {
            let text = fs::read_to_string(path)?;
            let mut spec = SelectionSpec::from_str(&text)?;
            spec.base = path.parent().map(Path::to_owned);
            Ok(spec)
        }
        let path = path.as_ref();
        inner(path)
            .with_context(|| format!("loading selection specification \"{}\"", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let spec: SelectionSpec = serde_json::from_str(text)?;
        ensure!(!spec.datasets.is_empty(), "no datasets selected");
        Ok(spec)
    }

    pub fn datasets(&self) -> impl Iterator<Item = (&str, &DatasetSelection)> + '_ {
        self.datasets.iter().map(|(name, ds)| (&**name, ds))
    }

    /// The data files to read, in dataset order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.datasets
            .values()
            .map(|ds| resolve_path(self.base.as_deref(), &ds.filename))
            .collect()
    }

    /// Combine the test lists and code dictionaries of all datasets.
    pub fn test_directory(&self) -> Result<TestDirectory> {
        let tests = self.datasets.values().flat_map(|ds| ds.tests.iter().cloned());
        let codes = self.datasets.values().flat_map(|ds| {
            ds.codes
                .iter()
                .map(|(code, test)| (code.clone(), test.clone()))
        });
        TestDirectory::new(tests, codes)
    }
}

/// Maps source column codes to canonical test names, and canonical test names to their position
/// on the cube's test axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DirectoryRaw", into = "DirectoryRaw")]
pub struct TestDirectory {
    tests: Vec<ArcStr>,
    /// code -> index into `tests`
    codes: BTreeMap<ArcStr, usize>,
    test_idx: HashMap<ArcStr, usize>,
}

#[derive(Serialize, Deserialize)]
struct DirectoryRaw {
    tests: Vec<ArcStr>,
    codes: BTreeMap<ArcStr, ArcStr>,
}

impl TestDirectory {
    /// Build the directory.
    ///
    /// Test names are kept in first-seen order, and repeats are ignored. Every code must point
    /// at a listed test, and a code can't point at two different tests.
    pub fn new(
        tests: impl IntoIterator<Item = ArcStr>,
        codes: impl IntoIterator<Item = (ArcStr, ArcStr)>,
    ) -> Result<Self> {
        let mut this = Self {
            tests: vec![],
            codes: BTreeMap::new(),
            test_idx: HashMap::new(),
        };
        for test in tests {
            if !this.test_idx.contains_key(&test) {
                this.test_idx.insert(test.clone(), this.tests.len());
                this.tests.push(test);
            }
        }
        ensure!(!this.tests.is_empty(), "no tests selected");

        for (code, test) in codes {
            let idx = *this.test_idx.get(&test).ok_or_else(|| {
                format_err!("code \"{}\" maps to \"{}\", which is not a listed test", code, test)
            })?;
            if let Some(prev) = this.codes.insert(code.clone(), idx) {
                ensure!(
                    prev == idx,
                    "code \"{}\" maps to both \"{}\" and \"{}\"",
                    code,
                    this.tests[prev],
                    test
                );
            }
        }
        Ok(this)
    }

    pub fn tests(&self) -> &[ArcStr] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// The test-axis index for a source column code.
    pub fn resolve(&self, code: &str) -> Option<usize> {
        self.codes.get(code).copied()
    }

    /// The test-axis index for a canonical test name.
    pub fn test_index(&self, name: &str) -> Option<usize> {
        self.test_idx.get(name).copied()
    }

    pub fn codes(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.codes
            .iter()
            .map(move |(code, idx)| (&**code, &*self.tests[*idx]))
    }
}

impl TryFrom<DirectoryRaw> for TestDirectory {
    type Error = Error;
    fn try_from(raw: DirectoryRaw) -> Result<Self> {
        TestDirectory::new(raw.tests, raw.codes)
    }
}

impl From<TestDirectory> for DirectoryRaw {
    fn from(dir: TestDirectory) -> Self {
        let codes = dir
            .codes
            .iter()
            .map(|(code, idx)| (code.clone(), dir.tests[*idx].clone()))
            .collect();
        DirectoryRaw {
            tests: dir.tests,
            codes,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SPEC: &str = r#"{
        "selectdata": {
            "updrs3": {
                "filename": "MDS_UPDRS_Part_III.csv",
                "testlist": ["Rigidity", "Tremor"],
                "testdict": { "NP3RIGN": "Rigidity", "NP3RIGRU": "Rigidity", "NP3PTRMR": "Tremor" }
            },
            "biomarkers": {
                "filename": "/data/Biomarkers_clean.csv",
                "testlist": ["Abeta 42", "Tremor"],
                "testdict": { "Abeta 42": "Abeta 42" }
            }
        }
    }"#;

    #[test]
    fn directory() {
        let spec = SelectionSpec::from_str(SPEC).unwrap();
        let dir = spec.test_directory().unwrap();
        // datasets are visited in name order
        let tests: Vec<&str> = dir.tests().iter().map(|t| &**t).collect();
        assert_eq!(tests, ["Abeta 42", "Tremor", "Rigidity"]);
        assert_eq!(dir.resolve("NP3RIGN"), dir.test_index("Rigidity"));
        assert_eq!(dir.resolve("NP3RIGRU"), Some(2));
        assert_eq!(dir.resolve("NP3PTRMR"), Some(1));
        assert_eq!(dir.resolve("PATNO"), None);
        assert_eq!(dir.codes().count(), 4);
    }

    #[test]
    fn relative_files() {
        let mut spec = SelectionSpec::from_str(SPEC).unwrap();
        spec.base = Some(PathBuf::from("/analysis"));
        assert_eq!(
            spec.files(),
            [
                PathBuf::from("/data/Biomarkers_clean.csv"),
                PathBuf::from("/analysis/MDS_UPDRS_Part_III.csv"),
            ]
        );
    }

    #[test]
    fn bad_directories() {
        let t = |s: &str| -> ArcStr { s.into() };
        assert!(TestDirectory::new(vec![t("A")], vec![(t("a"), t("B"))]).is_err());
        assert!(TestDirectory::new(
            vec![t("A"), t("B")],
            vec![(t("a"), t("A")), (t("a"), t("B"))]
        )
        .is_err());
        assert!(TestDirectory::new(vec![], vec![]).is_err());
        assert!(SelectionSpec::from_str(r#"{"selectdata": {}}"#).is_err());
    }

    #[test]
    fn directory_serialization() {
        let dir = SelectionSpec::from_str(SPEC)
            .unwrap()
            .test_directory()
            .unwrap();
        let bytes = bincode::serialize(&dir).unwrap();
        let back: TestDirectory = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, dir);
    }
}

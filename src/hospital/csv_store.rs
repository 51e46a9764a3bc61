//! Hospital tables exported from the keyword/attribute spreadsheets as CSV.
//!
//! Profiles are built once and cached. Each lookup compares the files'
//! modification times against the ones the cache was built from and rebuilds
//! when any of them changed, so edits to the tables apply without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{build_profile, HospitalConfigStore, HospitalProfile};
use crate::pipeline::extraction::PipelineError;

#[derive(Debug, Deserialize)]
struct KeywordRow {
    #[serde(rename = "Hospital ID")]
    hospital_id: String,
    #[serde(rename = "Keywords", default)]
    keywords: String,
}

#[derive(Debug, Deserialize)]
struct AttributeRow {
    #[serde(rename = "Hospital ID")]
    hospital_id: String,
    #[serde(rename = "Attributes", default)]
    attributes: String,
}

#[derive(Debug, Deserialize)]
struct QuestionRow {
    #[serde(rename = "Hospital ID")]
    hospital_id: String,
    #[serde(rename = "Attribute")]
    attribute: String,
    #[serde(rename = "Question")]
    question: String,
}

type Fingerprint = Vec<Option<SystemTime>>;

struct Snapshot {
    fingerprint: Fingerprint,
    profiles: HashMap<String, Arc<HospitalProfile>>,
}

/// CSV-backed hospital store.
pub struct CsvHospitalStore {
    keywords_path: PathBuf,
    attributes_path: PathBuf,
    questions_path: Option<PathBuf>,
    cache: RwLock<Option<Snapshot>>,
}

impl CsvHospitalStore {
    /// Open the store and load it once so bad tables fail at startup.
    pub fn open(
        keywords_path: impl Into<PathBuf>,
        attributes_path: impl Into<PathBuf>,
        questions_path: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let store = Self {
            keywords_path: keywords_path.into(),
            attributes_path: attributes_path.into(),
            questions_path,
            cache: RwLock::new(None),
        };
        let snapshot = store.load()?;
        tracing::info!(
            hospitals = snapshot.profiles.len(),
            keywords = %store.keywords_path.display(),
            "Loaded hospital tables"
        );
        if let Ok(mut cache) = store.cache.write() {
            *cache = Some(snapshot);
        }
        Ok(store)
    }

    /// Number of hospitals in the current snapshot.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|s| s.profiles.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fingerprint(&self) -> Fingerprint {
        let mut paths: Vec<&Path> = vec![&self.keywords_path, &self.attributes_path];
        if let Some(questions) = &self.questions_path {
            paths.push(questions);
        }
        paths
            .into_iter()
            .map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .collect()
    }

    fn load(&self) -> Result<Snapshot, PipelineError> {
        let fingerprint = self.fingerprint();

        let keyword_rows: Vec<KeywordRow> = read_table(&self.keywords_path)?;
        // A missing attributes table means every hospital asks everything.
        let attribute_rows: Vec<AttributeRow> = if self.attributes_path.exists() {
            read_table(&self.attributes_path)?
        } else {
            tracing::warn!(
                path = %self.attributes_path.display(),
                "Attributes table not found, using full vocabulary for every hospital"
            );
            Vec::new()
        };
        let question_rows: Vec<QuestionRow> = match &self.questions_path {
            Some(path) => read_table(path)?,
            None => Vec::new(),
        };

        let mut attributes: HashMap<String, String> = HashMap::new();
        for row in attribute_rows {
            attributes.entry(row.hospital_id).or_insert(row.attributes);
        }

        let mut overrides: HashMap<String, HashMap<String, String>> = HashMap::new();
        for row in question_rows {
            let question = row.question.trim().to_string();
            if question.is_empty() {
                continue;
            }
            overrides
                .entry(row.hospital_id)
                .or_default()
                .entry(row.attribute.trim().to_string())
                .or_insert(question);
        }

        let no_overrides = HashMap::new();
        let mut profiles = HashMap::new();
        for row in keyword_rows {
            if row.hospital_id.is_empty() || profiles.contains_key(&row.hospital_id) {
                continue;
            }
            let profile = build_profile(
                &row.hospital_id,
                &row.keywords,
                attributes.get(&row.hospital_id).map(String::as_str),
                overrides.get(&row.hospital_id).unwrap_or(&no_overrides),
            );
            profiles.insert(row.hospital_id, Arc::new(profile));
        }

        Ok(Snapshot {
            fingerprint,
            profiles,
        })
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::ConfigStore(format!("{}: {e}", path.display())))?;

    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| PipelineError::ConfigStore(format!("{}: {e}", path.display())))
}

impl HospitalConfigStore for CsvHospitalStore {
    fn lookup(&self, hospital_id: &str) -> Result<Option<Arc<HospitalProfile>>, PipelineError> {
        let current = self.fingerprint();

        {
            let cache = self
                .cache
                .read()
                .map_err(|_| PipelineError::ConfigStore("Hospital cache lock poisoned".into()))?;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.fingerprint == current {
                    return Ok(snapshot.profiles.get(hospital_id).cloned());
                }
            }
        }

        tracing::info!("Hospital tables changed, reloading");
        let snapshot = self.load()?;
        let profile = snapshot.profiles.get(hospital_id).cloned();
        let mut cache = self
            .cache
            .write()
            .map_err(|_| PipelineError::ConfigStore("Hospital cache lock poisoned".into()))?;
        *cache = Some(snapshot);
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let keywords = write(
            dir,
            "Keywords.csv",
            "Hospital ID,Keywords\nAB,\"UHID, Discharge\"\nCD, Summary \nEE,\n",
        );
        let attributes = write(
            dir,
            "Attributes.csv",
            "Hospital ID,Attributes\nAB,\"Patient Name, Age, Doctor Name\"\n",
        );
        (keywords, attributes)
    }

    #[test]
    fn loads_keywords_and_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let store = CsvHospitalStore::open(keywords, attributes, None).unwrap();

        let ab = store.lookup("AB").unwrap().unwrap();
        assert_eq!(ab.required_keywords, vec!["UHID", "Discharge"]);
        assert_eq!(
            ab.attribute_names().collect::<Vec<_>>(),
            vec!["Patient Name", "Age", "Doctor Name"]
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn hospital_without_attribute_row_gets_full_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let store = CsvHospitalStore::open(keywords, attributes, None).unwrap();

        let cd = store.lookup("CD").unwrap().unwrap();
        assert_eq!(cd.required_keywords, vec!["Summary"]);
        assert_eq!(
            cd.attribute_questions.len(),
            crate::pipeline::extraction::CANONICAL_ATTRIBUTES.len()
        );
    }

    #[test]
    fn empty_keyword_cell_gives_unusable_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let store = CsvHospitalStore::open(keywords, attributes, None).unwrap();
        assert!(!store.lookup("EE").unwrap().unwrap().is_usable());
    }

    #[test]
    fn unknown_hospital_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let store = CsvHospitalStore::open(keywords, attributes, None).unwrap();
        assert!(store.lookup("ZZ").unwrap().is_none());
    }

    #[test]
    fn first_duplicate_row_wins() {
        let dir = tempfile::tempdir().unwrap();
        let keywords = write(
            dir.path(),
            "Keywords.csv",
            "Hospital ID,Keywords\nAB,first\nAB,second\n",
        );
        let attributes = write(dir.path(), "Attributes.csv", "Hospital ID,Attributes\n");
        let store = CsvHospitalStore::open(keywords, attributes, None).unwrap();
        assert_eq!(store.lookup("AB").unwrap().unwrap().required_keywords, vec!["first"]);
    }

    #[test]
    fn question_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let questions = write(
            dir.path(),
            "Questions.csv",
            "Hospital ID,Attribute,Question\nAB,Age,How many years old is the patient?\n",
        );
        let store = CsvHospitalStore::open(keywords, attributes, Some(questions)).unwrap();
        let ab = store.lookup("AB").unwrap().unwrap();
        assert_eq!(ab.question_for("Age"), Some("How many years old is the patient?"));
    }

    #[test]
    fn missing_keywords_table_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = CsvHospitalStore::open(
            dir.path().join("nope.csv"),
            dir.path().join("Attributes.csv"),
            None,
        );
        assert!(matches!(result, Err(PipelineError::ConfigStore(_))));
    }

    #[test]
    fn missing_attributes_table_uses_full_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let keywords = write(dir.path(), "Keywords.csv", "Hospital ID,Keywords\nAB,UHID\n");
        let store =
            CsvHospitalStore::open(keywords, dir.path().join("Attributes.csv"), None).unwrap();
        let ab = store.lookup("AB").unwrap().unwrap();
        assert_eq!(
            ab.attribute_questions.len(),
            crate::pipeline::extraction::CANONICAL_ATTRIBUTES.len()
        );
    }

    #[test]
    fn reloads_when_table_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (keywords, attributes) = fixture(dir.path());
        let store = CsvHospitalStore::open(keywords.clone(), attributes, None).unwrap();
        assert!(store.lookup("NEW").unwrap().is_none());

        fs::write(&keywords, "Hospital ID,Keywords\nNEW,Discharge\n").unwrap();
        // Some filesystems have coarse mtime resolution.
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&keywords)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let fresh = store.lookup("NEW").unwrap().unwrap();
        assert_eq!(fresh.required_keywords, vec!["Discharge"]);
        assert!(store.lookup("AB").unwrap().is_none());
    }
}

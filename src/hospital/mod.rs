//! Per-hospital configuration: the keyword gate and attribute question set.

pub mod csv_store;

pub use csv_store::CsvHospitalStore;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::pipeline::extraction::attributes::{canonical_question, CANONICAL_ATTRIBUTES};
use crate::pipeline::extraction::{ExtractionError, PipelineError};

/// Keyword gate and attribute questions for one hospital. Immutable once
/// loaded; shared between requests behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HospitalProfile {
    pub hospital_id: String,
    pub required_keywords: Vec<String>,
    /// Attribute name to question text, in configured order.
    pub attribute_questions: Vec<(String, String)>,
}

impl HospitalProfile {
    pub fn new(hospital_id: impl Into<String>, required_keywords: Vec<String>) -> Self {
        Self {
            hospital_id: hospital_id.into(),
            required_keywords,
            attribute_questions: Vec::new(),
        }
    }

    /// Add or replace the question for `attribute`.
    pub fn with_question(mut self, attribute: impl Into<String>, question: impl Into<String>) -> Self {
        let attribute = attribute.into();
        let question = question.into();
        match self.attribute_questions.iter_mut().find(|(name, _)| *name == attribute) {
            Some(entry) => entry.1 = question,
            None => self.attribute_questions.push((attribute, question)),
        }
        self
    }

    pub fn question_for(&self, attribute: &str) -> Option<&str> {
        self.attribute_questions
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, question)| question.as_str())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attribute_questions.iter().map(|(name, _)| name.as_str())
    }

    /// A profile without keywords cannot select a page.
    pub fn is_usable(&self) -> bool {
        !self.required_keywords.is_empty()
    }
}

/// Split a comma-separated cell into trimmed, non-empty entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Assemble a profile from raw table cells.
///
/// `attributes` of `None` means the hospital has no attribute row and asks
/// every canonical question. Names with neither a canonical template nor an
/// override are dropped.
pub fn build_profile(
    hospital_id: &str,
    keywords: &str,
    attributes: Option<&str>,
    overrides: &HashMap<String, String>,
) -> HospitalProfile {
    let mut profile = HospitalProfile::new(hospital_id, parse_list(keywords));

    let names = match attributes {
        Some(raw) => parse_list(raw),
        None => CANONICAL_ATTRIBUTES.iter().map(|s| s.name.to_string()).collect(),
    };

    for name in names {
        let question = overrides
            .get(&name)
            .map(String::as_str)
            .or_else(|| canonical_question(&name));
        match question {
            Some(question) => profile = profile.with_question(name, question),
            None => tracing::warn!(
                hospital = hospital_id,
                attribute = %name,
                "Dropping attribute with no question template"
            ),
        }
    }

    profile
}

/// Read-only lookup from hospital identifier to profile.
pub trait HospitalConfigStore: Send + Sync {
    /// `Ok(None)` when the identifier is unknown. `Err` only for store faults.
    fn lookup(&self, hospital_id: &str) -> Result<Option<Arc<HospitalProfile>>, PipelineError>;
}

/// Resolve `hospital_id` to a usable profile.
pub fn resolve(
    store: &dyn HospitalConfigStore,
    hospital_id: &str,
) -> Result<Arc<HospitalProfile>, ExtractionError> {
    let profile = store
        .lookup(hospital_id)?
        .ok_or_else(|| ExtractionError::ConfigNotFound(hospital_id.to_string()))?;

    if !profile.is_usable() {
        return Err(ExtractionError::NoKeywordsConfigured(hospital_id.to_string()));
    }

    Ok(profile)
}

/// Hospital identifier encoded in an upload's file name: everything before
/// the first `P`, or the whole name when there is none.
pub fn hospital_id_from_filename(filename: &str) -> &str {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    match name.find('P') {
        Some(end) => &name[..end],
        None => name,
    }
}

/// In-memory store, for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticHospitalStore {
    profiles: HashMap<String, Arc<HospitalProfile>>,
}

impl StaticHospitalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: HospitalProfile) -> Self {
        self.profiles
            .insert(profile.hospital_id.clone(), Arc::new(profile));
        self
    }
}

impl HospitalConfigStore for StaticHospitalStore {
    fn lookup(&self, hospital_id: &str) -> Result<Option<Arc<HospitalProfile>>, PipelineError> {
        Ok(self.profiles.get(hospital_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list(" UHID , Discharge,, Summary ,"),
            vec!["UHID", "Discharge", "Summary"]
        );
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ,").is_empty());
    }

    #[test]
    fn parse_list_keeps_order() {
        assert_eq!(parse_list("b,a,c"), vec!["b", "a", "c"]);
    }

    #[test]
    fn hospital_id_is_prefix_before_first_p() {
        assert_eq!(hospital_id_from_filename("ABP1234.pdf"), "AB");
        assert_eq!(hospital_id_from_filename("APOLLOP12.pdf"), "A");
        assert_eq!(hospital_id_from_filename("KMC_P_998.pdf"), "KMC_");
    }

    #[test]
    fn hospital_id_without_p_is_whole_name() {
        assert_eq!(hospital_id_from_filename("ab1234.pdf"), "ab1234.pdf");
    }

    #[test]
    fn hospital_id_ignores_directories() {
        assert_eq!(hospital_id_from_filename("uploads/Pending/ABP1.pdf"), "AB");
        assert_eq!(hospital_id_from_filename("C:\\scans\\XYP2.pdf"), "XY");
    }

    #[test]
    fn leading_p_gives_empty_id() {
        assert_eq!(hospital_id_from_filename("P100.pdf"), "");
    }

    #[test]
    fn with_question_replaces_existing() {
        let profile = HospitalProfile::new("AB", vec!["x".into()])
            .with_question("Age", "How old?")
            .with_question("Age", "Age in years?");
        assert_eq!(profile.attribute_questions.len(), 1);
        assert_eq!(profile.question_for("Age"), Some("Age in years?"));
    }

    #[test]
    fn build_profile_uses_canonical_questions_and_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("Age".to_string(), "Age in years?".to_string());

        let profile = build_profile("AB", "UHID, Discharge", Some("Patient Name, Age"), &overrides);
        assert_eq!(profile.required_keywords, vec!["UHID", "Discharge"]);
        assert_eq!(
            profile.attribute_names().collect::<Vec<_>>(),
            vec!["Patient Name", "Age"]
        );
        assert_eq!(profile.question_for("Age"), Some("Age in years?"));
        assert_eq!(
            profile.question_for("Patient Name"),
            canonical_question("Patient Name")
        );
    }

    #[test]
    fn build_profile_without_attribute_row_asks_everything() {
        let profile = build_profile("AB", "UHID", None, &HashMap::new());
        assert_eq!(profile.attribute_questions.len(), CANONICAL_ATTRIBUTES.len());
    }

    #[test]
    fn build_profile_drops_unknown_attributes() {
        let profile = build_profile("AB", "UHID", Some("Age, Blood Group"), &HashMap::new());
        assert_eq!(profile.attribute_names().collect::<Vec<_>>(), vec!["Age"]);
    }

    #[test]
    fn override_can_introduce_new_attribute() {
        let mut overrides = HashMap::new();
        overrides.insert("Ward".to_string(), "Which ward was the patient in?".to_string());
        let profile = build_profile("AB", "UHID", Some("Ward"), &overrides);
        assert_eq!(profile.question_for("Ward"), Some("Which ward was the patient in?"));
    }

    #[test]
    fn resolve_unknown_hospital_is_config_not_found() {
        let store = StaticHospitalStore::new();
        let err = resolve(&store, "ZZ").unwrap_err();
        assert!(matches!(err, ExtractionError::ConfigNotFound(id) if id == "ZZ"));
    }

    #[test]
    fn resolve_without_keywords_is_rejected() {
        let store = StaticHospitalStore::new().with_profile(HospitalProfile::new("AB", vec![]));
        let err = resolve(&store, "AB").unwrap_err();
        assert!(matches!(err, ExtractionError::NoKeywordsConfigured(_)));
    }

    #[test]
    fn resolve_is_exact_match() {
        let store = StaticHospitalStore::new()
            .with_profile(HospitalProfile::new("AB", vec!["UHID".into()]));
        assert!(resolve(&store, "AB").is_ok());
        assert!(resolve(&store, "ab").is_err());
        assert!(resolve(&store, "AB ").is_err());
    }

    #[test]
    fn store_fault_is_extraction_failure() {
        struct Broken;
        impl HospitalConfigStore for Broken {
            fn lookup(&self, _: &str) -> Result<Option<Arc<HospitalProfile>>, PipelineError> {
                Err(PipelineError::ConfigStore("disk gone".into()))
            }
        }
        let err = resolve(&Broken, "AB").unwrap_err();
        assert!(matches!(err, ExtractionError::Failed(PipelineError::ConfigStore(_))));
    }
}

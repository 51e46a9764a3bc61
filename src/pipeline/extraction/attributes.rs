//! Attribute extraction: one QA call per requested attribute against the
//! selected page's text.

use std::collections::HashSet;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::hospital::HospitalProfile;

use super::types::{CancelFlag, QaAnswer, QaModel};
use super::PipelineError;

/// An attribute in the fixed vocabulary and its default question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub question: &'static str,
}

pub const CANONICAL_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec {
        name: "Patient Name",
        question: "What is the full name of the patient mentioned in the context?",
    },
    AttributeSpec {
        name: "Age",
        question: "What is the age of the patient? Provide only the number.",
    },
    AttributeSpec {
        name: "Gender",
        question: "What is the gender of the patient?",
    },
    AttributeSpec {
        name: "Admission Date",
        question: "What is the exact admission date of the patient in 'dd/mm/yyyy' format?",
    },
    AttributeSpec {
        name: "Discharge Date",
        question: "What is the exact Discharge date of the patient in 'dd/mm/yyyy' format?",
    },
    AttributeSpec {
        name: "UHID Number",
        question: "What is the UHID (unique hospital identification number) of the patient?",
    },
    AttributeSpec {
        name: "IPD Number",
        question: "What is the IPD (in-patient department) number of the patient?",
    },
    AttributeSpec {
        name: "IP Number",
        question: "What is the IP number of the patient?",
    },
    AttributeSpec {
        name: "MR Number",
        question: "What is the MR number of the patient?",
    },
    AttributeSpec {
        name: "UMR Number",
        question: "What is the UMR number of the patient?",
    },
    AttributeSpec {
        name: "Admission Number",
        question: "What is the admission number of the patient?",
    },
    AttributeSpec {
        name: "Patient Number",
        question: "What is the patient number of the patient?",
    },
    AttributeSpec {
        name: "Doctor Name",
        question: "What is the Doctor Name who is treating the patient, given in the context",
    },
];

/// Default question for a vocabulary attribute. Exact, case-sensitive name.
pub fn canonical_question(attribute: &str) -> Option<&'static str> {
    CANONICAL_ATTRIBUTES
        .iter()
        .find(|spec| spec.name == attribute)
        .map(|spec| spec.question)
}

/// Why an attribute that was asked about has no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The model ran and produced nothing usable.
    EmptyAnswer,
    /// The model call failed.
    ModelError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttributeValue {
    Found(String),
    NotFound(NotFoundReason),
}

impl AttributeValue {
    /// The value, or `None` for the not-found sentinel.
    pub fn as_found(&self) -> Option<&str> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeResult {
    pub attribute_name: String,
    pub value: AttributeValue,
}

/// Attribute name to value in request order. Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<AttributeResult>,
}

impl AttributeMap {
    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find(|r| r.attribute_name == attribute)
            .map(|r| &r.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|r| r.attribute_name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeResult> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn found_count(&self) -> usize {
        self.entries.iter().filter(|r| r.value.is_found()).count()
    }

    /// Name to value-or-null view, the shape the flat API response uses.
    pub fn flat(&self) -> FlatAttributes<'_> {
        FlatAttributes(self)
    }
}

impl FromIterator<AttributeResult> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = AttributeResult>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.attribute_name, &entry.value)?;
        }
        map.end()
    }
}

pub struct FlatAttributes<'a>(&'a AttributeMap);

impl Serialize for FlatAttributes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in &self.0.entries {
            map.serialize_entry(&entry.attribute_name, &entry.value.as_found())?;
        }
        map.end()
    }
}

/// Turn a raw model result into an attribute value. Answers are trimmed and
/// an empty answer is the not-found sentinel, as is any model failure.
pub fn normalize_answer(raw: Result<Option<QaAnswer>, PipelineError>) -> AttributeValue {
    match raw {
        Ok(Some(answer)) => {
            let text = answer.text.trim();
            if text.is_empty() {
                AttributeValue::NotFound(NotFoundReason::EmptyAnswer)
            } else {
                AttributeValue::Found(text.to_string())
            }
        }
        Ok(None) => AttributeValue::NotFound(NotFoundReason::EmptyAnswer),
        Err(e) => AttributeValue::NotFound(NotFoundReason::ModelError(e.to_string())),
    }
}

/// Output of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub attributes: AttributeMap,
    /// Requested names with no question in the profile.
    pub skipped: Vec<String>,
}

/// Runs the QA model for each requested attribute.
pub struct AttributeExtractor<'a> {
    qa: &'a dyn QaModel,
    parallel: bool,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> AttributeExtractor<'a> {
    pub fn new(qa: &'a dyn QaModel) -> Self {
        Self {
            qa,
            parallel: false,
            cancel: None,
        }
    }

    /// Ask questions concurrently. Only honoured for reentrant models.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Skip the remaining QA calls once `cancel` is set. Their values are
    /// `ModelError("cancelled")`; callers that cancel discard the result.
    pub fn with_cancel(mut self, cancel: Option<&'a CancelFlag>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn extract(&self, context: &str, requested: &[String], profile: &HospitalProfile) -> Extraction {
        let mut seen = HashSet::new();
        let mut jobs: Vec<(&str, &str)> = Vec::new();
        let mut skipped = Vec::new();

        for name in requested {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match profile.question_for(name) {
                Some(question) => jobs.push((name.as_str(), question)),
                None => skipped.push(name.clone()),
            }
        }

        if !skipped.is_empty() {
            tracing::debug!(
                hospital = %profile.hospital_id,
                skipped = ?skipped,
                "Requested attributes not configured for hospital"
            );
        }

        let values = if self.parallel && self.qa.is_reentrant() && jobs.len() > 1 {
            self.ask_parallel(context, &jobs)
        } else {
            jobs.iter()
                .map(|(name, question)| self.ask(name, question, context))
                .collect()
        };

        let attributes = jobs
            .iter()
            .zip(values)
            .map(|((name, _), value)| AttributeResult {
                attribute_name: (*name).to_string(),
                value,
            })
            .collect();

        Extraction { attributes, skipped }
    }

    fn ask(&self, attribute: &str, question: &str, context: &str) -> AttributeValue {
        if self.cancel.is_some_and(CancelFlag::is_cancelled) {
            tracing::debug!(attribute, "Skipping QA call, extraction cancelled");
            return AttributeValue::NotFound(NotFoundReason::ModelError("cancelled".into()));
        }
        let value = normalize_answer(self.qa.answer(question, context));
        match &value {
            AttributeValue::NotFound(NotFoundReason::ModelError(message)) => tracing::warn!(
                attribute,
                model = self.qa.name(),
                error = %message,
                "AttributeExtractionFailed"
            ),
            AttributeValue::NotFound(NotFoundReason::EmptyAnswer) => {
                tracing::debug!(attribute, "Model returned no answer")
            }
            AttributeValue::Found(_) => tracing::debug!(attribute, "Attribute extracted"),
        }
        value
    }

    fn ask_parallel(&self, context: &str, jobs: &[(&str, &str)]) -> Vec<AttributeValue> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|(name, question)| scope.spawn(move || self.ask(name, question, context)))
                .collect();

            handles
                .into_iter()
                .zip(jobs)
                .map(|(handle, (name, _))| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::warn!(attribute = *name, "Attribute worker panicked");
                        AttributeValue::NotFound(NotFoundReason::ModelError(
                            "extraction worker panicked".into(),
                        ))
                    })
                })
                .collect()
        })
    }
}

//! Page selection: the first page whose text satisfies a matcher wins.

use crate::hospital::HospitalProfile;

use super::types::PageText;
use super::PipelineError;

/// Decides whether a page's text is the patient-summary page.
pub trait PageMatcher: Send + Sync {
    fn matches(&self, text: &str) -> bool;

    /// Criteria `text` failed, for debug logging of near misses. Matchers
    /// without named criteria report nothing.
    fn missing(&self, _text: &str) -> Vec<&str> {
        Vec::new()
    }
}

/// All-keywords-present gate. Every keyword must appear in the page text as
/// a case-insensitive substring. A gate with no keywords matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGate {
    /// Stored lowercased.
    keywords: Vec<String>,
}

impl KeywordGate {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn from_profile(profile: &HospitalProfile) -> Self {
        Self::new(&profile.required_keywords)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl PageMatcher for KeywordGate {
    fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let haystack = text.to_lowercase();
        self.keywords.iter().all(|k| haystack.contains(k.as_str()))
    }

    /// Keywords absent from `text`.
    fn missing(&self, text: &str) -> Vec<&str> {
        let haystack = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !haystack.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// The page chosen by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pub page: PageText,
    /// Pages pulled from the source, the selected one included.
    pub pages_scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    Selected(PageSelection),
    NoMatch { pages_scanned: usize },
}

/// Scan `pages` in order and return the first one `matcher` accepts.
///
/// Stops pulling from `pages` as soon as a page matches, so pages after the
/// match are never produced. A fault while producing a page aborts the scan.
pub fn select_page<I>(pages: I, matcher: &dyn PageMatcher) -> Result<SelectionOutcome, PipelineError>
where
    I: IntoIterator<Item = Result<PageText, PipelineError>>,
{
    let mut pages_scanned = 0;

    for page in pages {
        let page = page?;
        pages_scanned += 1;

        if page.is_blank() {
            tracing::debug!(page = page.page_index, "Skipping blank page");
            continue;
        }

        if matcher.matches(&page.text) {
            tracing::debug!(page = page.page_index, pages_scanned, "Page matched");
            return Ok(SelectionOutcome::Selected(PageSelection {
                page,
                pages_scanned,
            }));
        }

        tracing::debug!(
            page = page.page_index,
            missing = ?matcher.missing(&page.text),
            "Page did not match"
        );
    }

    Ok(SelectionOutcome::NoMatch { pages_scanned })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn page(index: usize, text: &str) -> Result<PageText, PipelineError> {
        Ok(PageText {
            page_index: index,
            text: text.to_string(),
        })
    }

    #[test]
    fn gate_requires_every_keyword() {
        let gate = KeywordGate::new(["UHID", "Discharge"]);
        assert!(gate.matches("UHID: 12345 Discharge Summary"));
        assert!(!gate.matches("UHID: 12345 Admission Note"));
    }

    #[test]
    fn gate_is_case_insensitive() {
        let gate = KeywordGate::new(["UHID", "Discharge"]);
        assert!(gate.matches("uhid: 12345 ... discharge summary"));
        assert!(gate.matches("DISCHARGE SUMMARY / uHiD 9"));
    }

    #[test]
    fn gate_matches_substrings() {
        let gate = KeywordGate::new(["charge"]);
        assert!(gate.matches("Discharged on 12/03/2024"));
    }

    #[test]
    fn empty_gate_matches_nothing() {
        let gate = KeywordGate::new(Vec::<String>::new());
        assert!(!gate.matches("anything at all"));
        let blanks = KeywordGate::new(["  ", ""]);
        assert!(blanks.keywords().is_empty());
        assert!(!blanks.matches("anything at all"));
    }

    #[test]
    fn missing_lists_absent_keywords() {
        let gate = KeywordGate::new(["UHID", "Discharge", "Summary"]);
        assert_eq!(gate.missing("uhid 1 summary"), vec!["discharge"]);
    }

    #[test]
    fn missing_is_reported_through_the_trait_object() {
        struct Anything;
        impl PageMatcher for Anything {
            fn matches(&self, _: &str) -> bool {
                true
            }
        }

        let gate = KeywordGate::new(["UHID", "Discharge"]);
        let matcher: &dyn PageMatcher = &gate;
        assert_eq!(matcher.missing("UHID only"), vec!["discharge"]);
        assert!(matcher.missing("uhid discharge").is_empty());

        let custom: &dyn PageMatcher = &Anything;
        assert!(custom.missing("whatever").is_empty());
    }

    #[test]
    fn second_page_selected_when_first_lacks_a_keyword() {
        let gate = KeywordGate::new(["UHID", "Discharge"]);
        let pages = vec![
            page(0, "UHID: 12345 Admission record"),
            page(1, "uhid: 12345 ... discharge summary"),
        ];

        match select_page(pages, &gate).unwrap() {
            SelectionOutcome::Selected(selection) => {
                assert_eq!(selection.page.page_index, 1);
                assert_eq!(selection.pages_scanned, 2);
            }
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn scanning_stops_at_first_match() {
        let gate = KeywordGate::new(["discharge"]);
        let pulled = Cell::new(0);
        let pages = ["cover letter", "discharge summary", "discharge medication"]
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                pulled.set(pulled.get() + 1);
                page(i, text)
            });

        let outcome = select_page(pages, &gate).unwrap();
        assert!(matches!(
            outcome,
            SelectionOutcome::Selected(PageSelection { pages_scanned: 2, .. })
        ));
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn first_of_several_matches_wins() {
        let gate = KeywordGate::new(["discharge"]);
        let pages = vec![page(0, "discharge A"), page(1, "discharge B")];
        match select_page(pages, &gate).unwrap() {
            SelectionOutcome::Selected(s) => assert_eq!(s.page.text, "discharge A"),
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn blank_pages_are_skipped() {
        let gate = KeywordGate::new(["discharge"]);
        let pages = vec![page(0, ""), page(1, "discharge")];
        match select_page(pages, &gate).unwrap() {
            SelectionOutcome::Selected(s) => {
                assert_eq!(s.page.page_index, 1);
                assert_eq!(s.pages_scanned, 2);
            }
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn no_match_reports_pages_scanned() {
        let gate = KeywordGate::new(["discharge"]);
        let pages = vec![page(0, "one"), page(1, "two"), page(2, "three")];
        assert_eq!(
            select_page(pages, &gate).unwrap(),
            SelectionOutcome::NoMatch { pages_scanned: 3 }
        );
    }

    #[test]
    fn no_pages_is_no_match() {
        let gate = KeywordGate::new(["discharge"]);
        let pages: Vec<Result<PageText, PipelineError>> = Vec::new();
        assert_eq!(
            select_page(pages, &gate).unwrap(),
            SelectionOutcome::NoMatch { pages_scanned: 0 }
        );
    }

    #[test]
    fn page_fault_aborts_selection() {
        let gate = KeywordGate::new(["discharge"]);
        let pages = vec![
            page(0, "cover"),
            Err(PipelineError::OcrProcessing("engine crashed".into())),
            page(2, "discharge"),
        ];
        let err = select_page(pages, &gate).unwrap_err();
        assert!(matches!(err, PipelineError::OcrProcessing(_)));
    }

    #[test]
    fn custom_matcher_plugs_in() {
        struct StartsWith(&'static str);
        impl PageMatcher for StartsWith {
            fn matches(&self, text: &str) -> bool {
                text.starts_with(self.0)
            }
        }

        let pages = vec![page(0, "Summary of care"), page(1, "Discharge Summary")];
        match select_page(pages, &StartsWith("Discharge")).unwrap() {
            SelectionOutcome::Selected(s) => assert_eq!(s.page.page_index, 1),
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn gate_from_profile_uses_required_keywords() {
        let profile = HospitalProfile::new("AB", vec!["UHID".into(), "Discharge".into()]);
        let gate = KeywordGate::from_profile(&profile);
        assert_eq!(gate.keywords(), &["uhid".to_string(), "discharge".to_string()]);
    }
}

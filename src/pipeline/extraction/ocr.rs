use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::pdfium::mock_page_index;
use super::types::{BoundingBox, OcrEngine, OcrLine};
use super::PipelineError;

/// Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
///
/// A fresh `Tesseract` handle is created per page, so one engine value can be
/// shared across requests. Leptonica's image I/O keeps process-global state,
/// which is why the engine reports itself as non-reentrant and is served
/// through a `ModelGate`.
#[cfg(feature = "ocr")]
pub struct TesseractEngine {
    tessdata_dir: PathBuf,
    language: String,
}

#[cfg(feature = "ocr")]
impl TesseractEngine {
    /// English engine. Fails if `eng.traineddata` is missing.
    pub fn new(tessdata_dir: &Path) -> Result<Self, PipelineError> {
        Self::for_language(tessdata_dir, "eng")
    }

    /// Engine for `language` (e.g. "eng", "eng+hin"). Every language must
    /// have its traineddata file in `tessdata_dir`.
    pub fn for_language(tessdata_dir: &Path, language: &str) -> Result<Self, PipelineError> {
        check_language_data(tessdata_dir, language)?;
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            language: language.trim().to_string(),
        })
    }
}

/// Check that `tessdata_dir` holds `<lang>.traineddata` for every
/// `+`-separated language in `language`.
#[cfg_attr(not(feature = "ocr"), allow(dead_code))]
pub(crate) fn check_language_data(tessdata_dir: &Path, language: &str) -> Result<(), PipelineError> {
    let languages: Vec<&str> = language.split('+').map(str::trim).collect();
    if languages.iter().any(|lang| lang.is_empty()) {
        return Err(PipelineError::OcrInit(format!(
            "Invalid OCR language '{language}'"
        )));
    }
    for lang in languages {
        let data = tessdata_dir.join(format!("{lang}.traineddata"));
        if !data.exists() {
            return Err(PipelineError::TessdataNotFound(data));
        }
    }
    Ok(())
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractEngine {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>, PipelineError> {
        let tessdata = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| PipelineError::OcrInit("Invalid tessdata path".into()))?;
        let image = image_path
            .to_str()
            .ok_or_else(|| PipelineError::OcrProcessing("Invalid image path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata), Some(&self.language))
            .map_err(|e| PipelineError::OcrInit(format!("{e:?}")))?;

        let mut tess = tess
            .set_image(image)
            .map_err(|e| PipelineError::OcrProcessing(format!("{e:?}")))?;

        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| PipelineError::OcrProcessing(format!("{e:?}")))?;

        Ok(parse_tsv_lines(&tsv))
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Words of one TSV line accumulated before they are joined.
struct LineAccumulator {
    key: (u32, u32, u32),
    words: Vec<String>,
    confidence_sum: f32,
    bounding_box: Option<BoundingBox>,
}

impl LineAccumulator {
    fn finish(self) -> OcrLine {
        let confidence = if self.words.is_empty() {
            0.0
        } else {
            self.confidence_sum / self.words.len() as f32
        };
        OcrLine {
            bounding_box: self.bounding_box,
            text: self.words.join(" "),
            confidence,
        }
    }
}

/// Group Tesseract TSV word rows into lines.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text.
/// Level 5 rows are words; consecutive words sharing (block, par, line) form one line.
/// Line confidence is the mean word confidence scaled to 0.0-1.0, line box the union of word boxes.
pub fn parse_tsv_lines(tsv: &str) -> Vec<OcrLine> {
    let mut lines = Vec::new();
    let mut current: Option<LineAccumulator> = None;

    for row in tsv.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        // Header row fails here too
        if fields[0].parse::<i32>().ok() != Some(5) {
            continue;
        }
        let key = match (
            fields[2].parse::<u32>(),
            fields[3].parse::<u32>(),
            fields[4].parse::<u32>(),
        ) {
            (Ok(block), Ok(par), Ok(line)) => (block, par, line),
            _ => continue,
        };
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }
        // Tesseract 4.1+ writes decimals ("96.364410"); -1 for words it can't score
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let confidence = (conf / 100.0).clamp(0.0, 1.0);
        let word_box = parse_bounding_box(fields[6], fields[7], fields[8], fields[9]);

        let same_line = current.as_ref().is_some_and(|acc| acc.key == key);
        if !same_line {
            if let Some(done) = current.take() {
                lines.push(done.finish());
            }
            current = Some(LineAccumulator {
                key,
                words: Vec::new(),
                confidence_sum: 0.0,
                bounding_box: None,
            });
        }

        if let Some(acc) = current.as_mut() {
            acc.words.push(word.to_string());
            acc.confidence_sum += confidence;
            acc.bounding_box = match (acc.bounding_box, word_box) {
                (Some(line_box), Some(word_box)) => Some(line_box.union(&word_box)),
                (None, word_box) => word_box,
                (line_box, None) => line_box,
            };
        }
    }

    if let Some(done) = current {
        lines.push(done.finish());
    }
    lines
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

// ── Mock for testing ──────────────────────────────────────

/// Mock OCR engine returning scripted text per page.
///
/// Reads the page index back from the image written by `MockPdfPageRenderer`,
/// so it exercises the real scratch-file path. Each `\n`-separated segment of a
/// page script becomes one recognized line; an empty script is a blank page.
pub struct MockOcrEngine {
    pages: Vec<String>,
    failing_page: Option<usize>,
    calls: Mutex<Vec<usize>>,
    seen_paths: Mutex<Vec<PathBuf>>,
}

impl MockOcrEngine {
    pub fn with_pages<S: Into<String>>(pages: Vec<S>) -> Self {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            failing_page: None,
            calls: Mutex::new(Vec::new()),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    /// Fail when asked to recognize `page_index`.
    pub fn failing_on(mut self, page_index: usize) -> Self {
        self.failing_page = Some(page_index);
        self
    }

    /// Page indices recognized so far, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Image paths handed to the engine so far.
    pub fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen_paths.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>, PipelineError> {
        let bytes = std::fs::read(image_path)?;
        let page_index = mock_page_index(&bytes).ok_or_else(|| {
            PipelineError::OcrProcessing("Mock OCR received an unknown image".into())
        })?;

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(page_index);
        }
        if let Ok(mut paths) = self.seen_paths.lock() {
            paths.push(image_path.to_path_buf());
        }

        if self.failing_page == Some(page_index) {
            return Err(PipelineError::OcrProcessing(format!(
                "Mock OCR failure on page {page_index}"
            )));
        }

        let script = self.pages.get(page_index).map(String::as_str).unwrap_or("");
        Ok(script
            .split('\n')
            .filter(|segment| !segment.is_empty())
            .map(|segment| OcrLine::new(segment, 0.9))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::pdfium::mock_page_image;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn tsv_words_grouped_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tUHID:",
            "5\t1\t1\t1\t1\t2\t100\t20\t60\t30\t85\t12345",
            "5\t1\t1\t1\t2\t1\t10\t60\t120\t30\t70\tDischarge",
            "5\t1\t1\t1\t2\t2\t140\t60\t80\t30\t90\tSummary",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "UHID: 12345");
        assert!((lines[0].confidence - 0.90).abs() < 1e-5);
        assert_eq!(lines[1].text, "Discharge Summary");
        assert!((lines[1].confidence - 0.80).abs() < 1e-5);
    }

    #[test]
    fn tsv_line_box_is_union_of_words() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tPatient",
            "5\t1\t1\t1\t1\t2\t100\t25\t60\t28\t88\tName",
        ]);
        let lines = parse_tsv_lines(&input);
        let bb = lines[0].bounding_box.expect("line should have a box");
        assert_eq!(bb, BoundingBox { x: 10, y: 20, width: 150, height: 33 });
    }

    #[test]
    fn tsv_skips_non_word_levels_and_empty_words() {
        let input = tsv(&[
            "2\t1\t1\t0\t0\t0\t10\t10\t580\t780\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\t",
            "5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t90\tAge",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Age");
    }

    #[test]
    fn tsv_negative_confidence_counts_as_zero() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t-1\tgarbled"]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines[0].confidence, 0.0);
    }

    #[test]
    fn tsv_decimal_confidence_is_parsed() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t96.364410\tUHID",
            "5\t1\t1\t1\t1\t2\t100\t20\t60\t30\t-1.000000\t12345",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 1);
        assert!((lines[0].confidence - 0.481_822).abs() < 1e-4);
    }

    #[test]
    fn tsv_empty_and_header_only_yield_no_lines() {
        assert!(parse_tsv_lines("").is_empty());
        assert!(parse_tsv_lines(HEADER).is_empty());
    }

    #[test]
    fn tsv_skips_malformed_rows() {
        let input = tsv(&[
            "too\tfew\tfields",
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t92\tOK",
            "notanumber\t1\t1\t1\t1\t1\t10\t20\t80\t30\t50\tbad",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "OK");
    }

    #[test]
    fn tsv_separate_blocks_are_separate_lines() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\tLeft",
            "5\t1\t2\t1\t1\t1\t400\t20\t80\t30\t90\tRight",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn language_data_checked_for_each_language() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"").unwrap();

        assert!(check_language_data(dir.path(), "eng").is_ok());

        let err = check_language_data(dir.path(), "eng+hin").unwrap_err();
        match err {
            PipelineError::TessdataNotFound(path) => {
                assert_eq!(path, dir.path().join("hin.traineddata"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        std::fs::write(dir.path().join("hin.traineddata"), b"").unwrap();
        assert!(check_language_data(dir.path(), "eng+hin").is_ok());
        assert!(check_language_data(dir.path(), "hin").is_ok());
    }

    #[test]
    fn malformed_language_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"").unwrap();
        assert!(matches!(
            check_language_data(dir.path(), "eng+"),
            Err(PipelineError::OcrInit(_))
        ));
    }

    #[test]
    fn mock_engine_returns_scripted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, mock_page_image(1)).unwrap();

        let engine = MockOcrEngine::with_pages(vec!["", "UHID 1\nDischarge"]);
        let lines = engine.recognize(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "Discharge");
        assert_eq!(engine.calls(), vec![1]);
        assert_eq!(engine.seen_paths(), vec![path]);
    }

    #[test]
    fn mock_engine_blank_page_has_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, mock_page_image(0)).unwrap();

        let engine = MockOcrEngine::with_pages(vec![""]);
        assert!(engine.recognize(&path).unwrap().is_empty());
    }

    #[test]
    fn mock_engine_fails_on_configured_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, mock_page_image(2)).unwrap();

        let engine = MockOcrEngine::with_pages(vec!["a", "b", "c"]).failing_on(2);
        let err = engine.recognize(&path).unwrap_err();
        assert!(matches!(err, PipelineError::OcrProcessing(_)));
    }
}

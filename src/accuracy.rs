//! Tokenizer accuracy validation for `kano-chunk diagnose --accuracy`.
//!
//! An [`AccuracyValidator`] holds texts with known token counts and grades
//! an adapter by how close its counts come:
//!
//! ```text
//! AccuracyCase ──count_tokens──► AccuracyResult ──aggregate──► AccuracyReport
//!   text, expected               abs / rel / signed error      mean, median, max
//!                                                              within 1 / 5% / 10%
//!                                                              bias, grade
//! ```
//!
//! The built-in cases carry cl100k counts. [`reference_cases`] derives
//! expectations from any exact adapter instead, which is how the heuristic
//! is graded against tiktoken or a local `tokenizer.json`.
//!
//! | Grade | Requirement |
//! |-------|-------------|
//! | A+ | ≥ 95% of cases within 5% |
//! | A  | ≥ 90% within 5% |
//! | B+ | ≥ 90% within 10% |
//! | B  | ≥ 80% within 10% |
//! | C  | ≥ 70% within 10% |
//! | D  | anything else |

use std::fmt;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TokenizerError};
use crate::registry::TokenizerRegistry;
use crate::tokenizer::{Adapter, TokenizerAdapter, HEURISTIC};

/// Mean signed relative error beyond which counts are called biased.
pub const BIAS_THRESHOLD: f64 = 0.05;

const REFERENCE_MODEL: &str = "gpt-3.5-turbo";
const REFERENCE_SOURCE: &str = "tiktoken_reference";

// ═══════════════════════════════════════════════════════════════════════
// Cases and results
// ═══════════════════════════════════════════════════════════════════════

/// A text with a known token count for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyCase {
    pub text: String,
    pub expected_tokens: usize,
    pub model_name: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub text_type: Option<String>,
}

fn default_source() -> String {
    "manual".to_string()
}

impl AccuracyCase {
    pub fn new(text: &str, expected_tokens: usize, model_name: &str) -> Self {
        Self {
            text: text.to_string(),
            expected_tokens,
            model_name: model_name.to_string(),
            source: default_source(),
            language: None,
            text_type: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(TokenizerError::config("test_cases.text", "must be non-empty"));
        }
        if self.model_name.trim().is_empty() {
            return Err(TokenizerError::config(
                "test_cases.model_name",
                "must be non-empty",
            ));
        }
        Ok(())
    }
}

/// Built-in cases with cl100k (`gpt-3.5-turbo`) counts.
pub fn builtin_cases() -> Vec<AccuracyCase> {
    [
        ("Hello, world!", 4, "simple"),
        ("The quick brown fox jumps over the lazy dog.", 10, "simple"),
        (
            "This is a longer sentence that contains multiple clauses and should be tokenized into several tokens to test the accuracy of different tokenizer implementations.",
            28,
            "complex",
        ),
        ("def hello_world():\n    print('Hello, world!')", 12, "code"),
        (
            "import numpy as np\nfrom sklearn.model_selection import train_test_split",
            14,
            "code",
        ),
        ("Hello! How are you? I'm fine, thanks. What about you?", 16, "conversational"),
        ("Email: user@example.com, Phone: +1-555-123-4567", 13, "structured"),
        ("The temperature is 23.5°C (74.3°F) today.", 13, "technical"),
        ("Price: $1,234.56 (including 8.25% tax)", 11, "financial"),
    ]
    .into_iter()
    .map(|(text, expected, kind)| AccuracyCase {
        source: REFERENCE_SOURCE.to_string(),
        language: Some("en".to_string()),
        text_type: Some(kind.to_string()),
        ..AccuracyCase::new(text, expected, REFERENCE_MODEL)
    })
    .collect()
}

/// Outcome of counting one case.
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyResult {
    pub text: String,
    pub text_type: Option<String>,
    pub expected_tokens: usize,
    /// `None` when the adapter failed on this text.
    pub predicted_tokens: Option<usize>,
    pub is_exact: bool,
    pub absolute_error: usize,
    /// Error over `max(expected, 1)`.
    pub relative_error: f64,
    /// Positive when the adapter overcounts.
    pub signed_relative_error: f64,
    pub processing_time_ms: f64,
    pub error: Option<String>,
}

impl AccuracyResult {
    fn scored(case: &AccuracyCase, predicted: usize, is_exact: bool, elapsed_ms: f64) -> Self {
        let denom = case.expected_tokens.max(1) as f64;
        let signed = predicted as f64 - case.expected_tokens as f64;
        Self {
            text: case.text.clone(),
            text_type: case.text_type.clone(),
            expected_tokens: case.expected_tokens,
            predicted_tokens: Some(predicted),
            is_exact,
            absolute_error: predicted.abs_diff(case.expected_tokens),
            relative_error: signed.abs() / denom,
            signed_relative_error: signed / denom,
            processing_time_ms: elapsed_ms,
            error: None,
        }
    }

    fn failed(case: &AccuracyCase, err: &TokenizerError, elapsed_ms: f64) -> Self {
        Self {
            text: case.text.clone(),
            text_type: case.text_type.clone(),
            expected_tokens: case.expected_tokens,
            predicted_tokens: None,
            is_exact: false,
            absolute_error: 0,
            relative_error: 0.0,
            signed_relative_error: 0.0,
            processing_time_ms: elapsed_ms,
            error: Some(err.to_string()),
        }
    }

    pub fn is_scored(&self) -> bool {
        self.error.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    D,
}

impl Grade {
    pub fn from_fractions(within_5_percent: f64, within_10_percent: f64) -> Self {
        if within_5_percent >= 0.95 {
            Grade::APlus
        } else if within_5_percent >= 0.90 {
            Grade::A
        } else if within_10_percent >= 0.90 {
            Grade::BPlus
        } else if within_10_percent >= 0.80 {
            Grade::B
        } else if within_10_percent >= 0.70 {
            Grade::C
        } else {
            Grade::D
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountBias {
    Overcounts,
    Undercounts,
    Balanced,
}

impl CountBias {
    fn from_mean_signed_error(mean: f64) -> Self {
        if mean > BIAS_THRESHOLD {
            CountBias::Overcounts
        } else if mean < -BIAS_THRESHOLD {
            CountBias::Undercounts
        } else {
            CountBias::Balanced
        }
    }
}

/// Aggregate accuracy of one adapter over a case set.
///
/// Error statistics cover scored cases only. The `within_*` fractions are
/// over every case, so a failed count is a miss.
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub adapter_id: String,
    pub tokenizer_id: String,
    pub model_name: String,
    pub is_exact: bool,
    pub case_count: usize,
    pub failed_cases: usize,
    pub mean_absolute_error: f64,
    pub median_absolute_error: f64,
    pub max_absolute_error: usize,
    pub mean_relative_error: f64,
    pub median_relative_error: f64,
    pub max_relative_error: f64,
    pub within_1_token: f64,
    pub within_5_percent: f64,
    pub within_10_percent: f64,
    pub mean_signed_error: f64,
    pub bias: CountBias,
    pub grade: Grade,
    pub mean_processing_time_ms: f64,
    pub total_processing_time_ms: f64,
    pub results: Vec<AccuracyResult>,
}

impl AccuracyReport {
    pub fn from_results(
        adapter_id: &str,
        tokenizer_id: &str,
        model_name: &str,
        results: Vec<AccuracyResult>,
    ) -> Self {
        let scored: Vec<&AccuracyResult> = results.iter().filter(|r| r.is_scored()).collect();
        let absolute: Vec<f64> = scored.iter().map(|r| r.absolute_error as f64).collect();
        let relative: Vec<f64> = scored.iter().map(|r| r.relative_error).collect();
        let signed: Vec<f64> = scored.iter().map(|r| r.signed_relative_error).collect();

        let fraction = |hit: fn(&AccuracyResult) -> bool| {
            if results.is_empty() {
                0.0
            } else {
                scored.iter().filter(|r| hit(r)).count() as f64 / results.len() as f64
            }
        };
        let within_1_token = fraction(|r| r.absolute_error <= 1);
        let within_5_percent = fraction(|r| r.relative_error <= 0.05);
        let within_10_percent = fraction(|r| r.relative_error <= 0.10);

        let mean_signed_error = mean(&signed);
        let times: Vec<f64> = results.iter().map(|r| r.processing_time_ms).collect();

        Self {
            adapter_id: adapter_id.to_string(),
            tokenizer_id: tokenizer_id.to_string(),
            model_name: model_name.to_string(),
            is_exact: scored.iter().any(|r| r.is_exact),
            case_count: results.len(),
            failed_cases: results.len() - scored.len(),
            mean_absolute_error: mean(&absolute),
            median_absolute_error: median(&absolute),
            max_absolute_error: scored.iter().map(|r| r.absolute_error).max().unwrap_or(0),
            mean_relative_error: mean(&relative),
            median_relative_error: median(&relative),
            max_relative_error: relative.iter().copied().fold(0.0, f64::max),
            within_1_token,
            within_5_percent,
            within_10_percent,
            mean_signed_error,
            bias: CountBias::from_mean_signed_error(mean_signed_error),
            grade: Grade::from_fractions(within_5_percent, within_10_percent),
            mean_processing_time_ms: mean(&times),
            total_processing_time_ms: times.iter().sum(),
            results,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validator
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct CaseFile {
    test_cases: Vec<AccuracyCase>,
}

#[derive(Debug, Clone)]
pub struct AccuracyValidator {
    cases: Vec<AccuracyCase>,
}

impl Default for AccuracyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccuracyValidator {
    /// Validator seeded with [`builtin_cases`].
    pub fn new() -> Self {
        Self {
            cases: builtin_cases(),
        }
    }

    pub fn with_cases(cases: Vec<AccuracyCase>) -> Result<Self> {
        for case in &cases {
            case.validate()?;
        }
        Ok(Self { cases })
    }

    pub fn cases(&self) -> &[AccuracyCase] {
        &self.cases
    }

    pub fn add_case(&mut self, case: AccuracyCase) -> Result<()> {
        case.validate()?;
        self.cases.push(case);
        Ok(())
    }

    /// Append cases from a JSON file shaped `{"test_cases": [...]}`.
    ///
    /// Nothing is added unless every case in the file is valid.
    pub fn load_cases(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TokenizerError::config(
                "test_cases",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let file: CaseFile = serde_json::from_str(&raw).map_err(|e| {
            TokenizerError::config(
                "test_cases",
                format!("invalid test case file {}: {}", path.display(), e),
            )
        })?;
        for case in &file.test_cases {
            case.validate()?;
        }
        let added = file.test_cases.len();
        self.cases.extend(file.test_cases);
        debug!("Loaded {} accuracy cases from {}", added, path.display());
        Ok(added)
    }

    /// Count every case (optionally only those for `model_filter`) and grade.
    pub fn validate_adapter<T>(&self, adapter: &T, model_filter: Option<&str>) -> AccuracyReport
    where
        T: TokenizerAdapter + ?Sized,
    {
        let mut results = Vec::new();
        for case in self
            .cases
            .iter()
            .filter(|c| model_filter.map_or(true, |m| c.model_name == m))
        {
            let started = Instant::now();
            let outcome = adapter.count_tokens(&case.text);
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            results.push(match outcome {
                Ok(count) => AccuracyResult::scored(case, count.count, count.is_exact, elapsed_ms),
                Err(err) => {
                    warn!("{} failed on an accuracy case: {}", adapter.adapter_id(), err);
                    AccuracyResult::failed(case, &err, elapsed_ms)
                }
            });
        }
        AccuracyReport::from_results(
            adapter.adapter_id(),
            &adapter.tokenizer_id(),
            adapter.model_name(),
            results,
        )
    }

    /// Validate several adapters on the same cases.
    pub fn compare_adapters(
        &self,
        adapters: &[&dyn TokenizerAdapter],
        model_filter: Option<&str>,
    ) -> Vec<AccuracyReport> {
        adapters
            .iter()
            .map(|a| self.validate_adapter(*a, model_filter))
            .collect()
    }
}

/// Cases whose expected counts come from `reference`.
pub fn reference_cases<T>(reference: &T, texts: &[&str]) -> Result<Vec<AccuracyCase>>
where
    T: TokenizerAdapter + ?Sized,
{
    let source = reference.tokenizer_id();
    texts
        .iter()
        .filter(|t| !t.is_empty())
        .map(|text| -> Result<AccuracyCase> {
            let count = reference.count_tokens(text)?;
            Ok(AccuracyCase {
                source: source.clone(),
                ..AccuracyCase::new(text, count.count, reference.model_name())
            })
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Chain validation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct ChainAccuracy {
    pub model_name: String,
    /// One report per chain adapter that could be constructed.
    pub reports: Vec<AccuracyReport>,
    /// Heuristic graded against the first exact adapter in the chain.
    pub heuristic_vs_exact: Option<AccuracyReport>,
}

/// Grade every constructible adapter in `registry`'s chain for `model`.
pub fn validate_chain(
    registry: &TokenizerRegistry,
    model: &str,
    validator: &AccuracyValidator,
) -> ChainAccuracy {
    let mut reports = Vec::new();
    let mut exact: Option<Adapter> = None;
    let mut heuristic: Option<Adapter> = None;

    for name in registry.fallback_chain() {
        match registry.construct(&name, model, None) {
            Ok(adapter) => {
                reports.push(validator.validate_adapter(&adapter, None));
                if adapter.is_exact() {
                    exact.get_or_insert(adapter);
                } else if name == HEURISTIC {
                    heuristic = Some(adapter);
                }
            }
            Err(err) => debug!("Skipping {} in accuracy run: {}", name, err),
        }
    }

    let heuristic = heuristic.or_else(|| registry.construct(HEURISTIC, model, None).ok());
    let heuristic_vs_exact = match (exact, heuristic) {
        (Some(exact), Some(heuristic)) => {
            let texts: Vec<&str> = validator.cases().iter().map(|c| c.text.as_str()).collect();
            match reference_cases(&exact, &texts) {
                Ok(cases) => Some(AccuracyValidator { cases }.validate_adapter(&heuristic, None)),
                Err(err) => {
                    warn!("Reference counts from {} failed: {}", exact.adapter_id(), err);
                    None
                }
            }
        }
        _ => None,
    };

    ChainAccuracy {
        model_name: model.to_string(),
        reports,
        heuristic_vs_exact,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

fn short(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ").replace('|', "\\|");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Markdown summary: one overview row per report, then the first ten cases
/// of each.
pub fn render_summary(reports: &[&AccuracyReport]) -> String {
    let mut lines = vec![
        "# Tokenizer Accuracy".to_string(),
        String::new(),
        "| Tokenizer | Grade | Cases | Failed | Mean rel. error | Within 5% | Within 10% | Bias |"
            .to_string(),
        "|-----------|-------|-------|--------|-----------------|-----------|------------|------|"
            .to_string(),
    ];
    for r in reports {
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} | {:?} |",
            r.tokenizer_id,
            r.grade,
            r.case_count,
            r.failed_cases,
            percent(r.mean_relative_error),
            percent(r.within_5_percent),
            percent(r.within_10_percent),
            r.bias
        ));
    }

    for r in reports {
        lines.push(String::new());
        lines.push(format!("## {}", r.tokenizer_id));
        lines.push(String::new());
        lines.push(format!(
            "Mean absolute error {:.2}, median {:.2}, max {}. Mean time {:.3} ms.",
            r.mean_absolute_error,
            r.median_absolute_error,
            r.max_absolute_error,
            r.mean_processing_time_ms
        ));
        lines.push(String::new());
        lines.push("| Text | Expected | Predicted | Error |".to_string());
        lines.push("|------|----------|-----------|-------|".to_string());
        for res in r.results.iter().take(10) {
            let (predicted, error) = match res.predicted_tokens {
                Some(p) => (p.to_string(), percent(res.relative_error)),
                None => ("-".to_string(), res.error.clone().unwrap_or_default()),
            };
            lines.push(format!(
                "| {} | {} | {} | {} |",
                short(&res.text, 40),
                res.expected_tokens,
                predicted,
                error
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenCount;
    use crate::registry::AdapterSettings;
    use crate::tokenizer::HeuristicTokenizer;
    use std::sync::Arc;

    fn expected_for(text: &str) -> usize {
        builtin_cases()
            .into_iter()
            .find(|c| c.text == text)
            .map(|c| c.expected_tokens)
            .unwrap_or(0)
    }

    /// Returns `expected * factor` for the built-in cases.
    struct Scaled(usize);

    impl TokenizerAdapter for Scaled {
        fn adapter_id(&self) -> &str {
            "scaled"
        }
        fn model_name(&self) -> &str {
            REFERENCE_MODEL
        }
        fn count_tokens(&self, text: &str) -> Result<TokenCount> {
            Ok(TokenCount {
                count: expected_for(text) * self.0,
                method: "scaled".into(),
                tokenizer_id: format!("scaled:x{}", self.0),
                is_exact: true,
            })
        }
        fn max_tokens(&self) -> usize {
            4096
        }
    }

    struct Failing;

    impl TokenizerAdapter for Failing {
        fn adapter_id(&self) -> &str {
            "failing"
        }
        fn model_name(&self) -> &str {
            REFERENCE_MODEL
        }
        fn count_tokens(&self, text: &str) -> Result<TokenCount> {
            Err(TokenizerError::tokenization_failed("failing", REFERENCE_MODEL, text, "boom"))
        }
        fn max_tokens(&self) -> usize {
            4096
        }
    }

    fn heuristic() -> HeuristicTokenizer {
        HeuristicTokenizer::new(REFERENCE_MODEL, None, 4.0).unwrap()
    }

    #[test]
    fn test_builtin_cases() {
        let cases = builtin_cases();
        assert_eq!(cases.len(), 9);
        assert!(cases.iter().all(|c| c.model_name == REFERENCE_MODEL));
        assert_eq!(cases[0].expected_tokens, 4);
        assert_eq!(cases[8].text_type.as_deref(), Some("financial"));
    }

    #[test]
    fn test_exact_match_grades_top() {
        let report = AccuracyValidator::new().validate_adapter(&Scaled(1), None);
        assert_eq!(report.case_count, 9);
        assert_eq!(report.failed_cases, 0);
        assert_eq!(report.mean_absolute_error, 0.0);
        assert_eq!(report.within_1_token, 1.0);
        assert_eq!(report.within_5_percent, 1.0);
        assert_eq!(report.grade, Grade::APlus);
        assert_eq!(report.bias, CountBias::Balanced);
        assert!(report.is_exact);
        assert_eq!(report.tokenizer_id, format!("scaled:{}", REFERENCE_MODEL));
    }

    #[test]
    fn test_double_counts_show_overcount_bias() {
        let report = AccuracyValidator::new().validate_adapter(&Scaled(2), None);
        assert_eq!(report.grade, Grade::D);
        assert_eq!(report.bias, CountBias::Overcounts);
        assert!((report.mean_relative_error - 1.0).abs() < 1e-9);
        assert!((report.mean_signed_error - 1.0).abs() < 1e-9);
        assert_eq!(report.max_absolute_error, 28);
        assert_eq!(report.median_absolute_error, 13.0);
    }

    #[test]
    fn test_zero_counts_show_undercount_bias() {
        let report = AccuracyValidator::new().validate_adapter(&Scaled(0), None);
        assert_eq!(report.bias, CountBias::Undercounts);
        assert_eq!(report.within_10_percent, 0.0);
    }

    #[test]
    fn test_failures_are_misses() {
        let report = AccuracyValidator::new().validate_adapter(&Failing, None);
        assert_eq!(report.case_count, 9);
        assert_eq!(report.failed_cases, 9);
        assert_eq!(report.within_5_percent, 0.0);
        assert_eq!(report.grade, Grade::D);
        assert!(report.results.iter().all(|r| r.predicted_tokens.is_none()));
        assert!(report.results[0].error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_model_filter() {
        let validator = AccuracyValidator::new();
        assert_eq!(validator.validate_adapter(&Scaled(1), Some("bert-base-uncased")).case_count, 0);
        assert_eq!(validator.validate_adapter(&Scaled(1), Some(REFERENCE_MODEL)).case_count, 9);
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_fractions(0.95, 1.0), Grade::APlus);
        assert_eq!(Grade::from_fractions(0.90, 0.95), Grade::A);
        assert_eq!(Grade::from_fractions(0.5, 0.90), Grade::BPlus);
        assert_eq!(Grade::from_fractions(0.5, 0.80), Grade::B);
        assert_eq!(Grade::from_fractions(0.5, 0.70), Grade::C);
        assert_eq!(Grade::from_fractions(0.5, 0.69), Grade::D);
        assert_eq!(Grade::APlus.to_string(), "A+");
    }

    #[test]
    fn test_load_cases_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(
            &path,
            r#"{"test_cases": [
                {"text": "cat and dog", "expected_tokens": 3, "model_name": "m", "text_type": "simple"},
                {"text": "tree", "expected_tokens": 1, "model_name": "m", "source": "hand"}
            ]}"#,
        )
        .unwrap();

        let mut validator = AccuracyValidator::with_cases(Vec::new()).unwrap();
        assert_eq!(validator.load_cases(&path).unwrap(), 2);
        assert_eq!(validator.cases()[0].source, "manual");
        assert_eq!(validator.cases()[1].source, "hand");

        let report = validator.validate_adapter(&heuristic(), Some("m"));
        assert_eq!(report.case_count, 2);
        assert_eq!(report.grade, Grade::APlus);
    }

    #[test]
    fn test_load_cases_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(
            &path,
            r#"{"test_cases": [{"text": "", "expected_tokens": 1, "model_name": "m"}]}"#,
        )
        .unwrap();
        let mut validator = AccuracyValidator::new();
        assert!(validator.load_cases(&path).is_err());
        assert_eq!(validator.cases().len(), 9);
        assert!(validator.load_cases(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_reference_cases_grade_heuristic() {
        let texts = ["one two six", "", "你好世界。"];
        let cases = reference_cases(&heuristic(), &texts).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].expected_tokens, 3);
        assert_eq!(cases[0].source, "heuristic:gpt-3.5-turbo:chars_4.0");

        let report = AccuracyValidator::with_cases(cases)
            .unwrap()
            .validate_adapter(&heuristic(), None);
        assert_eq!(report.grade, Grade::APlus);
    }

    #[test]
    fn test_compare_adapters() {
        let exact = Scaled(1);
        let broken = Failing;
        let reports =
            AccuracyValidator::new().compare_adapters(&[&exact, &broken], Some(REFERENCE_MODEL));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].grade, Grade::APlus);
        assert_eq!(reports[1].failed_cases, 9);

        let summary = render_summary(&reports.iter().collect::<Vec<_>>());
        assert!(summary.contains("| scaled:gpt-3.5-turbo | A+ | 9 | 0 |"));
        assert!(summary.contains("## failing:gpt-3.5-turbo"));
        assert!(summary.contains("| Hello, world! | 4 | 4 | 0.0% |"));
    }

    #[test]
    fn test_validate_chain_compares_heuristic_with_exact() {
        let registry = TokenizerRegistry::new();
        registry.register(
            "reference",
            Arc::new(|_: &str, _: Option<usize>, _: &AdapterSettings| {
                Ok(Adapter::Custom(Arc::new(Scaled(1))))
            }),
        );
        registry
            .set_fallback_chain(vec!["reference".into(), HEURISTIC.into()])
            .unwrap();

        let run = validate_chain(&registry, REFERENCE_MODEL, &AccuracyValidator::new());
        assert_eq!(run.reports.len(), 2);
        assert_eq!(run.reports[0].grade, Grade::APlus);
        assert_eq!(run.reports[1].adapter_id, HEURISTIC);

        let versus = run.heuristic_vs_exact.unwrap();
        assert_eq!(versus.adapter_id, HEURISTIC);
        assert_eq!(versus.case_count, 9);
        // Expectations came from the exact adapter, so the numbers match.
        assert_eq!(versus.results[0].expected_tokens, 4);
        assert_eq!(versus.grade, run.reports[1].grade);
    }

    #[test]
    fn test_validate_chain_heuristic_only() {
        let registry = TokenizerRegistry::new();
        registry.set_fallback_chain(vec![HEURISTIC.into()]).unwrap();
        let run = validate_chain(&registry, "m", &AccuracyValidator::new());
        assert_eq!(run.reports.len(), 1);
        assert!(!run.reports[0].is_exact);
        assert!(run.heuristic_vs_exact.is_none());
    }
}

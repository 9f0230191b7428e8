//! Content complexity scoring.
//!
//! Analyses a text sample and produces a complexity score in `0.0..=1.0`.
//! The selector uses it to escalate rich technical content to the reasoning
//! tier and to drop trivial content to the cheap tier.
//!
//! ## Indicators
//!
//! Each raw count is divided by a saturation constant of 10 and capped at 1:
//!
//! 1. **Code blocks**: fenced ```` ```lang … ``` ```` blocks
//! 2. **Table lines**: `|…|` runs
//! 3. **Technical terms**: API, SQL, HTTP, JSON, … (word-bounded, any case)
//! 4. **Long sentences**: `.`-separated segments over 100 characters
//! 5. **Paragraphs**: blank-line separators
//! 6. **Special characters**: share of non-word, non-space characters
//!
//! The weighted feature sum contributes 70%; a length factor
//! `min(1, chars / 10000)` contributes the remaining 30%.

use crate::types::TaskType;
use regex::Regex;
use std::sync::OnceLock;

/// Raw counts divide by this before capping at 1.0.
const SATURATION: f64 = 10.0;

/// Characters at which the length factor saturates.
const LENGTH_SATURATION: f64 = 10_000.0;

/// Sentence length above which a segment counts as long.
const LONG_SENTENCE_CHARS: usize = 100;

/// Indicator weights, in the order: code, tables, terms, long sentences,
/// paragraphs, special characters. Each row sums to 1.0.
const TECHNICAL_WEIGHTS: [f64; 6] = [0.3, 0.2, 0.2, 0.1, 0.1, 0.1];
const IMAGE_WEIGHTS: [f64; 6] = [0.1, 0.2, 0.2, 0.1, 0.2, 0.2];
const DEFAULT_WEIGHTS: [f64; 6] = [0.2, 0.2, 0.15, 0.15, 0.15, 0.15];

struct Patterns {
    code_block: Regex,
    table_line: Regex,
    technical_term: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                code_block: Regex::new(r"```[a-z]*\n[\s\S]*?\n```").ok()?,
                table_line: Regex::new(r"\|.*\|").ok()?,
                technical_term: Regex::new(
                    r"(?i)\b(API|SQL|HTTP|JSON|XML|REST|SDK|Git|DB|Database|Algorithm|Function)\b",
                )
                .ok()?,
            })
        })
        .as_ref()
}

/// A content complexity scorer.
///
/// Stateless and cheap to construct. Pure: identical input always yields an
/// identical score.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct ComplexityScorer;

impl ComplexityScorer {
    /// Create a new scorer.
    pub fn new() -> Self {
        Self
    }

    /// Score `text` for complexity, weighting indicators for `task`.
    ///
    /// `None` uses the default weights. Empty text scores exactly `0.0`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scenario_orchestrator::routing::ComplexityScorer;
    /// let scorer = ComplexityScorer::new();
    /// assert_eq!(scorer.score("", None), 0.0);
    /// assert!(scorer.score("Say hello", None) < 0.3);
    /// ```
    pub fn score(&self, text: &str, task: Option<TaskType>) -> f64 {
        self.breakdown(text, task).total
    }

    /// Per-indicator breakdown of a score.
    ///
    /// Useful for debugging and for logging why a tier changed.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn breakdown(&self, text: &str, task: Option<TaskType>) -> ScoreBreakdown {
        let chars = text.chars().count();
        if chars == 0 {
            return ScoreBreakdown::default();
        }

        let (code_blocks, table_lines, technical_terms) = match patterns() {
            Some(p) => (
                p.code_block.find_iter(text).count(),
                p.table_line.find_iter(text).count(),
                p.technical_term.find_iter(text).count(),
            ),
            None => (0, 0, 0),
        };
        let long_sentences = text
            .split('.')
            .filter(|s| s.chars().count() > LONG_SENTENCE_CHARS)
            .count();
        let paragraphs = text.matches("\n\n").count();
        let special = text
            .chars()
            .filter(|c| !(c.is_alphanumeric() || *c == '_' || c.is_whitespace()))
            .count();
        let special_ratio = special as f64 / chars as f64;

        let indicators = [
            saturate(code_blocks as f64),
            saturate(table_lines as f64),
            saturate(technical_terms as f64),
            saturate(long_sentences as f64),
            saturate(paragraphs as f64),
            saturate(special_ratio),
        ];
        let weights = weights_for(task);
        let features: f64 = indicators.iter().zip(weights).map(|(v, w)| v * w).sum();
        let length_factor = (chars as f64 / LENGTH_SATURATION).min(1.0);

        ScoreBreakdown {
            code_blocks: indicators[0],
            table_lines: indicators[1],
            technical_terms: indicators[2],
            long_sentences: indicators[3],
            paragraphs: indicators[4],
            special_chars: indicators[5],
            length_factor,
            total: clamp_score(features * 0.7 + length_factor * 0.3),
        }
    }
}

fn weights_for(task: Option<TaskType>) -> [f64; 6] {
    match task {
        Some(TaskType::Technical) => TECHNICAL_WEIGHTS,
        Some(TaskType::ImageAnalysis) => IMAGE_WEIGHTS,
        _ => DEFAULT_WEIGHTS,
    }
}

fn saturate(raw: f64) -> f64 {
    (raw / SATURATION).min(1.0)
}

/// Clamp a raw score to `[0.0, 1.0]`.
///
/// # Panics
///
/// This function never panics.
pub fn clamp_score(raw: f64) -> f64 {
    raw.clamp(0.0, 1.0)
}

/// Normalized indicator values behind a complexity score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// Normalized code-block indicator.
    pub code_blocks: f64,
    /// Normalized table-line indicator.
    pub table_lines: f64,
    /// Normalized technical-term indicator.
    pub technical_terms: f64,
    /// Normalized long-sentence indicator.
    pub long_sentences: f64,
    /// Normalized paragraph indicator.
    pub paragraphs: f64,
    /// Normalized special-character indicator.
    pub special_chars: f64,
    /// `min(1, chars / 10000)`.
    pub length_factor: f64,
    /// Final clamped score in `[0.0, 1.0]`.
    pub total: f64,
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn code_block(i: usize) -> String {
        format!("```rust\nfn f{i}() {{}}\n```\n")
    }

    // -- clamp -----------------------------------------------------------

    #[test]
    fn test_clamp_score_within_range_unchanged() {
        assert!((clamp_score(0.5) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamp_score_out_of_range_is_clamped() {
        assert!(clamp_score(-0.1).abs() < f64::EPSILON);
        assert!((clamp_score(1.5) - 1.0).abs() < f64::EPSILON);
    }

    // -- baseline --------------------------------------------------------

    #[test]
    fn test_score_empty_text_returns_zero() {
        let scorer = ComplexityScorer::new();
        assert_eq!(scorer.score("", None), 0.0);
        assert_eq!(scorer.score("", Some(TaskType::Technical)), 0.0);
    }

    #[test]
    fn test_score_simple_sentence_is_low() {
        let scorer = ComplexityScorer::new();
        let score = scorer.score("Say hello", None);
        assert!(score < 0.3, "simple text should score <0.3, got {score}");
    }

    #[test]
    fn test_score_is_deterministic() {
        let scorer = ComplexityScorer::new();
        let text = "The REST API returns JSON.\n\n| a | b |\n```sql\nSELECT 1;\n```";
        assert_eq!(scorer.score(text, None), scorer.score(text, None));
    }

    #[test]
    fn test_score_always_in_unit_interval() {
        let scorer = ComplexityScorer::new();
        let heavy = format!(
            "{}{}{}",
            (0..30).map(code_block).collect::<String>(),
            "| x | y |\n".repeat(40),
            "API SQL HTTP JSON ".repeat(50)
        );
        let score = scorer.score(&heavy, Some(TaskType::Technical));
        assert!((0.0..=1.0).contains(&score));
    }

    // -- indicators ------------------------------------------------------

    #[test]
    fn test_code_blocks_counted_and_saturate() {
        let scorer = ComplexityScorer::new();
        let three: String = (0..3).map(code_block).collect();
        assert!((scorer.breakdown(&three, None).code_blocks - 0.3).abs() < 1e-9);
        let many: String = (0..15).map(code_block).collect();
        assert!((scorer.breakdown(&many, None).code_blocks - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_table_lines_counted() {
        let scorer = ComplexityScorer::new();
        let bd = scorer.breakdown("| a | b |\n| 1 | 2 |\nplain", None);
        assert!((bd.table_lines - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_technical_terms_are_word_bounded_and_case_insensitive() {
        let scorer = ComplexityScorer::new();
        let bd = scorer.breakdown("api Json RAPID dbms DB", None);
        // api, Json, DB match; RAPID and dbms do not.
        assert!((bd.technical_terms - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_long_sentences_and_paragraphs_counted() {
        let scorer = ComplexityScorer::new();
        let long = "word ".repeat(30);
        let text = format!("{long}.\n\nshort.\n\nend");
        let bd = scorer.breakdown(&text, None);
        assert!((bd.long_sentences - 0.1).abs() < 1e-9);
        assert!((bd.paragraphs - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_length_factor_saturates_at_ten_thousand_chars() {
        let scorer = ComplexityScorer::new();
        let bd = scorer.breakdown(&"a".repeat(20_000), None);
        assert!((bd.length_factor - 1.0).abs() < f64::EPSILON);
    }

    // -- monotonicity ----------------------------------------------------

    #[test]
    fn test_fifteen_code_blocks_score_at_least_plain_text() {
        let scorer = ComplexityScorer::new();
        let base = "The service exposes endpoints for account management.\n";
        let with_code = format!("{base}{}", (0..15).map(code_block).collect::<String>());
        assert!(scorer.score(&with_code, None) >= scorer.score(base, None));
    }

    #[test]
    fn test_score_non_decreasing_as_indicators_grow() {
        let scorer = ComplexityScorer::new();
        let base = "Account management overview for the billing service.\n";
        let mut previous = scorer.score(base, Some(TaskType::Technical));
        for n in 1..=12 {
            let text = format!(
                "{base}{}{}{}",
                (0..n).map(code_block).collect::<String>(),
                "| col | val |\n".repeat(n),
                "The API uses SQL. ".repeat(n)
            );
            let score = scorer.score(&text, Some(TaskType::Technical));
            assert!(score >= previous, "n={n}: {score} < {previous}");
            previous = score;
        }
    }

    // -- weights ---------------------------------------------------------

    #[test]
    fn test_weight_rows_sum_to_one() {
        for row in [TECHNICAL_WEIGHTS, IMAGE_WEIGHTS, DEFAULT_WEIGHTS] {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_technical_weights_favour_code() {
        let scorer = ComplexityScorer::new();
        let code: String = (0..10).map(code_block).collect();
        let technical = scorer.score(&code, Some(TaskType::Technical));
        let image = scorer.score(&code, Some(TaskType::ImageAnalysis));
        assert!(technical > image);
    }
}

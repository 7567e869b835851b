//! # Learning Quality Scorer
//!
//! Heuristic gate in front of the learning sink: scores content on length,
//! context, specificity, actionability and whether it states a conclusion,
//! then suggests a learning type from keyword families. Low-scoring content
//! is not worth embedding.

use super::sink::{Confidence, LearningKind};

const HIGH_THRESHOLD: f64 = 0.7;
const MEDIUM_THRESHOLD: f64 = 0.4;

/// Score plus the signals that produced it.
#[derive(Debug, Clone)]
pub struct LearningScore {
    pub confidence: f64,
    pub confidence_level: Confidence,
    pub quality_signals: Vec<&'static str>,
    pub suggested_type: Option<LearningKind>,
}

impl LearningScore {
    /// Whether the content clears the storage gate.
    pub fn should_store(&self) -> bool {
        self.confidence >= MEDIUM_THRESHOLD
    }
}

/// Keyword families for type suggestion.
const TYPE_KEYWORDS: &[(LearningKind, &[&str])] = &[
    (
        LearningKind::WorkingSolution,
        &["works", "solved", "fixed by", "solution", "resolved with"],
    ),
    (
        LearningKind::FailedApproach,
        &["failed", "doesn't work", "dead end", "abandoned", "reverted"],
    ),
    (
        LearningKind::ArchitecturalDecision,
        &["chose", "decision", "instead of", "trade-off", "selected"],
    ),
    (
        LearningKind::CodebasePattern,
        &["convention", "pattern", "always", "style", "structure"],
    ),
    (
        LearningKind::ErrorFix,
        &["error", "exception", "traceback", "workaround", "patch"],
    ),
];

#[derive(Debug, Default)]
pub struct LearningScorer;

impl LearningScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score learning content for quality.
    pub fn score(&self, content: &str) -> LearningScore {
        if content.trim().is_empty() {
            return LearningScore {
                confidence: 0.0,
                confidence_level: Confidence::Low,
                quality_signals: vec!["empty content"],
                suggested_type: None,
            };
        }

        let lower = content.to_lowercase();
        let word_count = content.split_whitespace().count();
        let mut signals = Vec::new();

        if word_count < 10 {
            signals.push("too short");
        } else if word_count >= 20 {
            signals.push("good length");
        } else {
            signals.push("adequate length");
        }

        let has_context = ["because", "when", "where", "context", "situation"]
            .iter()
            .any(|k| lower.contains(k));
        signals.push(if has_context { "has context" } else { "lacks context" });

        let has_specifics = ["file:", "line", "function", "struct", "error:", "crate"]
            .iter()
            .any(|k| lower.contains(k));
        signals.push(if has_specifics {
            "specific details"
        } else {
            "general statement"
        });

        let has_action = ["use", "try", "avoid", "instead", "should", "must", "don't"]
            .iter()
            .any(|k| lower.contains(k));
        signals.push(if has_action { "actionable" } else { "not actionable" });

        let has_result = ["works", "fixes", "solves", "result", "outcome", "therefore"]
            .iter()
            .any(|k| lower.contains(k));
        signals.push(if has_result {
            "has conclusion"
        } else {
            "no clear conclusion"
        });

        let mut score: f64 = 0.5;
        if !signals.contains(&"too short") {
            score += 0.1;
        } else {
            score -= 0.2;
        }
        if has_context {
            score += 0.1;
        } else {
            score -= 0.1;
        }
        if has_specifics {
            score += 0.1;
        }
        if has_action {
            score += 0.1;
        }
        if has_result {
            score += 0.1;
        } else {
            score -= 0.1;
        }

        let confidence = score.clamp(0.0, 1.0);
        let confidence_level = if confidence >= HIGH_THRESHOLD {
            Confidence::High
        } else if confidence >= MEDIUM_THRESHOLD {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        LearningScore {
            confidence,
            confidence_level,
            quality_signals: signals,
            suggested_type: Self::detect_type(&lower),
        }
    }

    fn detect_type(lower: &str) -> Option<LearningKind> {
        let mut best: Option<(LearningKind, usize)> = None;
        for (kind, keywords) in TYPE_KEYWORDS {
            let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
            if hits > 0 && best.map(|(_, n)| hits > n).unwrap_or(true) {
                best = Some((*kind, hits));
            }
        }
        best.map(|(kind, _)| kind)
    }
}

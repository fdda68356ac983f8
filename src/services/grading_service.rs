use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::exam_attempt::AttemptResults;
use crate::models::remote::Evaluation;

pub struct GradingService;

impl GradingService {
    /// Maps the remote evaluation onto local results. Scores pass through
    /// unchanged; the percentage is taken from the remote when present.
    pub fn map_results(evaluation: &Evaluation, fallback_time_spent: Option<i64>) -> AttemptResults {
        let percentage = match evaluation.percentage {
            Some(p) => p,
            None => Self::percentage(evaluation.achieved_score, evaluation.max_score),
        };
        let questions_correct = evaluation
            .questions
            .iter()
            .filter(|q| q.points_reached > 0.0)
            .count() as i64;

        AttemptResults {
            passed: Self::is_pass(&evaluation.result),
            score: evaluation.achieved_score,
            max_score: evaluation.max_score,
            percentage,
            time_spent_seconds: evaluation
                .time_spent_seconds
                .or(fallback_time_spent)
                .unwrap_or(0),
            certificate_ref: evaluation
                .certificate_id
                .clone()
                .filter(|c| !c.trim().is_empty()),
            questions_total: evaluation.questions.len() as i64,
            questions_correct,
        }
    }

    pub fn is_pass(result: &str) -> bool {
        matches!(result.trim().to_ascii_lowercase().as_str(), "pass" | "passed")
    }

    fn percentage(achieved: i64, max: i64) -> Decimal {
        if max <= 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(achieved) * Decimal::from(100) / Decimal::from(max))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

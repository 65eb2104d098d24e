use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::answer::AnswerSheet;
use crate::models::attempt::BlockScore;
use crate::models::exam::ExamContent;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub block_scores: Vec<BlockScore>,
    pub total_score: i32,
    pub max_score: i32,
    pub percentage: f64,
}

pub struct ScoringService;

impl ScoringService {
    /// Scores a finished attempt. Per question: unanswered contributes 0, an
    /// exact match of the selected and correct sets contributes +1, anything
    /// else (partial, superset, wrong) contributes -1 with no partial credit.
    /// A block's raw score is floored at 0 unless it allows negative scores;
    /// its max score is always the question count.
    ///
    /// The percentage is not clamped: with negative blocks allowed, a
    /// negative total yields a negative percentage. The floor operates per
    /// block, not globally.
    pub fn score(
        content: &ExamContent,
        answers: &AnswerSheet,
        block_time_spent: &BTreeMap<String, i64>,
    ) -> ScoreSummary {
        let mut block_scores = Vec::with_capacity(content.blocks.len());

        for block in &content.blocks {
            let mut raw: i32 = 0;
            for question in &block.questions {
                match answers.get_answer(&question.id) {
                    None => {}
                    Some(answer) => {
                        if answer.selected_options == question.correct_set() {
                            raw += 1;
                        } else {
                            raw -= 1;
                        }
                    }
                }
            }

            let score = if !block.can_be_negative && raw < 0 { 0 } else { raw };
            block_scores.push(BlockScore {
                block_id: block.id.clone(),
                score,
                max_score: block.questions.len() as i32,
                time_spent_seconds: block_time_spent.get(&block.id).copied().unwrap_or(0),
            });
        }

        let total_score: i32 = block_scores.iter().map(|b| b.score).sum();
        let max_score: i32 = block_scores.iter().map(|b| b.max_score).sum();
        let percentage = if max_score > 0 {
            100.0 * f64::from(total_score) / f64::from(max_score)
        } else {
            0.0
        };

        ScoreSummary {
            block_scores,
            total_score,
            max_score,
            percentage,
        }
    }
}

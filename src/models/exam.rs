use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use validator::Validate;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[validate(length(min = 1, message = "Question ID is required"))]
    pub id: String,
    #[validate(length(min = 1, message = "Question text is required"))]
    pub text: String,
    #[validate(length(min = 2, message = "At least 2 options required"))]
    pub options: Vec<String>,
    pub correct_answers: Vec<usize>,
    pub multiple_correct: bool,
}

impl Question {
    pub fn correct_set(&self) -> BTreeSet<usize> {
        self.correct_answers.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExamBlock {
    #[validate(length(min = 1, message = "Block ID is required"))]
    pub id: String,
    #[validate(length(min = 1, message = "Block title is required"))]
    pub title: String,
    #[serde(default)]
    pub background_info: String,
    #[serde(default)]
    pub can_be_negative: bool,
    #[validate(length(min = 1, message = "At least 1 question required per block"), nested)]
    pub questions: Vec<Question>,
}

/// Immutable description of an exam. Construct through [`ExamContent::validated`];
/// the attempt flow relies on the invariants checked there and never re-checks
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExamContent {
    #[validate(length(min = 1, message = "Exam ID is required"))]
    pub exam_id: String,
    #[validate(length(min = 1, message = "Exam title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "At least 1 block required"), nested)]
    pub blocks: Vec<ExamBlock>,
}

impl ExamContent {
    /// Runs the field-level checks plus the cross-field invariants: unique
    /// block ids, unique question ids within a block, in-range correct-answer
    /// indices, and `multiple_correct` consistent with the number of correct
    /// answers.
    pub fn validated(self) -> Result<Self> {
        crate::utils::validation::validate(&self)?;

        let problems = self.content_errors();
        if !problems.is_empty() {
            return Err(Error::InvalidContent(problems.join("; ")));
        }

        Ok(self)
    }

    fn content_errors(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut block_ids = HashSet::new();
        for block in &self.blocks {
            if !block_ids.insert(block.id.as_str()) {
                problems.push(format!("Duplicate block ID: {}", block.id));
            }

            let mut question_ids = HashSet::new();
            for question in &block.questions {
                if !question_ids.insert(question.id.as_str()) {
                    problems.push(format!(
                        "Duplicate question ID in block {}: {}",
                        block.id, question.id
                    ));
                }

                if question.correct_answers.is_empty() {
                    problems.push(format!(
                        "Question {} has no correct answers",
                        question.id
                    ));
                }
                if question
                    .correct_answers
                    .iter()
                    .any(|&idx| idx >= question.options.len())
                {
                    problems.push(format!(
                        "Question {} has a correct-answer index outside its options",
                        question.id
                    ));
                }

                let distinct = question.correct_set().len();
                let consistent = if question.multiple_correct {
                    distinct >= 2
                } else {
                    distinct == 1
                };
                if !consistent && !question.correct_answers.is_empty() {
                    problems.push(format!(
                        "Question {}: multipleCorrect must match the number of correct answers",
                        question.id
                    ));
                }
            }
        }

        problems
    }

    pub fn block(&self, index: usize) -> Option<&ExamBlock> {
        self.blocks.get(index)
    }

    pub fn find_question(&self, question_id: &str) -> Option<&Question> {
        self.blocks
            .iter()
            .flat_map(|b| b.questions.iter())
            .find(|q| q.id == question_id)
    }

    pub fn total_questions(&self) -> usize {
        self.blocks.iter().map(|b| b.questions.len()).sum()
    }
}

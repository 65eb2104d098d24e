use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    pub selected_options: BTreeSet<usize>,
}

/// The answer store for the attempt in progress: question id → current
/// selection set. A missing entry and an empty selection both mean
/// "unanswered". Option-index bounds are guaranteed upstream by the content
/// model, so this is deliberately a dumb map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSheet {
    answers: BTreeMap<String, UserAnswer>,
}

impl AnswerSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole-set replacement, never additive. A single-choice selection is a
    /// one-element set; a checkbox toggle is computed by the caller before
    /// calling in.
    pub fn set_answer(&mut self, question_id: &str, selected_options: BTreeSet<usize>) {
        self.answers.insert(
            question_id.to_string(),
            UserAnswer {
                question_id: question_id.to_string(),
                selected_options,
            },
        );
    }

    /// `None` means unanswered, including an entry whose selection set is
    /// empty.
    pub fn get_answer(&self, question_id: &str) -> Option<&UserAnswer> {
        self.answers
            .get(question_id)
            .filter(|a| !a.selected_options.is_empty())
    }

    pub fn clear(&mut self, question_id: &str) {
        self.answers.remove(question_id);
    }

    pub fn answered_count(&self) -> usize {
        self.answers
            .values()
            .filter(|a| !a.selected_options.is_empty())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserAnswer> {
        self.answers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

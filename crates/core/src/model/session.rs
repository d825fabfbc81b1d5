use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SavedSessionError {
    #[error("a session needs at least one question")]
    NoQuestions,

    #[error("question index {index} is out of bounds for {questions} questions")]
    IndexOutOfRange { index: usize, questions: usize },
}

/// A partially answered quiz that can be resumed later, possibly on another
/// device.
///
/// The answer list is position-aligned with the question list: `answers[i]`
/// is the chosen option for `question_ids[i]`, or `None` while unanswered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    question_ids: Vec<String>,
    answers: Vec<Option<u8>>,
    current_index: usize,
    remaining_secs: u32,
    started_at: DateTime<Utc>,
}

impl SavedSession {
    /// Starts a fresh session over the given question list.
    ///
    /// # Errors
    ///
    /// Returns [`SavedSessionError::NoQuestions`] for an empty list.
    pub fn new(
        question_ids: Vec<String>,
        remaining_secs: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SavedSessionError> {
        if question_ids.is_empty() {
            return Err(SavedSessionError::NoQuestions);
        }
        let answers = vec![None; question_ids.len()];
        Ok(Self {
            question_ids,
            answers,
            current_index: 0,
            remaining_secs,
            started_at,
        })
    }

    #[must_use]
    pub fn question_ids(&self) -> &[String] {
        &self.question_ids
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<u8>] {
        &self.answers
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of questions with a recorded answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    /// True once every question has an answer.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// Records an answer for the current question and moves to the next one.
    ///
    /// The cursor stops on the last question rather than running past the
    /// end; completion is observable via [`SavedSession::is_complete`].
    #[must_use]
    pub fn with_answer(&self, choice: u8) -> Self {
        let mut next = self.clone();
        next.answers[next.current_index] = Some(choice);
        next.current_index = (next.current_index + 1).min(next.question_ids.len() - 1);
        next
    }

    /// Moves the cursor to an arbitrary question, for back-navigation.
    ///
    /// # Errors
    ///
    /// Returns [`SavedSessionError::IndexOutOfRange`] for indexes past the
    /// question list.
    pub fn with_index(&self, index: usize) -> Result<Self, SavedSessionError> {
        if index >= self.question_ids.len() {
            return Err(SavedSessionError::IndexOutOfRange {
                index,
                questions: self.question_ids.len(),
            });
        }
        let mut next = self.clone();
        next.current_index = index;
        Ok(next)
    }

    /// Stores the countdown timer value at save time.
    #[must_use]
    pub fn with_remaining_secs(&self, remaining_secs: u32) -> Self {
        let mut next = self.clone();
        next.remaining_secs = remaining_secs;
        next
    }

    /// Checks the structural invariants after deserialization.
    ///
    /// Documents written by other clients or older versions may disagree
    /// with themselves; such sessions are dropped rather than resumed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.question_ids.is_empty()
            && self.answers.len() == self.question_ids.len()
            && self.current_index < self.question_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn questions(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("q{i}")).collect()
    }

    #[test]
    fn new_session_starts_unanswered() {
        let session = SavedSession::new(questions(3), 600, fixed_now()).unwrap();
        assert_eq!(session.answers(), &[None, None, None]);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.answered_count(), 0);
        assert!(!session.is_complete());
        assert!(session.is_consistent());
    }

    #[test]
    fn rejects_empty_question_list() {
        assert_eq!(
            SavedSession::new(Vec::new(), 600, fixed_now()),
            Err(SavedSessionError::NoQuestions)
        );
    }

    #[test]
    fn answering_advances_and_completes() {
        let session = SavedSession::new(questions(2), 600, fixed_now()).unwrap();
        let session = session.with_answer(1);
        assert_eq!(session.answers(), &[Some(1), None]);
        assert_eq!(session.current_index(), 1);

        let session = session.with_answer(3);
        assert!(session.is_complete());
        // Cursor stays on the last question.
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn back_navigation_validates_bounds() {
        let session = SavedSession::new(questions(3), 600, fixed_now()).unwrap();
        let session = session.with_answer(0).with_answer(2);
        let back = session.with_index(0).unwrap();
        assert_eq!(back.current_index(), 0);
        // Answers survive navigation.
        assert_eq!(back.answers(), &[Some(0), Some(2), None]);

        assert_eq!(
            session.with_index(3),
            Err(SavedSessionError::IndexOutOfRange {
                index: 3,
                questions: 3
            })
        );
    }

    #[test]
    fn timer_updates_are_pure() {
        let session = SavedSession::new(questions(1), 600, fixed_now()).unwrap();
        let ticked = session.with_remaining_secs(540);
        assert_eq!(ticked.remaining_secs(), 540);
        assert_eq!(session.remaining_secs(), 600);
    }

    #[test]
    fn consistency_flags_corrupt_documents() {
        let good = SavedSession::new(questions(2), 60, fixed_now()).unwrap();
        assert!(good.is_consistent());

        let mismatched = SavedSession {
            question_ids: questions(2),
            answers: vec![None],
            current_index: 0,
            remaining_secs: 60,
            started_at: fixed_now(),
        };
        assert!(!mismatched.is_consistent());

        let runaway_cursor = SavedSession {
            question_ids: questions(2),
            answers: vec![None, None],
            current_index: 2,
            remaining_secs: 60,
            started_at: fixed_now(),
        };
        assert!(!runaway_cursor.is_consistent());
    }
}

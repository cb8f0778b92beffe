//! Score arithmetic shared by auto-grading and the manual grading workflow.

use std::collections::HashSet;

use thiserror::Error;

use crate::model::{
    Answer, AnswerOption, Correctness, Exam, ExamAnswer, ExamQuestionId, ItemScore, OptionId,
    PracticeQuestion,
};

/// Projects pass at this share of their max points.
pub const PROJECT_PASS_PERCENT: u8 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GradingError {
    #[error("score {score} exceeds maximum {max}")]
    ScoreExceedsMax { score: u32, max: u32 },

    #[error("question {0} is not part of this exam")]
    UnknownQuestion(ExamQuestionId),

    #[error("question {0} was scored more than once")]
    DuplicateItem(ExamQuestionId),

    #[error("option {0} is not an option of this question")]
    UnknownOption(OptionId),

    #[error("answer format does not match the question type")]
    AnswerMismatch,
}

/// Integer percentage, halves rounding up. A zero maximum counts as 100%.
#[must_use]
pub fn percentage(score: u32, max: u32) -> u8 {
    if max == 0 {
        return 100;
    }
    let (score, max) = (u64::from(score), u64::from(max));
    let rounded = (score * 200 + max) / (max * 2);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// Exact comparison `score / max >= threshold%` without rounding.
#[must_use]
pub fn meets_threshold(score: u32, max: u32, threshold_percent: u8) -> bool {
    u64::from(score) * 100 >= u64::from(threshold_percent) * u64::from(max)
}

/// Total, percentage and pass flag for one graded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSummary {
    pub score: u32,
    pub max_score: u32,
    pub percentage: u8,
    pub passed: bool,
}

impl ScoreSummary {
    /// # Errors
    ///
    /// Returns `GradingError::ScoreExceedsMax` if `score > max_score`.
    pub fn evaluate(score: u32, max_score: u32, threshold_percent: u8) -> Result<Self, GradingError> {
        if score > max_score {
            return Err(GradingError::ScoreExceedsMax {
                score,
                max: max_score,
            });
        }
        Ok(Self {
            score,
            max_score,
            percentage: percentage(score, max_score),
            passed: meets_threshold(score, max_score, threshold_percent),
        })
    }
}

fn check_choice(
    options: &[AnswerOption],
    picked: OptionId,
) -> Result<bool, GradingError> {
    options
        .iter()
        .find(|o| o.id == picked)
        .map(|o| o.is_correct)
        .ok_or(GradingError::UnknownOption(picked))
}

/// Grade a practice answer on submission.
///
/// Choice questions are settled immediately; coding answers come back
/// `Pending` with zero points until reviewed.
///
/// # Errors
///
/// Returns `GradingError::AnswerMismatch` when the answer format does not fit
/// the question, or `GradingError::UnknownOption` for a foreign option id.
pub fn grade_practice_answer(
    question: &PracticeQuestion,
    answer: &Answer,
) -> Result<(Correctness, u32), GradingError> {
    match (question.answer_type().is_choice(), answer) {
        (true, Answer::Choice(picked)) => {
            if check_choice(question.options(), *picked)? {
                Ok((Correctness::Correct, question.points()))
            } else {
                Ok((Correctness::Incorrect, 0))
            }
        }
        (false, Answer::Text(_)) => Ok((Correctness::Pending, 0)),
        _ => Err(GradingError::AnswerMismatch),
    }
}

/// Result of grading the choice questions of an exam attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoGrade {
    pub item_scores: Vec<ItemScore>,
    pub score: u32,
    pub max_score: u32,
    /// True when at least one question needs a human grader.
    pub needs_manual: bool,
}

/// Score every choice question of an attempt. Unanswered questions earn
/// nothing.
///
/// # Errors
///
/// Returns `GradingError` for answers to foreign questions, duplicate answers,
/// foreign options, or answers whose format does not fit the question.
pub fn auto_grade_exam(exam: &Exam, answers: &[ExamAnswer]) -> Result<AutoGrade, GradingError> {
    let mut seen = HashSet::new();
    for answer in answers {
        if exam.question(answer.question_id).is_none() {
            return Err(GradingError::UnknownQuestion(answer.question_id));
        }
        if !seen.insert(answer.question_id) {
            return Err(GradingError::DuplicateItem(answer.question_id));
        }
    }

    let mut item_scores = Vec::new();
    for question in exam.questions().iter().filter(|q| q.kind().is_choice()) {
        let given = answers.iter().find(|a| a.question_id == question.id());
        let score = match given.map(|a| &a.answer) {
            None => 0,
            Some(Answer::Choice(picked)) => {
                if check_choice(question.options(), *picked)? {
                    question.points()
                } else {
                    0
                }
            }
            Some(Answer::Text(_)) => return Err(GradingError::AnswerMismatch),
        };
        item_scores.push(ItemScore {
            question_id: question.id(),
            score,
        });
    }

    let needs_manual = exam.requires_manual_grading();
    for answer in answers {
        let manual = exam
            .question(answer.question_id)
            .is_some_and(|q| q.kind().requires_manual_grading());
        if manual && matches!(answer.answer, Answer::Choice(_)) {
            return Err(GradingError::AnswerMismatch);
        }
    }

    Ok(AutoGrade {
        score: item_scores
            .iter()
            .fold(0u32, |total, i| total.saturating_add(i.score)),
        item_scores,
        max_score: exam.max_score(),
        needs_manual,
    })
}

/// Sum a grader's itemized scores after checking each against its question.
///
/// # Errors
///
/// Returns `GradingError` for unknown or repeated questions and for any item
/// scored above its question's points.
pub fn itemized_total(exam: &Exam, items: &[ItemScore]) -> Result<u32, GradingError> {
    let mut seen = HashSet::new();
    let mut total = 0_u32;
    for item in items {
        let question = exam
            .question(item.question_id)
            .ok_or(GradingError::UnknownQuestion(item.question_id))?;
        if !seen.insert(item.question_id) {
            return Err(GradingError::DuplicateItem(item.question_id));
        }
        if item.score > question.points() {
            return Err(GradingError::ScoreExceedsMax {
                score: item.score,
                max: question.points(),
            });
        }
        total = total.saturating_add(item.score);
    }
    Ok(total)
}

/// Merge a grader's items over the auto-graded ones; grader entries win.
#[must_use]
pub fn merge_item_scores(auto: &[ItemScore], manual: &[ItemScore]) -> Vec<ItemScore> {
    let mut merged: Vec<ItemScore> = auto
        .iter()
        .filter(|a| !manual.iter().any(|m| m.question_id == a.question_id))
        .copied()
        .collect();
    merged.extend_from_slice(manual);
    merged.sort_by_key(|i| i.question_id);
    merged
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AnswerOption, AnswerType, ExamId, ExamQuestion, ExamQuestionKind, ExamScope, ModuleId,
        QuestionId,
    };

    fn choice_options() -> Vec<AnswerOption> {
        vec![
            AnswerOption::new(OptionId::new(1), "true", true),
            AnswerOption::new(OptionId::new(2), "false", false),
        ]
    }

    fn mixed_exam() -> Exam {
        let tf = ExamQuestion::new(
            ExamQuestionId::new(1),
            1,
            "Go has generics",
            ExamQuestionKind::TrueFalse,
            40,
            choice_options(),
        )
        .unwrap();
        let essay = ExamQuestion::new(
            ExamQuestionId::new(2),
            2,
            "Explain goroutines",
            ExamQuestionKind::Essay,
            60,
            Vec::new(),
        )
        .unwrap();
        Exam::new(
            ExamId::new(1),
            ExamScope::Module(ModuleId::new(1)),
            "Quiz",
            70,
            30,
            vec![tf, essay],
        )
        .unwrap()
    }

    #[test]
    fn percentage_rounds_and_handles_zero_max() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(80, 100), 80);
    }

    #[test]
    fn project_threshold_is_sixty_percent() {
        assert!(!meets_threshold(55, 100, PROJECT_PASS_PERCENT));
        assert!(meets_threshold(60, 100, PROJECT_PASS_PERCENT));
        assert!(meets_threshold(61, 100, PROJECT_PASS_PERCENT));
        // 59.5% rounds to 60 but does not pass.
        assert!(!meets_threshold(119, 200, PROJECT_PASS_PERCENT));
    }

    #[test]
    fn summary_rejects_score_above_max() {
        let err = ScoreSummary::evaluate(101, 100, 70).unwrap_err();
        assert_eq!(err, GradingError::ScoreExceedsMax { score: 101, max: 100 });

        let ok = ScoreSummary::evaluate(80, 100, 70).unwrap();
        assert!(ok.passed);
        assert_eq!(ok.percentage, 80);
    }

    #[test]
    fn practice_choice_is_graded_immediately() {
        let q = PracticeQuestion::new(
            QuestionId::new(1),
            ModuleId::new(1),
            1,
            "Go is compiled",
            AnswerType::TrueFalse,
            5,
            choice_options(),
        )
        .unwrap();
        assert_eq!(
            grade_practice_answer(&q, &Answer::Choice(OptionId::new(1))).unwrap(),
            (Correctness::Correct, 5)
        );
        assert_eq!(
            grade_practice_answer(&q, &Answer::Choice(OptionId::new(2))).unwrap(),
            (Correctness::Incorrect, 0)
        );
        assert_eq!(
            grade_practice_answer(&q, &Answer::Choice(OptionId::new(9))).unwrap_err(),
            GradingError::UnknownOption(OptionId::new(9))
        );
        assert_eq!(
            grade_practice_answer(&q, &Answer::Text("true".into())).unwrap_err(),
            GradingError::AnswerMismatch
        );
    }

    #[test]
    fn practice_coding_is_pending() {
        let q = PracticeQuestion::new(
            QuestionId::new(2),
            ModuleId::new(1),
            2,
            "Reverse a string",
            AnswerType::Coding,
            10,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(
            grade_practice_answer(&q, &Answer::Text("func rev() {}".into())).unwrap(),
            (Correctness::Pending, 0)
        );
    }

    #[test]
    fn auto_grade_scores_choice_and_flags_manual() {
        let exam = mixed_exam();
        let answers = vec![
            ExamAnswer {
                question_id: ExamQuestionId::new(1),
                answer: Answer::Choice(OptionId::new(2)),
            },
            ExamAnswer {
                question_id: ExamQuestionId::new(2),
                answer: Answer::Text("They are green threads".into()),
            },
        ];
        let graded = auto_grade_exam(&exam, &answers).unwrap();
        assert_eq!(graded.score, 0);
        assert_eq!(graded.max_score, 100);
        assert!(graded.needs_manual);
        assert_eq!(graded.item_scores.len(), 1);
    }

    #[test]
    fn auto_grade_rejects_foreign_and_duplicate_answers() {
        let exam = mixed_exam();
        let foreign = vec![ExamAnswer {
            question_id: ExamQuestionId::new(9),
            answer: Answer::Text(String::new()),
        }];
        assert_eq!(
            auto_grade_exam(&exam, &foreign).unwrap_err(),
            GradingError::UnknownQuestion(ExamQuestionId::new(9))
        );

        let twice = vec![
            ExamAnswer {
                question_id: ExamQuestionId::new(1),
                answer: Answer::Choice(OptionId::new(1)),
            },
            ExamAnswer {
                question_id: ExamQuestionId::new(1),
                answer: Answer::Choice(OptionId::new(2)),
            },
        ];
        assert_eq!(
            auto_grade_exam(&exam, &twice).unwrap_err(),
            GradingError::DuplicateItem(ExamQuestionId::new(1))
        );
    }

    #[test]
    fn itemized_total_validates_each_item() {
        let exam = mixed_exam();
        let items = vec![
            ItemScore {
                question_id: ExamQuestionId::new(1),
                score: 40,
            },
            ItemScore {
                question_id: ExamQuestionId::new(2),
                score: 45,
            },
        ];
        assert_eq!(itemized_total(&exam, &items).unwrap(), 85);

        let too_high = vec![ItemScore {
            question_id: ExamQuestionId::new(2),
            score: 61,
        }];
        assert_eq!(
            itemized_total(&exam, &too_high).unwrap_err(),
            GradingError::ScoreExceedsMax { score: 61, max: 60 }
        );
    }

    #[test]
    fn merge_prefers_manual_items() {
        let auto = vec![ItemScore {
            question_id: ExamQuestionId::new(1),
            score: 0,
        }];
        let manual = vec![
            ItemScore {
                question_id: ExamQuestionId::new(2),
                score: 50,
            },
            ItemScore {
                question_id: ExamQuestionId::new(1),
                score: 40,
            },
        ];
        let merged = merge_item_scores(&auto, &manual);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].score, 40);
        assert_eq!(merged[1].score, 50);
    }
}

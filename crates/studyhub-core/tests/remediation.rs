//! End-to-end quiz runs: load a bank from disk, answer through the
//! controller, and check what lands in the progress store.

use studyhub_core::bank::FileBankSource;
use studyhub_core::controller::QuizController;
use studyhub_core::engine::EngineConfig;
use studyhub_core::model::{QuestionType, RequestedCount, UserAnswer};
use studyhub_core::progress::{ProgressConfig, ProgressStore};
use studyhub_core::store::FileStore;
use studyhub_core::traits::BankSource;

const ELECTROLYTES: &str = r#"
{
  "module": "Electrolytes",
  "questions": [
    {
      "id": "na-range",
      "type": "fill_blank",
      "question": "Normal serum sodium is ___ mEq/L.",
      "answer": "135-145",
      "rationale": "Sodium 135-145 mEq/L."
    },
    {
      "id": "k-low",
      "question": "Which finding suggests hypokalemia?",
      "options": {"A": "Peaked T waves", "B": "U waves", "C": "Wide QRS"},
      "correct": "B",
      "rationale": "U waves appear with low potassium."
    },
    {
      "id": "ca-signs",
      "question": "Signs of hypocalcemia? Select all that apply.",
      "options": [
        {"text": "Chvostek sign", "isCorrect": true},
        {"text": "Trousseau sign", "isCorrect": true},
        {"text": "Bradycardia", "isCorrect": false}
      ],
      "rationale": "Neuromuscular irritability."
    },
    {
      "question": "",
      "options": ["a", "b"],
      "correct": "A"
    }
  ]
}
"#;

fn correct_answer(q: &studyhub_core::model::Question) -> UserAnswer {
    match q.question_type {
        QuestionType::FillBlank => UserAnswer::Blanks(q.blank_answers.clone()),
        _ => UserAnswer::Choices(q.correct.iter().copied().collect()),
    }
}

fn wrong_answer(q: &studyhub_core::model::Question) -> UserAnswer {
    match q.question_type {
        QuestionType::FillBlank => UserAnswer::Blanks(vec!["999".into(); q.blank_answers.len()]),
        _ => {
            let wrong = (0..q.options.len())
                .find(|i| !q.correct.contains(i))
                .unwrap_or(0);
            UserAnswer::Choices(vec![wrong])
        }
    }
}

#[tokio::test]
async fn bank_from_disk_runs_to_mastery() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Electrolytes.json"), ELECTROLYTES).unwrap();

    let source = FileBankSource::new(dir.path());
    let bank = source.load_bank("Electrolytes").await.unwrap();
    // The question with an empty stem is skipped.
    assert_eq!(bank.len(), 3);
    assert_eq!(bank.questions[2].question_type, QuestionType::MultiSelect);

    let store = FileStore::open(dir.path().join("progress.json")).unwrap();
    let progress = ProgressStore::new(store, ProgressConfig::default());
    let mut controller = QuizController::new(EngineConfig::default(), progress).with_seed(11);

    let mut snapshot = controller.start(&bank, RequestedCount::All).unwrap();
    let mut seen_wrong = std::collections::HashSet::new();
    let mut steps = 0;
    while let Some(q) = snapshot.question.clone() {
        // Miss every question once, then get it right.
        let answer = if seen_wrong.insert(q.id.clone()) {
            wrong_answer(&q)
        } else {
            correct_answer(&q)
        };
        controller.submit(&answer).unwrap();
        snapshot = controller.next().unwrap();
        steps += 1;
        assert!(steps < 50);
    }

    let summary = controller.finish().unwrap();
    assert_eq!(summary.first_try_total, 3);
    assert_eq!(summary.first_try_correct_count, 0);
    assert_eq!(summary.total_answered, 6);
    assert_eq!(summary.missed_questions.len(), 3);
    assert_eq!(summary.first_try_percentage(), Some(0));
    assert!(summary.review.iter().all(|item| item.correct));

    // Progress survives reopening the file.
    let reopened = FileStore::open(dir.path().join("progress.json")).unwrap();
    let progress = ProgressStore::new(reopened, ProgressConfig::default());
    assert_eq!(progress.attempts("na-range"), 2);
    assert_eq!(progress.answered_today(), 6);
    assert_eq!(progress.category_scores("Electrolytes"), vec![0]);
}

#[tokio::test]
async fn fill_blank_range_variants_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Electrolytes.json"), ELECTROLYTES).unwrap();
    let bank = FileBankSource::new(dir.path())
        .load_bank("Electrolytes")
        .await
        .unwrap();

    let q = bank.questions.iter().find(|q| q.id == "na-range").unwrap();
    for typed in ["135-145", "135 \u{2013} 145", "135\u{2212}145 mEq/L", "135145"] {
        let check = studyhub_core::matching::check_answer(q, &UserAnswer::Blanks(vec![typed.into()]))
            .unwrap();
        assert!(check.is_correct, "{typed} should be accepted");
    }
    let check =
        studyhub_core::matching::check_answer(q, &UserAnswer::Blanks(vec!["200".into()])).unwrap();
    assert!(!check.is_correct);
}

#[tokio::test]
async fn missing_module_is_a_retryable_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = FileBankSource::new(dir.path())
        .load_bank("Nope")
        .await
        .unwrap_err();
    assert_eq!(err.recovery(), studyhub_core::error::Recovery::Retry);
}

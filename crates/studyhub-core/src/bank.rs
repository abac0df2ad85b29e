//! Question bank loader and normalizer.
//!
//! Banks arrive as JSON in a handful of historical shapes. Everything is
//! normalized into [`Question`] at load time so the engine only ever sees one
//! representation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::QuizError;
use crate::model::{AnswerOption, Question, QuestionBank, QuestionType};
use crate::traits::BankSource;

/// What to do when a single question in a bank is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BankPolicy {
    /// Log a warning and drop the question.
    #[default]
    SkipMalformed,
    /// Fail the whole load.
    Abort,
}

/// Top-level bank shapes: a bare array or an object wrapping `questions`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBank {
    List(Vec<Value>),
    Wrapped {
        questions: Vec<Value>,
        #[serde(default, alias = "moduleName")]
        module: Option<String>,
    },
}

/// Intermediate structure for one question object. Field names cover every
/// bank format in circulation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQuestion {
    stable_id: Option<Value>,
    id: Option<Value>,
    stem: Option<String>,
    question: Option<String>,
    prompt: Option<String>,
    text: Option<String>,
    options: Option<Value>,
    choices: Option<Value>,
    answers: Option<Value>,
    correct: Option<Value>,
    answer: Option<Value>,
    correct_answer: Option<Value>,
    #[serde(rename = "correctAnswers")]
    correct_answers_camel: Option<Value>,
    correct_answers: Option<Value>,
    key: Option<Value>,
    answers_key: Option<Value>,
    rationale: Option<String>,
    explanation: Option<String>,
    why: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
}

impl RawQuestion {
    fn stem(&self) -> Option<&str> {
        [&self.stem, &self.question, &self.prompt, &self.text]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    fn options(&self) -> Option<&Value> {
        [&self.options, &self.choices, &self.answers]
            .into_iter()
            .flatten()
            .find(|v| !is_empty_value(v))
    }

    fn rationale(&self) -> String {
        [&self.rationale, &self.explanation, &self.why]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_default()
    }

    fn correctness(&self) -> Option<&Value> {
        [
            &self.correct,
            &self.answer,
            &self.correct_answer,
            &self.correct_answers_camel,
            &self.correct_answers,
            &self.key,
            &self.answers_key,
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
    }
}

/// Parse a JSON string into a bank.
pub fn parse_bank_str(content: &str, module: &str, policy: BankPolicy) -> Result<QuestionBank, QuizError> {
    let raw: Value = serde_json::from_str(content)
        .map_err(|e| QuizError::DataFormat(format!("invalid JSON for module {module}: {e}")))?;
    normalize_bank(&raw, module, policy)
}

/// Normalize an already-parsed JSON document into a bank.
pub fn normalize_bank(raw: &Value, module: &str, policy: BankPolicy) -> Result<QuestionBank, QuizError> {
    let parsed: RawBank = RawBank::deserialize(raw).map_err(|_| {
        QuizError::DataFormat(format!(
            "module {module}: expected an array of questions or an object with a `questions` array"
        ))
    })?;

    let (items, module) = match parsed {
        RawBank::List(items) => (items, module.to_string()),
        RawBank::Wrapped {
            questions,
            module: named,
        } => (
            questions,
            named.filter(|m| !m.is_empty()).unwrap_or_else(|| module.to_string()),
        ),
    };

    let mut questions = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match normalize_question(item, &module, index) {
            Ok(q) => questions.push(q),
            Err(e) => match policy {
                BankPolicy::SkipMalformed => {
                    tracing::warn!("skipping question in {module}: {e}");
                }
                BankPolicy::Abort => return Err(e),
            },
        }
    }

    tracing::debug!(
        "normalized {} of {} questions from {module}",
        questions.len(),
        items.len()
    );

    Ok(QuestionBank { module, questions })
}

/// Normalize a single question object.
///
/// `module` and `index` are only used to derive a stable id when the
/// question carries none.
pub fn normalize_question(raw: &Value, module: &str, index: usize) -> Result<Question, QuizError> {
    let malformed = |reason: &str| QuizError::MalformedQuestion {
        index,
        reason: reason.to_string(),
    };

    let q = RawQuestion::deserialize(raw).map_err(|e| malformed(&e.to_string()))?;

    let stem = q.stem().ok_or_else(|| malformed("missing stem/question text"))?.to_string();
    let id = stable_id(&q, module, index);
    let explicit_type = match q.kind.as_deref() {
        Some(kind) => kind.parse::<QuestionType>().ok(),
        None => None,
    };

    let raw_options = q.options();
    let is_fill_blank = explicit_type == Some(QuestionType::FillBlank)
        || (raw_options.is_none() && q.correctness().is_some());

    if is_fill_blank {
        let answers = q
            .correctness()
            .map(blank_answers)
            .unwrap_or_default();
        if answers.is_empty() || answers.iter().any(|a| a.trim().is_empty()) {
            return Err(malformed("missing blank answer(s)"));
        }
        return Ok(Question {
            id,
            stem,
            options: vec![],
            correct: BTreeSet::new(),
            rationale: q.rationale(),
            question_type: QuestionType::FillBlank,
            blank_answers: answers,
            category: q.category.clone(),
        });
    }

    let raw_options = raw_options.ok_or_else(|| malformed("missing options"))?;
    let (texts, flags) = parse_options(raw_options).map_err(|r| malformed(&r))?;
    if texts.is_empty() {
        return Err(malformed("missing options"));
    }

    let correct: BTreeSet<usize> = match q.correctness() {
        Some(value) if !value.is_boolean() => answer_indices(value, texts.len()).map_err(|r| malformed(&r))?,
        _ => flags
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| i)
            .collect(),
    };
    if correct.is_empty() {
        return Err(malformed("missing correct answer(s)"));
    }

    let question_type = match explicit_type {
        Some(t) => t,
        None if correct.len() > 1 => QuestionType::MultiSelect,
        None => QuestionType::SingleSelect,
    };

    let options = texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| AnswerOption {
            text,
            is_correct: correct.contains(&i),
        })
        .collect();

    Ok(Question {
        id,
        stem,
        options,
        correct,
        rationale: q.rationale(),
        question_type,
        blank_answers: vec![],
        category: q.category.clone(),
    })
}

fn stable_id(q: &RawQuestion, module: &str, index: usize) -> String {
    let explicit = [&q.stable_id, &q.id]
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    explicit.unwrap_or_else(|| {
        let module = if module.is_empty() { "unknown" } else { module };
        format!("{module}::{index}")
    })
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Returns option texts plus per-option correctness flags (all `false` when
/// the format carries none).
fn parse_options(raw: &Value) -> std::result::Result<(Vec<String>, Vec<bool>), String> {
    match raw {
        Value::Array(items) => {
            let mut texts = Vec::with_capacity(items.len());
            let mut flags = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => {
                        texts.push(s.clone());
                        flags.push(false);
                    }
                    Value::Object(obj) => {
                        let text = obj
                            .get("text")
                            .and_then(Value::as_str)
                            .ok_or("option object without `text`")?;
                        let flag = ["isCorrect", "is_correct", "correct"]
                            .iter()
                            .find_map(|k| obj.get(*k).and_then(Value::as_bool))
                            .unwrap_or(false);
                        texts.push(text.to_string());
                        flags.push(flag);
                    }
                    Value::Number(n) => {
                        texts.push(n.to_string());
                        flags.push(false);
                    }
                    _ => return Err("unsupported option value".into()),
                }
            }
            Ok((texts, flags))
        }
        Value::Object(map) => {
            // Letter-keyed map, e.g. {"A": "...", "B": "..."}.
            let sorted: BTreeMap<String, String> = map
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.to_uppercase(), text)
                })
                .collect();
            let flags = vec![false; sorted.len()];
            Ok((sorted.into_values().collect(), flags))
        }
        _ => Err("options must be an array or a letter-keyed object".into()),
    }
}

/// Correct answers given as letters (`"A"`, `"AC"`, `"A, C"`, `["A", "C"]`)
/// or zero-based option indices (`1`, `[0, 2]`).
fn answer_indices(value: &Value, option_count: usize) -> std::result::Result<BTreeSet<usize>, String> {
    let mut indices = BTreeSet::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => indices.extend(letters_to_indices(s, option_count)?),
                    Value::Number(_) => {
                        indices.insert(numeric_index(item, option_count)?);
                    }
                    _ => return Err("correct answers must be letters or option indices".into()),
                }
            }
        }
        Value::String(s) => indices.extend(letters_to_indices(s, option_count)?),
        Value::Number(_) => {
            indices.insert(numeric_index(value, option_count)?);
        }
        _ => return Err("correct answer must be letters or option indices".into()),
    }
    Ok(indices)
}

fn letters_to_indices(raw: &str, option_count: usize) -> std::result::Result<BTreeSet<usize>, String> {
    let mut indices = BTreeSet::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        if !token.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid correct answer letter \"{token}\""));
        }
        for c in token.chars() {
            let index = (c.to_ascii_uppercase() as u8 - b'A') as usize;
            if index >= option_count {
                return Err(format!(
                    "correct answer letter \"{c}\" out of range for {option_count} options"
                ));
            }
            indices.insert(index);
        }
    }
    if indices.is_empty() {
        return Err("empty correct answer letter".into());
    }
    Ok(indices)
}

fn numeric_index(value: &Value, option_count: usize) -> std::result::Result<usize, String> {
    match value.as_u64().and_then(|n| usize::try_from(n).ok()) {
        Some(index) if index < option_count => Ok(index),
        _ => Err(format!(
            "correct answer index {value} out of range for {option_count} options"
        )),
    }
}

fn blank_answers(value: &Value) -> Vec<String> {
    let scalar = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                // Several acceptable answers for one blank: the first is canonical.
                Value::Array(alternatives) => alternatives.first().and_then(scalar),
                other => scalar(other),
            })
            .collect(),
        other => scalar(other).into_iter().collect(),
    }
}

/// Load a bank from a JSON file. The module name is the file stem.
pub fn load_bank_file(path: &Path) -> Result<QuestionBank> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read question bank: {}", path.display()))?;
    let module = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_bank_str(&content, &module, BankPolicy::SkipMalformed)
        .with_context(|| format!("failed to load question bank: {}", path.display()))
}

/// Recursively load all `.json` banks from a directory.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<QuestionBank>> {
    let mut banks = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            banks.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            match load_bank_file(&path) {
                Ok(bank) => banks.push(bank),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(banks)
}

/// A warning from bank validation.
#[derive(Debug, Clone)]
pub struct BankWarning {
    /// The question ID (if applicable).
    pub question_id: Option<String>,
    pub message: String,
}

/// Validate a bank for common authoring issues.
pub fn validate_bank(bank: &QuestionBank) -> Vec<BankWarning> {
    let mut warnings = Vec::new();

    let mut seen_ids = HashSet::new();
    for q in &bank.questions {
        if !seen_ids.insert(q.id.as_str()) {
            warnings.push(BankWarning {
                question_id: Some(q.id.clone()),
                message: format!("duplicate question ID: {}", q.id),
            });
        }
    }

    for q in &bank.questions {
        if q.rationale.trim().is_empty() {
            warnings.push(BankWarning {
                question_id: Some(q.id.clone()),
                message: "rationale is empty".into(),
            });
        }
        if q.question_type == QuestionType::SingleSelect && q.correct.len() > 1 {
            warnings.push(BankWarning {
                question_id: Some(q.id.clone()),
                message: format!(
                    "single_select question has {} correct options and can never be answered correctly",
                    q.correct.len()
                ),
            });
        }
    }

    if bank.is_empty() {
        warnings.push(BankWarning {
            question_id: None,
            message: "bank has no questions".into(),
        });
    }

    warnings
}

/// Loads `{root}/{module}.json` from the local filesystem.
pub struct FileBankSource {
    root: PathBuf,
}

impl FileBankSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BankSource for FileBankSource {
    async fn load_bank(&self, module: &str) -> std::result::Result<QuestionBank, QuizError> {
        let path = self.root.join(format!("{module}.json"));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| QuizError::Network(format!("{}: {e}", path.display())))?;
        parse_bank_str(&content, module, BankPolicy::SkipMalformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_bare_array_with_letters() {
        let raw = json!([
            {
                "id": "pharm-1",
                "stem": "Which drug is a loop diuretic?",
                "options": ["Furosemide", "Spironolactone", "Lisinopril"],
                "correct": "A",
                "rationale": "Furosemide acts on the loop of Henle."
            }
        ]);
        let bank = normalize_bank(&raw, "Pharm", BankPolicy::Abort).unwrap();
        assert_eq!(bank.module, "Pharm");
        assert_eq!(bank.len(), 1);
        let q = &bank.questions[0];
        assert_eq!(q.id, "pharm-1");
        assert_eq!(q.question_type, QuestionType::SingleSelect);
        assert!(q.options[0].is_correct);
        assert!(!q.options[1].is_correct);
    }

    #[test]
    fn parse_wrapped_object_uses_module_name() {
        let raw = json!({
            "module": "Module_1",
            "questions": [
                {"question": "Pick two", "options": ["a", "b", "c"], "correct": ["a", "C"]}
            ]
        });
        let bank = normalize_bank(&raw, "fallback", BankPolicy::Abort).unwrap();
        assert_eq!(bank.module, "Module_1");
        let q = &bank.questions[0];
        assert_eq!(q.id, "Module_1::0");
        assert_eq!(q.question_type, QuestionType::MultiSelect);
        assert_eq!(q.correct, BTreeSet::from([0, 2]));
    }

    #[test]
    fn letter_and_flag_encodings_normalize_identically() {
        let letters = json!([{
            "id": "q7",
            "stem": "Signs of hypokalemia?",
            "options": ["Muscle weakness", "Peaked T waves", "U waves"],
            "correct": ["A", "C"],
            "rationale": "Low potassium flattens T waves.",
            "type": "multi_select"
        }]);
        let flags = json!([{
            "id": "q7",
            "stem": "Signs of hypokalemia?",
            "options": [
                {"text": "Muscle weakness", "isCorrect": true},
                {"text": "Peaked T waves", "isCorrect": false},
                {"text": "U waves", "correct": true}
            ],
            "rationale": "Low potassium flattens T waves.",
            "type": "multi_select"
        }]);
        let a = normalize_bank(&letters, "m", BankPolicy::Abort).unwrap();
        let b = normalize_bank(&flags, "m", BankPolicy::Abort).unwrap();
        assert_eq!(a.questions, b.questions);
    }

    #[test]
    fn letter_keyed_option_map() {
        let raw = json!([{
            "stem": "Priority action?",
            "options": {"b": "Call provider", "a": "Assess airway"},
            "correct_answer": "a"
        }]);
        let bank = normalize_bank(&raw, "m", BankPolicy::Abort).unwrap();
        let q = &bank.questions[0];
        assert_eq!(q.options[0].text, "Assess airway");
        assert!(q.options[0].is_correct);
    }

    #[test]
    fn fill_blank_from_nested_answers() {
        let raw = json!([{
            "id": "na",
            "question": "Normal sodium range (mEq/L)?",
            "answer": [["135"], ["145"]]
        }]);
        let bank = normalize_bank(&raw, "Lab_Values", BankPolicy::Abort).unwrap();
        let q = &bank.questions[0];
        assert_eq!(q.question_type, QuestionType::FillBlank);
        assert_eq!(q.blank_answers, vec!["135", "145"]);
        assert!(q.options.is_empty());
    }

    #[test]
    fn run_together_letters_select_every_option() {
        let raw = json!({"stem": "s", "options": ["x", "y", "z"], "correct": "AC"});
        let q = normalize_question(&raw, "m", 0).unwrap();
        assert_eq!(q.correct, BTreeSet::from([0, 2]));
        assert_eq!(q.question_type, QuestionType::MultiSelect);

        let raw = json!({"stem": "s", "options": ["x", "y", "z"], "correct": "b, C"});
        let q = normalize_question(&raw, "m", 0).unwrap();
        assert_eq!(q.correct, BTreeSet::from([1, 2]));
    }

    #[test]
    fn non_letter_answer_tokens_are_malformed() {
        for answer in ["B)", "Apple", "1a"] {
            let raw = json!({"stem": "s", "options": ["x", "y", "z"], "correct": answer});
            let err = normalize_question(&raw, "m", 0).unwrap_err();
            assert!(matches!(err, QuizError::MalformedQuestion { .. }), "{answer}");
        }
    }

    #[test]
    fn zero_based_numeric_answers() {
        let raw = json!({"stem": "s", "options": ["x", "y", "z"], "correct": 1});
        assert_eq!(normalize_question(&raw, "m", 0).unwrap().correct, BTreeSet::from([1]));

        let raw = json!({"stem": "s", "options": ["x", "y", "z"], "answers_key": [0, 2]});
        assert_eq!(normalize_question(&raw, "m", 0).unwrap().correct, BTreeSet::from([0, 2]));

        let raw = json!({"stem": "s", "options": ["x", "y"], "correct": 2});
        assert!(normalize_question(&raw, "m", 0).is_err());
    }

    #[test]
    fn alternate_field_names() {
        let raw = json!({
            "prompt": "s",
            "answers": ["x", "y"],
            "key": "B",
            "explanation": "because"
        });
        let q = normalize_question(&raw, "m", 0).unwrap();
        assert_eq!(q.options.len(), 2);
        assert_eq!(q.correct, BTreeSet::from([1]));
        assert_eq!(q.rationale, "because");

        let raw = json!({"stem": "s", "options": ["x", "y"], "correct": "A", "why": "w"});
        assert_eq!(normalize_question(&raw, "m", 0).unwrap().rationale, "w");
    }

    #[test]
    fn numeric_ids_become_strings() {
        let raw = json!([{"id": 42, "stem": "s", "options": ["x", "y"], "correct": "B"}]);
        let bank = normalize_bank(&raw, "m", BankPolicy::Abort).unwrap();
        assert_eq!(bank.questions[0].id, "42");
    }

    #[test]
    fn malformed_question_skipped_or_aborted() {
        let raw = json!([
            {"stem": "ok", "options": ["x", "y"], "correct": "A"},
            {"options": ["x", "y"], "correct": "A"},
            {"stem": "out of range", "options": ["x", "y"], "correct": "D"}
        ]);
        let bank = normalize_bank(&raw, "m", BankPolicy::SkipMalformed).unwrap();
        assert_eq!(bank.len(), 1);

        let err = normalize_bank(&raw, "m", BankPolicy::Abort).unwrap_err();
        assert!(matches!(err, QuizError::MalformedQuestion { index: 1, .. }));
    }

    #[test]
    fn missing_correct_answer_is_malformed() {
        let raw = json!({"stem": "s", "options": ["x", "y"]});
        let err = normalize_question(&raw, "m", 0).unwrap_err();
        assert!(err.to_string().contains("missing correct"));
    }

    #[test]
    fn unrecognized_shape_is_data_format_error() {
        let err = parse_bank_str(r#"{"items": []}"#, "m", BankPolicy::Abort).unwrap_err();
        assert!(matches!(err, QuizError::DataFormat(_)));
        let err = parse_bank_str("not json", "m", BankPolicy::Abort).unwrap_err();
        assert!(matches!(err, QuizError::DataFormat(_)));
    }

    #[test]
    fn validate_flags_duplicates_and_missing_rationale() {
        let raw = json!([
            {"id": "same", "stem": "a", "options": ["x", "y"], "correct": "A", "rationale": "r"},
            {"id": "same", "stem": "b", "options": ["x", "y"], "correct": "B"}
        ]);
        let bank = normalize_bank(&raw, "m", BankPolicy::Abort).unwrap();
        let warnings = validate_bank(&bank);
        assert!(warnings.iter().any(|w| w.message.contains("duplicate")));
        assert!(warnings.iter().any(|w| w.message.contains("rationale")));
    }

    #[test]
    fn load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cardio.json"),
            r#"[{"stem": "s", "options": ["x", "y"], "correct": "A"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{{{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let banks = load_bank_directory(dir.path()).unwrap();
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].module, "Cardio");
        assert_eq!(banks[0].questions[0].id, "Cardio::0");
    }

    #[tokio::test]
    async fn file_bank_source_reads_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Renal.json"),
            r#"{"questions": [{"stem": "s", "options": ["x", "y"], "correct": "B"}]}"#,
        )
        .unwrap();

        let source = FileBankSource::new(dir.path());
        let bank = source.load_bank("Renal").await.unwrap();
        assert_eq!(bank.len(), 1);

        let err = source.load_bank("Missing").await.unwrap_err();
        assert!(matches!(err, QuizError::Network(_)));
    }
}

//! # Task Configuration
//!
//! Clients send configuration as a free-form key/value bag. It is parsed once, at
//! creation, into a variant that matches the task's kind, so executors never go
//! looking for keys at run time.
//!
//! Batch evaluation accepts four mutually exclusive shapes:
//!
//! ```json
//! {"answerIds": [11, 12, 13]}
//! {"questionId": 7, "evaluateAll": false}
//! {"examId": 3, "evaluateAll": true}
//! {"examIds": [3, 4], "evaluateAll": false}
//! ```
//!
//! `evaluateAll` defaults to false, which selects only answers that have not been
//! evaluated yet.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::TaskKind;
use crate::error::{Result, TaskforgeError};

const ANSWER_IDS: &str = "answerIds";
const QUESTION_ID: &str = "questionId";
const EXAM_ID: &str = "examId";
const EXAM_IDS: &str = "examIds";
const EVALUATE_ALL: &str = "evaluateAll";

/// Configuration union, one variant per task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "settings", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskConfig {
    BatchEvaluation(BatchEvaluationConfig),
    /// Raw bag kept for task types the engine does not know. Such tasks fail at dispatch.
    Unrecognized(Value),
}

impl TaskConfig {
    /// Parse a client config bag for the given kind.
    pub fn parse(kind: Option<TaskKind>, raw: &Value) -> Result<Self> {
        match kind {
            Some(TaskKind::BatchEvaluation) => {
                Ok(Self::BatchEvaluation(BatchEvaluationConfig::from_bag(raw)?))
            }
            Some(TaskKind::BatchReevaluation) => {
                let config = BatchEvaluationConfig::from_bag(raw)?;
                Ok(Self::BatchEvaluation(BatchEvaluationConfig {
                    scope: config.scope.including_evaluated(),
                }))
            }
            None => Ok(Self::Unrecognized(raw.clone())),
        }
    }

    pub fn as_batch_evaluation(&self) -> Option<&BatchEvaluationConfig> {
        match self {
            Self::BatchEvaluation(config) => Some(config),
            Self::Unrecognized(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvaluationConfig {
    pub scope: EvaluationScope,
}

impl BatchEvaluationConfig {
    pub fn from_bag(raw: &Value) -> Result<Self> {
        let map = raw.as_object().ok_or_else(|| {
            TaskforgeError::Validation("config must be a JSON object".to_string())
        })?;
        Ok(Self {
            scope: EvaluationScope::from_bag(map)?,
        })
    }
}

/// Which answers a batch evaluation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum EvaluationScope {
    /// Exactly these answers, evaluated or not.
    #[serde(rename_all = "camelCase")]
    AnswerIds { answer_ids: Vec<i64> },
    #[serde(rename_all = "camelCase")]
    Question { question_id: i64, evaluate_all: bool },
    #[serde(rename_all = "camelCase")]
    Exam { exam_id: i64, evaluate_all: bool },
    #[serde(rename_all = "camelCase")]
    Exams { exam_ids: Vec<i64>, evaluate_all: bool },
}

impl EvaluationScope {
    fn from_bag(map: &Map<String, Value>) -> Result<Self> {
        let present: Vec<&str> = [ANSWER_IDS, QUESTION_ID, EXAM_ID, EXAM_IDS]
            .into_iter()
            .filter(|key| map.get(*key).is_some_and(|value| !value.is_null()))
            .collect();

        let key = match present.as_slice() {
            [key] => *key,
            [] => {
                return Err(TaskforgeError::Validation(format!(
                    "config must contain one of {ANSWER_IDS}, {QUESTION_ID}, {EXAM_ID} or {EXAM_IDS}"
                )))
            }
            keys => {
                return Err(TaskforgeError::Validation(format!(
                    "config keys are mutually exclusive, found: {}",
                    keys.join(", ")
                )))
            }
        };

        let evaluate_all = match map.get(EVALUATE_ALL) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(TaskforgeError::Validation(format!(
                    "{EVALUATE_ALL} must be a boolean, got {other}"
                )))
            }
        };

        let scope = match key {
            ANSWER_IDS => Self::AnswerIds {
                answer_ids: id_list(map, ANSWER_IDS)?,
            },
            QUESTION_ID => Self::Question {
                question_id: single_id(map, QUESTION_ID)?,
                evaluate_all,
            },
            EXAM_ID => Self::Exam {
                exam_id: single_id(map, EXAM_ID)?,
                evaluate_all,
            },
            _ => Self::Exams {
                exam_ids: id_list(map, EXAM_IDS)?,
                evaluate_all,
            },
        };

        Ok(scope)
    }

    /// Same scope, widened to answers that were already evaluated.
    pub fn including_evaluated(self) -> Self {
        match self {
            Self::AnswerIds { .. } => self,
            Self::Question { question_id, .. } => Self::Question {
                question_id,
                evaluate_all: true,
            },
            Self::Exam { exam_id, .. } => Self::Exam {
                exam_id,
                evaluate_all: true,
            },
            Self::Exams { exam_ids, .. } => Self::Exams {
                exam_ids,
                evaluate_all: true,
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::AnswerIds { answer_ids } => format!("{} explicit answer(s)", answer_ids.len()),
            Self::Question {
                question_id,
                evaluate_all,
            } => format!("question {question_id}{}", only_pending(*evaluate_all)),
            Self::Exam {
                exam_id,
                evaluate_all,
            } => format!("exam {exam_id}{}", only_pending(*evaluate_all)),
            Self::Exams {
                exam_ids,
                evaluate_all,
            } => format!("{} exam(s){}", exam_ids.len(), only_pending(*evaluate_all)),
        }
    }
}

fn only_pending(evaluate_all: bool) -> &'static str {
    if evaluate_all {
        ""
    } else {
        " (unevaluated answers only)"
    }
}

fn parse_id(key: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| TaskforgeError::Validation(format!("{key} contains an invalid id: {value}")))
}

fn single_id(map: &Map<String, Value>, key: &str) -> Result<i64> {
    // Presence was checked by the caller
    parse_id(key, &map[key])
}

fn id_list(map: &Map<String, Value>, key: &str) -> Result<Vec<i64>> {
    let values = map[key]
        .as_array()
        .ok_or_else(|| TaskforgeError::Validation(format!("{key} must be an array of ids")))?;
    if values.is_empty() {
        return Err(TaskforgeError::Validation(format!("{key} must not be empty")));
    }
    values.iter().map(|value| parse_id(key, value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_of(raw: Value) -> Result<EvaluationScope> {
        BatchEvaluationConfig::from_bag(&raw).map(|config| config.scope)
    }

    #[test]
    fn test_each_shape_parses() {
        assert_eq!(
            scope_of(json!({"answerIds": [1, "2", 3]})).unwrap(),
            EvaluationScope::AnswerIds {
                answer_ids: vec![1, 2, 3]
            }
        );
        assert_eq!(
            scope_of(json!({"questionId": 7})).unwrap(),
            EvaluationScope::Question {
                question_id: 7,
                evaluate_all: false
            }
        );
        assert_eq!(
            scope_of(json!({"examId": 3, "evaluateAll": true})).unwrap(),
            EvaluationScope::Exam {
                exam_id: 3,
                evaluate_all: true
            }
        );
        assert_eq!(
            scope_of(json!({"examIds": [3, 4], "evaluateAll": false})).unwrap(),
            EvaluationScope::Exams {
                exam_ids: vec![3, 4],
                evaluate_all: false
            }
        );
    }

    #[test]
    fn test_shapes_are_mutually_exclusive() {
        let err = scope_of(json!({"questionId": 7, "examId": 3})).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_missing_scope_is_rejected() {
        assert!(scope_of(json!({"evaluateAll": true})).is_err());
        assert!(scope_of(json!({"answerIds": []})).is_err());
        assert!(scope_of(json!([1, 2])).is_err());
    }

    #[test]
    fn test_reevaluation_widens_scope() {
        let config = TaskConfig::parse(
            Some(TaskKind::BatchReevaluation),
            &json!({"examIds": [1], "evaluateAll": false}),
        )
        .unwrap();
        assert_eq!(
            config.as_batch_evaluation().unwrap().scope,
            EvaluationScope::Exams {
                exam_ids: vec![1],
                evaluate_all: true
            }
        );
    }

    #[test]
    fn test_unknown_kind_keeps_raw_bag() {
        let raw = json!({"anything": 1});
        let config = TaskConfig::parse(None, &raw).unwrap();
        assert_eq!(config, TaskConfig::Unrecognized(raw));
    }
}

//! Planning backend payloads.
//!
//! The backend owns its schema, so everything here is decoded leniently:
//! missing or mistyped fields fall back to empty values instead of failing
//! the whole response. Decoding happens once, when the transport hands a
//! body over, and the rest of the app only ever sees [`PlanResponse`].

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Shown when a streamed body is empty after trimming.
pub const EMPTY_STREAM_TEXT: &str = "No content returned.";

/// A backend response, classified by what the chat log should show.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanResponse {
    CandidateList(Vec<Candidate>),
    StepPlan(StepPlan),
    /// Ranked candidates together with the plan built from them.
    CandidatesWithPlan {
        candidates: Vec<Candidate>,
        plan: StepPlan,
    },
    /// A streamed body that was not valid JSON.
    RawText(String),
    /// Any JSON document without candidates or steps.
    RawJson(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Candidate {
    #[serde(deserialize_with = "loose_text")]
    pub name: String,
    #[serde(deserialize_with = "loose_text")]
    pub api_name: String,
    #[serde(deserialize_with = "loose_text")]
    pub description: String,
    #[serde(deserialize_with = "loose_score")]
    pub score: Score,
    #[serde(deserialize_with = "lenient")]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Score {
    #[default]
    Missing,
    Number(f64),
    /// Backend sent something other than a number.
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Parameters {
    #[serde(deserialize_with = "lenient_list")]
    pub required: Vec<ParamSpec>,
    #[serde(deserialize_with = "lenient_list")]
    pub optional: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    #[serde(deserialize_with = "loose_text")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Step {
    #[serde(deserialize_with = "loose_text")]
    pub name: String,
    #[serde(deserialize_with = "loose_text")]
    pub api_name: String,
    #[serde(deserialize_with = "loose_text")]
    pub tool_id: String,
    /// Invocation arguments in the order the backend sent them.
    #[serde(deserialize_with = "lenient")]
    pub arguments: Map<String, Value>,
}

/// Ordered steps plus the planner's own description of how it built them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPlan {
    pub steps: Vec<Step>,
    pub strategy: Option<String>,
    pub notes: Option<String>,
}

impl PlanResponse {
    /// Classify a parsed JSON body.
    pub fn from_json(value: Value) -> Self {
        let candidates: Vec<Candidate> = value.get("candidates").map(list_of).unwrap_or_default();
        let plan = StepPlan::from_payload(&value);

        match (candidates.is_empty(), plan.steps.is_empty()) {
            (false, false) => PlanResponse::CandidatesWithPlan { candidates, plan },
            (false, true) => PlanResponse::CandidateList(candidates),
            (true, false) => PlanResponse::StepPlan(plan),
            (true, true) => PlanResponse::RawJson(value),
        }
    }

    /// Classify the fully accumulated text of a streamed body.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_json(value),
            Err(_) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    PlanResponse::RawText(EMPTY_STREAM_TEXT.to_string())
                } else {
                    PlanResponse::RawText(trimmed.to_string())
                }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanResponse::CandidateList(_) => "candidates",
            PlanResponse::StepPlan(_) => "plan",
            PlanResponse::CandidatesWithPlan { .. } => "candidates+plan",
            PlanResponse::RawText(_) => "text",
            PlanResponse::RawJson(_) => "json",
        }
    }
}

impl StepPlan {
    /// Steps come from `plan.steps` when the nested plan carries a list,
    /// otherwise from a top-level `steps`.
    fn from_payload(value: &Value) -> Self {
        let nested = value
            .get("plan")
            .filter(|plan| plan.get("steps").map_or(false, Value::is_array));
        let source = nested.unwrap_or(value);

        Self {
            steps: source.get("steps").map(list_of).unwrap_or_default(),
            strategy: non_empty_text(source.get("strategy")),
            notes: non_empty_text(source.get("notes")),
        }
    }
}

/// Render a scalar the way it should read in a table cell.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    value.map(value_text).filter(|text| !text.is_empty())
}

fn list_of<T: DeserializeOwned + Default>(value: &Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    }
}

fn loose_text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(value_text(&Value::deserialize(de)?))
}

fn loose_score<'de, D: Deserializer<'de>>(de: D) -> Result<Score, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Null => Score::Missing,
        Value::Number(n) => n.as_f64().map_or(Score::Missing, Score::Number),
        other => Score::Text(value_text(&other)),
    })
}

fn lenient<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(de)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(list_of(&Value::deserialize(de)?))
}

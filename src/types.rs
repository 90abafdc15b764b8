use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One demand record as entered by an admin: the five model inputs, all kept
/// as free text until the encoder canonicalizes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DemandRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub day_of_week: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub time_of_day: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub avg_daily_sales: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub food_type: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub event_day: String,
}

/// A historical record with its observed demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRow {
    #[serde(flatten)]
    pub record: DemandRecord,
    #[serde(default, deserialize_with = "lenient_text")]
    pub plates_required: String,
}

impl TrainingRow {
    pub fn new(
        day_of_week: &str,
        time_of_day: &str,
        avg_daily_sales: &str,
        food_type: &str,
        event_day: &str,
        plates_required: &str,
    ) -> Self {
        Self {
            record: DemandRecord {
                day_of_week: day_of_week.to_string(),
                time_of_day: time_of_day.to_string(),
                avg_daily_sales: avg_daily_sales.to_string(),
                food_type: food_type.to_string(),
                event_day: event_day.to_string(),
            },
            plates_required: plates_required.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainAccepted {
    pub job_id: Uuid,
    pub status: String,
}

/// Outcome of a successful training run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub generation: Uuid,
    pub row_count: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub generation: Uuid,
    pub trained_at: DateTime<Utc>,
    pub row_count: usize,
    pub output_min: f64,
    pub output_max: f64,
    /// Categories per feature, in index order.
    pub vocabulary: BTreeMap<String, Vec<String>>,
}

/// Accepts a JSON string, number or boolean and keeps its text form. Null and
/// missing values become empty strings.
pub fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

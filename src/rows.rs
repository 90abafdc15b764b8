//! Maps uploaded spreadsheet rows onto the canonical training fields.
//!
//! Header names vary between files ("Day", "weekday", "Day_Of_Week", ...), so
//! each canonical field carries a list of accepted aliases. Headers are
//! compared after trimming and lowercasing. When two headers alias the same
//! field, the leftmost column wins.

use crate::types::{value_to_text, DemandRecord, TrainingRow};
use serde_json::{Map, Value};

const DAY_OF_WEEK_ALIASES: &[&str] = &["dayofweek", "day_of_week", "day", "weekday"];
const TIME_OF_DAY_ALIASES: &[&str] = &["timeofday", "time_of_day", "time", "meal", "mealtype"];
const AVG_DAILY_SALES_ALIASES: &[&str] = &[
    "avgdailysales",
    "avg_daily_sales",
    "averagedailysales",
    "average_sales",
];
const FOOD_TYPE_ALIASES: &[&str] = &["foodtype", "food_type", "itemtype", "typeoffood"];
const EVENT_DAY_ALIASES: &[&str] = &["eventday", "event_day", "event", "specialday"];
const PLATES_REQUIRED_ALIASES: &[&str] = &[
    "platesrequired",
    "plates_required",
    "requiredplates",
    "target",
];

pub fn normalize_rows(rows: &[Map<String, Value>]) -> Vec<TrainingRow> {
    rows.iter().map(normalize_row).collect()
}

pub fn normalize_row(row: &Map<String, Value>) -> TrainingRow {
    TrainingRow {
        record: DemandRecord {
            day_of_week: value_by_aliases(row, DAY_OF_WEEK_ALIASES),
            time_of_day: value_by_aliases(row, TIME_OF_DAY_ALIASES),
            avg_daily_sales: value_by_aliases(row, AVG_DAILY_SALES_ALIASES),
            food_type: value_by_aliases(row, FOOD_TYPE_ALIASES),
            event_day: value_by_aliases(row, EVENT_DAY_ALIASES),
        },
        plates_required: value_by_aliases(row, PLATES_REQUIRED_ALIASES),
    }
}

fn value_by_aliases(row: &Map<String, Value>, aliases: &[&str]) -> String {
    row.iter()
        .find(|(key, _)| aliases.contains(&key.trim().to_lowercase().as_str()))
        .map(|(_, value)| value_to_text(value))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_header_aliases_are_case_insensitive() {
        let row = object(json!({
            " Weekday ": "Mon",
            "MEAL": "Lunch",
            "Average_Sales": 140,
            "ItemType": "Veg",
            "SpecialDay": "no",
            "Target": 152
        }));

        let normalized = normalize_row(&row);
        assert_eq!(normalized.record.day_of_week, "Mon");
        assert_eq!(normalized.record.time_of_day, "Lunch");
        assert_eq!(normalized.record.avg_daily_sales, "140");
        assert_eq!(normalized.record.food_type, "Veg");
        assert_eq!(normalized.record.event_day, "no");
        assert_eq!(normalized.plates_required, "152");
    }

    #[test]
    fn test_canonical_headers_match() {
        let row = object(json!({
            "dayOfWeek": "Friday",
            "timeOfDay": "dinner",
            "avgDailySales": "90",
            "foodType": "non-veg",
            "eventDay": "yes",
            "platesRequired": "110"
        }));

        let normalized = normalize_row(&row);
        assert_eq!(normalized, TrainingRow::new("Friday", "dinner", "90", "non-veg", "yes", "110"));
    }

    #[test]
    fn test_missing_columns_become_empty() {
        let rows = vec![object(json!({ "day": "Tue", "unrelated": 3 }))];
        let normalized = normalize_rows(&rows);

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].record.day_of_week, "Tue");
        assert_eq!(normalized[0].record.time_of_day, "");
        assert_eq!(normalized[0].plates_required, "");
    }

    #[test]
    fn test_leftmost_alias_wins() {
        let row: Map<String, Value> =
            serde_json::from_str(r#"{ "weekday": "Tue", "Day": "Mon", "target": 9, "Plates_Required": 12 }"#).unwrap();
        let normalized = normalize_row(&row);
        assert_eq!(normalized.record.day_of_week, "Tue");
        assert_eq!(normalized.plates_required, "9");

        let row = object(json!({ "Day": "Mon", "weekday": "Tue" }));
        assert_eq!(normalize_row(&row).record.day_of_week, "Mon");
    }
}

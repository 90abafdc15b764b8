use crate::{
    error::EngineError,
    predictor::MAX_PLATES,
    types::{DemandRecord, TrainingRow},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const FEATURE_COUNT: usize = 5;

/// Model input layout. Position `i` of a [`FeatureVector`] is `FEATURE_NAMES[i]`.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "dayOfWeek",
    "timeOfDay",
    "avgDailySales",
    "foodType",
    "eventDay",
];

pub const SALES_FEATURE: &str = "avgDailySales";
pub const TARGET_NAME: &str = "platesRequired";

pub type FeatureVector = [f64; FEATURE_COUNT];

const DAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Categorical {
    DayOfWeek,
    TimeOfDay,
    FoodType,
    EventDay,
}

impl Categorical {
    pub const ALL: [Categorical; 4] = [
        Categorical::DayOfWeek,
        Categorical::TimeOfDay,
        Categorical::FoodType,
        Categorical::EventDay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Categorical::DayOfWeek => "dayOfWeek",
            Categorical::TimeOfDay => "timeOfDay",
            Categorical::FoodType => "foodType",
            Categorical::EventDay => "eventDay",
        }
    }

    fn raw_value(self, record: &DemandRecord) -> &str {
        match self {
            Categorical::DayOfWeek => &record.day_of_week,
            Categorical::TimeOfDay => &record.time_of_day,
            Categorical::FoodType => &record.food_type,
            Categorical::EventDay => &record.event_day,
        }
    }

    /// Maps the spellings people actually type onto one canonical category.
    /// Unrecognized text passes through trimmed and lowercased.
    pub fn canonicalize(self, raw: &str) -> String {
        let text = raw.trim().to_lowercase();
        match self {
            Categorical::DayOfWeek => canonical_day(&text),
            Categorical::TimeOfDay => match text.as_str() {
                "0" | "breakfast" => "breakfast".to_string(),
                "1" | "lunch" => "lunch".to_string(),
                "2" | "dinner" => "dinner".to_string(),
                _ => text,
            },
            Categorical::EventDay => match text.as_str() {
                "0" | "no" | "n" | "false" => "no".to_string(),
                "1" | "yes" | "y" | "true" => "yes".to_string(),
                _ => text,
            },
            Categorical::FoodType => text,
        }
    }
}

fn canonical_day(text: &str) -> String {
    let day = match text {
        "sun" | "sunday" => Some(0),
        "mon" | "monday" => Some(1),
        "tue" | "tues" | "tuesday" => Some(2),
        "wed" | "wednesday" => Some(3),
        "thu" | "thur" | "thurs" | "thursday" => Some(4),
        "fri" | "friday" => Some(5),
        "sat" | "saturday" => Some(6),
        // Sunday = 0
        _ => text
            .parse::<f64>()
            .ok()
            .filter(|n| n.fract() == 0.0 && (0.0..=6.0).contains(n))
            .map(|n| n as usize),
    };

    match day {
        Some(index) => DAY_NAMES[index].to_string(),
        None => text.to_string(),
    }
}

/// Closed vocabulary for one categorical feature: canonical category to
/// contiguous index, in first-seen order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Vocabulary {
    index: BTreeMap<String, usize>,
}

impl Vocabulary {
    fn from_first_seen<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = BTreeMap::new();
        for value in values {
            if value.is_empty() || index.contains_key(value) {
                continue;
            }
            let next = index.len();
            index.insert(value.to_string(), next);
        }
        Self { index }
    }

    pub fn get(&self, category: &str) -> Option<usize> {
        self.index.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut ordered: Vec<(&String, &usize)> = self.index.iter().collect();
        ordered.sort_by_key(|(_, idx)| **idx);
        ordered.into_iter().map(|(category, _)| category.clone()).collect()
    }
}

/// Per-feature vocabularies fitted on one training set. Never extended after
/// fitting; values outside it are rejected at encode time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CategoricalEncoder {
    vocabularies: BTreeMap<String, Vocabulary>,
}

impl CategoricalEncoder {
    pub fn fit(rows: &[TrainingRow]) -> Self {
        let vocabularies = Categorical::ALL
            .iter()
            .map(|&feature| {
                let canonical: Vec<String> = rows
                    .iter()
                    .map(|row| feature.canonicalize(feature.raw_value(&row.record)))
                    .collect();
                let vocabulary = Vocabulary::from_first_seen(canonical.iter().map(String::as_str));
                debug!("Fitted {} vocabulary with {} categories", feature.name(), vocabulary.len());
                (feature.name().to_string(), vocabulary)
            })
            .collect();

        Self { vocabularies }
    }

    pub fn vocabulary(&self, feature: Categorical) -> Option<&Vocabulary> {
        self.vocabularies.get(feature.name())
    }

    pub fn vocabularies(&self) -> impl Iterator<Item = (&String, &Vocabulary)> {
        self.vocabularies.iter()
    }

    pub fn encode_category(&self, feature: Categorical, raw: &str) -> Result<usize, EngineError> {
        let canonical = feature.canonicalize(raw);
        if canonical.is_empty() {
            return Err(EngineError::invalid_value(feature.name(), raw));
        }

        self.vocabulary(feature)
            .and_then(|vocabulary| vocabulary.get(&canonical))
            .ok_or_else(|| EngineError::unknown_category(feature.name(), raw))
    }

    pub fn encode(&self, record: &DemandRecord) -> Result<FeatureVector, EngineError> {
        Ok([
            self.encode_category(Categorical::DayOfWeek, &record.day_of_week)? as f64,
            self.encode_category(Categorical::TimeOfDay, &record.time_of_day)? as f64,
            parse_number(SALES_FEATURE, &record.avg_daily_sales)?,
            self.encode_category(Categorical::FoodType, &record.food_type)? as f64,
            self.encode_category(Categorical::EventDay, &record.event_day)? as f64,
        ])
    }
}

/// Plate counts beyond [`MAX_PLATES`] cannot be turned back into a
/// recommendation, so they are refused at training time.
pub fn parse_target(row: &TrainingRow) -> Result<f64, EngineError> {
    let target = parse_number(TARGET_NAME, &row.plates_required)?;
    if target > MAX_PLATES as f64 {
        return Err(EngineError::invalid_value(TARGET_NAME, &row.plates_required));
    }
    Ok(target)
}

/// Plain decimal parse. Blank, non-numeric and non-finite text is rejected.
pub fn parse_number(feature: &str, raw: &str) -> Result<f64, EngineError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| EngineError::invalid_value(feature, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<TrainingRow> {
        vec![
            TrainingRow::new("Monday", "Lunch", "120", "Veg", "no", "130"),
            TrainingRow::new("Tue", "breakfast", "80", "Non-Veg", "yes", "95"),
            TrainingRow::new("mon", "1", "110", "veg", "0", "118"),
            TrainingRow::new("5", "Dinner", "60", "snacks", "Y", "70"),
        ]
    }

    fn record(day: &str) -> DemandRecord {
        DemandRecord {
            day_of_week: day.to_string(),
            time_of_day: "lunch".to_string(),
            avg_daily_sales: "100".to_string(),
            food_type: "veg".to_string(),
            event_day: "no".to_string(),
        }
    }

    #[test]
    fn test_day_variants_share_one_index() {
        let encoder = CategoricalEncoder::fit(&rows());
        let expected = encoder.encode(&record("Monday")).unwrap()[0];

        for variant in ["Mon", "monday", "MONDAY", "1", " mon "] {
            assert_eq!(encoder.encode(&record(variant)).unwrap()[0], expected, "{}", variant);
        }
    }

    #[test]
    fn test_numeric_day_uses_sunday_zero() {
        assert_eq!(Categorical::DayOfWeek.canonicalize("0"), "sunday");
        assert_eq!(Categorical::DayOfWeek.canonicalize("6"), "saturday");
        assert_eq!(Categorical::DayOfWeek.canonicalize("7"), "7");
        assert_eq!(Categorical::DayOfWeek.canonicalize("1.5"), "1.5");
        assert_eq!(Categorical::DayOfWeek.canonicalize("Thurs"), "thursday");
        assert_eq!(Categorical::DayOfWeek.canonicalize("Holiday"), "holiday");
    }

    #[test]
    fn test_time_and_event_aliases() {
        assert_eq!(Categorical::TimeOfDay.canonicalize("0"), "breakfast");
        assert_eq!(Categorical::TimeOfDay.canonicalize("LUNCH"), "lunch");
        assert_eq!(Categorical::TimeOfDay.canonicalize("2"), "dinner");
        assert_eq!(Categorical::TimeOfDay.canonicalize("Brunch"), "brunch");

        for no in ["0", "No", "n", "FALSE"] {
            assert_eq!(Categorical::EventDay.canonicalize(no), "no");
        }
        for yes in ["1", "yes", "Y", "true"] {
            assert_eq!(Categorical::EventDay.canonicalize(yes), "yes");
        }
        assert_eq!(Categorical::EventDay.canonicalize("maybe"), "maybe");
    }

    #[test]
    fn test_food_type_is_only_lowercased() {
        assert_eq!(Categorical::FoodType.canonicalize("  Non-Veg "), "non-veg");
        assert_eq!(Categorical::FoodType.canonicalize("1"), "1");
    }

    #[test]
    fn test_indices_follow_first_appearance() {
        let encoder = CategoricalEncoder::fit(&rows());

        let days = encoder.vocabulary(Categorical::DayOfWeek).unwrap();
        assert_eq!(days.categories(), vec!["monday", "tuesday", "friday"]);

        let food = encoder.vocabulary(Categorical::FoodType).unwrap();
        assert_eq!(food.get("veg"), Some(0));
        assert_eq!(food.get("non-veg"), Some(1));
        assert_eq!(food.get("snacks"), Some(2));
    }

    #[test]
    fn test_blank_values_get_no_index() {
        let mut data = rows();
        data.push(TrainingRow::new("  ", "", "50", "veg", "no", "55"));

        let encoder = CategoricalEncoder::fit(&data);
        assert_eq!(encoder.vocabulary(Categorical::DayOfWeek).unwrap().len(), 3);
        assert_eq!(encoder.vocabulary(Categorical::TimeOfDay).unwrap().len(), 3);

        let err = encoder.encode(&data[4].record).unwrap_err();
        assert_eq!(err, EngineError::invalid_value("dayOfWeek", "  "));
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let encoder = CategoricalEncoder::fit(&rows());
        let mut unseen = record("Monday");
        unseen.food_type = "Dessert".to_string();

        let err = encoder.encode(&unseen).unwrap_err();
        assert_eq!(err, EngineError::unknown_category("foodType", "Dessert"));
    }

    #[test]
    fn test_feature_order() {
        let encoder = CategoricalEncoder::fit(&rows());
        let vector = encoder.encode(&rows()[1].record).unwrap();
        assert_eq!(vector, [1.0, 1.0, 80.0, 1.0, 1.0]);
    }

    #[test]
    fn test_non_numeric_sales_and_target() {
        let encoder = CategoricalEncoder::fit(&rows());
        let mut bad = record("Monday");
        bad.avg_daily_sales = "lots".to_string();
        assert_eq!(
            encoder.encode(&bad).unwrap_err(),
            EngineError::invalid_value("avgDailySales", "lots")
        );

        let row = TrainingRow::new("Monday", "lunch", "1", "veg", "no", "NaN");
        assert_eq!(
            parse_target(&row).unwrap_err(),
            EngineError::invalid_value("platesRequired", "NaN")
        );
        assert_eq!(parse_number("avgDailySales", " 42.5 ").unwrap(), 42.5);
        assert!(parse_number("avgDailySales", "").is_err());
    }

    #[test]
    fn test_target_beyond_plate_range() {
        let row = TrainingRow::new("Monday", "lunch", "1", "veg", "no", "3e19");
        assert_eq!(
            parse_target(&row).unwrap_err(),
            EngineError::invalid_value("platesRequired", "3e19")
        );

        let row = TrainingRow::new("Monday", "lunch", "1", "veg", "no", &MAX_PLATES.to_string());
        assert_eq!(parse_target(&row).unwrap(), MAX_PLATES as f64);
    }

    #[test]
    fn test_encoder_serializes_as_nested_maps() {
        let encoder = CategoricalEncoder::fit(&rows()[..1]);
        let json = serde_json::to_value(&encoder).unwrap();
        assert_eq!(json["dayOfWeek"]["monday"], 0);
        assert_eq!(json["eventDay"]["no"], 0);

        let restored: CategoricalEncoder = serde_json::from_value(json).unwrap();
        assert_eq!(restored, encoder);
    }
}

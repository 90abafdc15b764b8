use crate::{
    error::EngineError,
    features::{FeatureVector, FEATURE_COUNT},
};
use serde::{Deserialize, Serialize};

/// Min-max statistics captured from one training matrix. The same instance is
/// persisted with the model and reused unchanged at inference time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationStats {
    pub input_mins: Vec<f64>,
    pub input_maxs: Vec<f64>,
    pub output_min: f64,
    pub output_max: f64,
}

impl NormalizationStats {
    pub fn fit(inputs: &[FeatureVector], targets: &[f64]) -> Result<Self, EngineError> {
        if inputs.is_empty() || targets.is_empty() {
            return Err(EngineError::EmptyDataset);
        }

        let mut input_mins = vec![f64::INFINITY; FEATURE_COUNT];
        let mut input_maxs = vec![f64::NEG_INFINITY; FEATURE_COUNT];
        for row in inputs {
            for (i, &value) in row.iter().enumerate() {
                input_mins[i] = input_mins[i].min(value);
                input_maxs[i] = input_maxs[i].max(value);
            }
        }

        let output_min = targets.iter().copied().fold(f64::INFINITY, f64::min);
        let output_max = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            input_mins,
            input_maxs,
            output_min,
            output_max,
        })
    }

    pub fn apply_input(&self, vector: &FeatureVector) -> Result<FeatureVector, EngineError> {
        if self.input_mins.len() != FEATURE_COUNT || self.input_maxs.len() != FEATURE_COUNT {
            return Err(EngineError::ModelNotTrained(format!(
                "normalization stats cover {} features, expected {}",
                self.input_mins.len().min(self.input_maxs.len()),
                FEATURE_COUNT
            )));
        }

        let mut scaled = [0.0; FEATURE_COUNT];
        for (i, &value) in vector.iter().enumerate() {
            scaled[i] = scale(value, self.input_mins[i], self.input_maxs[i]);
        }
        Ok(scaled)
    }

    pub fn apply_target(&self, value: f64) -> f64 {
        scale(value, self.output_min, self.output_max)
    }

    pub fn invert_target(&self, value: f64) -> f64 {
        value * (self.output_max - self.output_min) + self.output_min
    }
}

/// Linear scaling to [0, 1]. A constant column (`max == min`) scales to 0.
pub fn scale(value: f64, min: f64, max: f64) -> f64 {
    if max == min {
        return 0.0;
    }
    (value - min) / (max - min)
}

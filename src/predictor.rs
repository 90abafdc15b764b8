use crate::{error::EngineError, store::Snapshot, types::DemandRecord};
use serde::{Deserialize, Serialize};

/// Plates to prepare for one service slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub predicted_plates: u64,
    pub buffer: u64,
    pub total_recommended: u64,
}

/// Largest plate count every step of the recommendation represents exactly
/// (2^53, the end of the contiguous integer range of `f64`).
pub const MAX_PLATES: u64 = 1 << 53;

impl Recommendation {
    /// Clamps to zero, rounds to whole plates and adds a 10% buffer rounded up.
    /// Estimates above [`MAX_PLATES`] are rejected instead of saturating.
    pub fn from_estimate(plates: f64) -> Result<Self, EngineError> {
        let rounded = plates.max(0.0).round();
        if rounded > MAX_PLATES as f64 {
            return Err(EngineError::InvalidTrainingData(format!(
                "estimate of {} plates exceeds the supported maximum of {}",
                plates, MAX_PLATES
            )));
        }

        let predicted_plates = rounded as u64;
        let buffer = safety_buffer(predicted_plates);
        Ok(Self {
            predicted_plates,
            buffer,
            total_recommended: predicted_plates + buffer,
        })
    }
}

/// `ceil(plates / 10)`, exact for every `u64`.
pub fn safety_buffer(plates: u64) -> u64 {
    plates / 10 + u64::from(plates % 10 != 0)
}

/// Raw plate estimate for one record, scaled with the snapshot's own encoder
/// and statistics.
pub fn estimate(snapshot: &Snapshot, record: &DemandRecord) -> Result<f64, EngineError> {
    let metadata = &snapshot.metadata;
    let encoded = metadata.encoders.encode(record)?;
    let scaled = metadata.stats.apply_input(&encoded)?;
    let output = snapshot.network.predict(&scaled)?;

    let plates = metadata.stats.invert_target(output);
    if !plates.is_finite() {
        return Err(EngineError::ModelNotTrained(format!(
            "snapshot {} produced a non-finite estimate",
            metadata.generation
        )));
    }
    Ok(plates)
}

pub fn recommend(snapshot: &Snapshot, record: &DemandRecord) -> Result<Recommendation, EngineError> {
    estimate(snapshot, record).and_then(Recommendation::from_estimate)
}

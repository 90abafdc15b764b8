use crate::{
    error::EngineError,
    features::{parse_target, CategoricalEncoder, FeatureVector},
    normalization::NormalizationStats,
    predictor::{self, Recommendation},
    store::{ModelStore, Snapshot, SnapshotMetadata},
    trainer::{Trainer, TrainingConfig},
    types::{DemandRecord, ModelInfo, TrainingRow, TrainingSummary},
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Demand estimation pipeline over a caller-owned model store.
///
/// The engine keeps no model in memory between calls: every prediction reads
/// the current snapshot from the store, and every training run produces a
/// complete new snapshot. Callers serialize training commits against
/// predictions (see `routes`).
pub struct DemandEngine {
    store: ModelStore,
    trainer: Trainer,
}

impl DemandEngine {
    pub fn new(store: ModelStore, config: TrainingConfig) -> Self {
        Self {
            store,
            trainer: Trainer::new(config),
        }
    }

    /// Fits encoder, statistics and network on `rows` without touching the
    /// store.
    pub fn fit(&self, rows: &[TrainingRow]) -> Result<(Snapshot, TrainingSummary), EngineError> {
        if rows.is_empty() {
            return Err(EngineError::EmptyDataset);
        }

        let encoders = CategoricalEncoder::fit(rows);
        let mut inputs: Vec<FeatureVector> = Vec::with_capacity(rows.len());
        let mut targets = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let encoded = encoders.encode(&row.record).and_then(|features| {
                parse_target(row).map(|target| (features, target))
            });
            match encoded {
                Ok((features, target)) => {
                    inputs.push(features);
                    targets.push(target);
                }
                Err(e) => {
                    warn!("Rejecting training set at row {}: {}", i + 1, e);
                    return Err(e);
                }
            }
        }

        let stats = NormalizationStats::fit(&inputs, &targets)?;
        let scaled_inputs = inputs
            .iter()
            .map(|features| stats.apply_input(features))
            .collect::<Result<Vec<_>, _>>()?;
        let scaled_targets: Vec<f64> = targets.iter().map(|&target| stats.apply_target(target)).collect();
        debug!("Normalized {} rows, target range [{}, {}]", rows.len(), stats.output_min, stats.output_max);

        let (network, report) = self.trainer.fit(&scaled_inputs, &scaled_targets)?;

        let metadata = SnapshotMetadata {
            generation: Uuid::new_v4(),
            trained_at: Utc::now(),
            row_count: rows.len(),
            stats,
            encoders,
        };
        let summary = TrainingSummary {
            generation: metadata.generation,
            row_count: rows.len(),
            epochs: report.epochs,
            batch_size: report.batch_size,
            initial_loss: report.initial_loss,
            final_loss: report.final_loss,
            trained_at: metadata.trained_at,
        };
        let snapshot = Snapshot {
            network,
            compile: self.trainer.compile_config(),
            metadata,
        };

        Ok((snapshot, summary))
    }

    /// Makes `snapshot` the current model, replacing the previous one whole.
    pub fn commit(&self, snapshot: &Snapshot) -> Result<(), EngineError> {
        self.store.save(snapshot)
    }

    pub fn train(&self, rows: &[TrainingRow]) -> Result<TrainingSummary, EngineError> {
        let (snapshot, summary) = self.fit(rows)?;
        self.commit(&snapshot)?;
        info!(
            "Trained demand model {} on {} rows (loss {:.6} -> {:.6})",
            summary.generation, summary.row_count, summary.initial_loss, summary.final_loss
        );
        Ok(summary)
    }

    pub fn predict(&self, record: &DemandRecord) -> Result<Recommendation, EngineError> {
        let snapshot = self.store.load()?;
        let recommendation = predictor::recommend(&snapshot, record)?;
        debug!(
            "Predicted {} plates (+{} buffer) with model {}",
            recommendation.predicted_plates,
            recommendation.buffer,
            snapshot.generation()
        );
        Ok(recommendation)
    }

    pub fn model_info(&self) -> Result<ModelInfo, EngineError> {
        let metadata = self.store.metadata()?;
        let vocabulary = metadata
            .encoders
            .vocabularies()
            .map(|(feature, vocabulary)| (feature.clone(), vocabulary.categories()))
            .collect();

        Ok(ModelInfo {
            generation: metadata.generation,
            trained_at: metadata.trained_at,
            row_count: metadata.row_count,
            output_min: metadata.stats.output_min,
            output_max: metadata.stats.output_max,
            vocabulary,
        })
    }
}

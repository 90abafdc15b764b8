use crate::{
    error::EngineError,
    features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES},
    network::{LayerGradients, Network, Topology},
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub max_batch_size: usize,
    /// Fixed seed for weight init and shuffling. `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 150,
            learning_rate: 0.01,
            max_batch_size: 8,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Loss {
    MeanSquaredError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OptimizerKind {
    Adam,
}

/// Loss and optimizer settings a network was trained with. Persisted next to
/// the weights so training can be resumed with the same configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompileConfig {
    pub loss: Loss,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
}

impl CompileConfig {
    pub fn adam(learning_rate: f64) -> Self {
        Self {
            loss: Loss::MeanSquaredError,
            optimizer: OptimizerKind::Adam,
            learning_rate,
        }
    }

    pub fn optimizer(&self) -> Adam {
        match self.optimizer {
            OptimizerKind::Adam => Adam::new(self.learning_rate),
        }
    }
}

/// Adam with per-tensor first and second moments, created on first step.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    moments: Vec<(Vec<f64>, Vec<f64>)>,
    steps: i32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            moments: Vec::new(),
            steps: 0,
        }
    }

    pub fn num_steps(&self) -> i32 {
        self.steps
    }

    pub fn step(&mut self, network: &mut Network, gradients: &[LayerGradients]) {
        self.steps += 1;
        let correction1 = 1.0 - self.beta1.powi(self.steps);
        let correction2 = 1.0 - self.beta2.powi(self.steps);

        for (i, (layer, grad)) in network.layers_mut().iter_mut().zip(gradients).enumerate() {
            self.update(i * 2, layer.weights.as_mut_slice(), grad.weights.as_slice(), correction1, correction2);
            self.update(i * 2 + 1, layer.bias.as_mut_slice(), grad.bias.as_slice(), correction1, correction2);
        }
    }

    fn update(&mut self, param_id: usize, param: &mut [f64], grad: &[f64], correction1: f64, correction2: f64) {
        while self.moments.len() <= param_id {
            self.moments.push((Vec::new(), Vec::new()));
        }
        let (m, v) = &mut self.moments[param_id];
        if m.len() != param.len() {
            *m = vec![0.0; param.len()];
            *v = vec![0.0; param.len()];
        }

        for j in 0..param.len() {
            m[j] = self.beta1 * m[j] + (1.0 - self.beta1) * grad[j];
            v[j] = self.beta2 * v[j] + (1.0 - self.beta2) * grad[j] * grad[j];
            let m_hat = m[j] / correction1;
            let v_hat = v[j] / correction2;
            param[j] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    pub batch_size: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
}

/// Keeps tiny datasets trainable: never larger than the row count, never 0.
pub fn batch_size(row_count: usize, max_batch_size: usize) -> usize {
    row_count.min(max_batch_size).max(1)
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn compile_config(&self) -> CompileConfig {
        CompileConfig::adam(self.config.learning_rate)
    }

    /// Fits a fresh demand regressor on already normalized data.
    pub fn fit(&self, inputs: &[FeatureVector], targets: &[f64]) -> Result<(Network, TrainingReport), EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::EmptyDataset);
        }
        validate(inputs, targets)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut network = Network::new(Topology::demand_regressor(FEATURE_COUNT), &mut rng);
        let mut optimizer = self.compile_config().optimizer();
        let batch = batch_size(inputs.len(), self.config.max_batch_size);
        let mut order: Vec<usize> = (0..inputs.len()).collect();

        info!(
            "Training demand model: {} rows, {} epochs, batch size {}",
            inputs.len(),
            self.config.epochs,
            batch
        );

        let mut initial_loss = f64::NAN;
        let mut final_loss = f64::NAN;
        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch) {
                let xs: Vec<&[f64]> = chunk.iter().map(|&i| &inputs[i][..]).collect();
                let ys: Vec<f64> = chunk.iter().map(|&i| targets[i]).collect();

                let (loss, gradients) = network.batch_gradients(&xs, &ys);
                optimizer.step(&mut network, &gradients);
                epoch_loss += loss * chunk.len() as f64;
            }
            epoch_loss /= inputs.len() as f64;

            if !epoch_loss.is_finite() {
                return Err(EngineError::InvalidTrainingData(format!(
                    "loss became non-finite at epoch {}",
                    epoch + 1
                )));
            }
            if epoch == 0 {
                initial_loss = epoch_loss;
            }
            final_loss = epoch_loss;

            if (epoch + 1) % 50 == 0 {
                debug!("Epoch {}/{}: loss {:.6}", epoch + 1, self.config.epochs, epoch_loss);
            }
        }

        info!("Training finished after {} optimizer steps, final loss {:.6}", optimizer.num_steps(), final_loss);

        Ok((
            network,
            TrainingReport {
                epochs: self.config.epochs,
                batch_size: batch,
                initial_loss,
                final_loss,
            },
        ))
    }
}

fn validate(inputs: &[FeatureVector], targets: &[f64]) -> Result<(), EngineError> {
    if inputs.len() != targets.len() {
        return Err(EngineError::InvalidTrainingData(format!(
            "{} feature rows but {} targets",
            inputs.len(),
            targets.len()
        )));
    }

    for (row, (features, target)) in inputs.iter().zip(targets).enumerate() {
        if let Some(col) = features.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::InvalidTrainingData(format!(
                "row {} has a non-finite {}",
                row + 1,
                FEATURE_NAMES[col]
            )));
        }
        if !target.is_finite() {
            return Err(EngineError::InvalidTrainingData(format!(
                "row {} has a non-finite target",
                row + 1
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(epochs: usize) -> Trainer {
        Trainer::new(TrainingConfig {
            epochs,
            seed: Some(42),
            ..TrainingConfig::default()
        })
    }

    fn dataset() -> (Vec<FeatureVector>, Vec<f64>) {
        let inputs: Vec<FeatureVector> = (0..12)
            .map(|i| {
                let x = i as f64 / 11.0;
                [(i % 7) as f64 / 6.0, (i % 3) as f64 / 2.0, x, (i % 2) as f64, 0.0]
            })
            .collect();
        let targets = inputs.iter().map(|row| 0.8 * row[2] + 0.1 * row[3]).collect();
        (inputs, targets)
    }

    #[test]
    fn test_batch_size_bounds() {
        assert_eq!(batch_size(0, 8), 1);
        assert_eq!(batch_size(1, 8), 1);
        assert_eq!(batch_size(5, 8), 5);
        assert_eq!(batch_size(500, 8), 8);
    }

    #[test]
    fn test_empty_dataset() {
        assert_eq!(seeded(10).fit(&[], &[]).unwrap_err(), EngineError::EmptyDataset);
    }

    #[test]
    fn test_rejects_non_finite_rows() {
        let (mut inputs, targets) = dataset();
        inputs[3][2] = f64::NAN;
        let err = seeded(10).fit(&inputs, &targets).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTrainingData(ref msg) if msg.contains("avgDailySales")));

        let (inputs, mut targets) = dataset();
        targets[0] = f64::INFINITY;
        assert!(matches!(
            seeded(10).fit(&inputs, &targets).unwrap_err(),
            EngineError::InvalidTrainingData(_)
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let (inputs, targets) = dataset();
        assert!(seeded(10).fit(&inputs, &targets[..5]).is_err());
    }

    #[test]
    fn test_single_row_trains() {
        let (network, report) = seeded(150).fit(&[[0.0; FEATURE_COUNT]], &[0.0]).unwrap();
        assert_eq!(report.batch_size, 1);
        assert_eq!(report.epochs, 150);
        assert!(network.predict(&[0.0; FEATURE_COUNT]).unwrap().is_finite());
    }

    #[test]
    fn test_loss_decreases() {
        let (inputs, targets) = dataset();
        let (_, report) = seeded(150).fit(&inputs, &targets).unwrap();
        assert!(report.final_loss < report.initial_loss);
        assert!(report.final_loss < 0.05, "final loss {}", report.final_loss);
    }

    #[test]
    fn test_seed_makes_training_reproducible() {
        let (inputs, targets) = dataset();
        let (a, _) = seeded(20).fit(&inputs, &targets).unwrap();
        let (b, _) = seeded(20).fit(&inputs, &targets).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compile_config_serialization() {
        let json = serde_json::to_value(CompileConfig::adam(0.01)).unwrap();
        assert_eq!(json["loss"], "meanSquaredError");
        assert_eq!(json["optimizer"], "adam");
        assert_eq!(json["learningRate"], 0.01);
    }
}

//! Small dense feed-forward regressor on top of nalgebra.
//!
//! Layer weights are held as `[units, inputs]` matrices so a forward step is
//! `W * x + b`. On disk a kernel is described the other way round,
//! `[inputs, units]` flattened row-major, which is exactly nalgebra's
//! column-major storage of `W`, so the flat data is copied without transposing.

use crate::error::EngineError;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Linear => x,
        }
    }

    pub fn derivative(self, z: f64) -> f64 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub units: usize,
    pub activation: Activation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub input_width: usize,
    pub layers: Vec<LayerSpec>,
}

impl Topology {
    /// 5 -> 16 (relu) -> 8 (relu) -> 1 (linear)
    pub fn demand_regressor(input_width: usize) -> Self {
        Self {
            input_width,
            layers: vec![
                LayerSpec { units: 16, activation: Activation::Relu },
                LayerSpec { units: 8, activation: Activation::Relu },
                LayerSpec { units: 1, activation: Activation::Linear },
            ],
        }
    }

    pub fn output_width(&self) -> usize {
        self.layers.last().map(|layer| layer.units).unwrap_or(self.input_width)
    }

    /// `(inputs, units)` for every layer.
    fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut inputs = self.input_width;
        self.layers
            .iter()
            .map(|layer| {
                let dims = (inputs, layer.units);
                inputs = layer.units;
                dims
            })
            .collect()
    }
}

/// A named weight tensor: shape plus flattened row-major values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub(crate) weights: DMatrix<f64>,
    pub(crate) bias: DVector<f64>,
    pub(crate) activation: Activation,
}

impl Dense {
    fn glorot<R: Rng>(inputs: usize, units: usize, activation: Activation, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + units) as f64).sqrt();
        Self {
            weights: DMatrix::from_fn(units, inputs, |_, _| rng.gen_range(-limit..limit)),
            bias: DVector::zeros(units),
            activation,
        }
    }

    fn pre_activation(&self, input: &DVector<f64>) -> DVector<f64> {
        &self.weights * input + &self.bias
    }
}

/// Gradients for one layer, same shapes as the layer parameters.
#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub weights: DMatrix<f64>,
    pub bias: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    topology: Topology,
    layers: Vec<Dense>,
}

impl Network {
    pub fn new<R: Rng>(topology: Topology, rng: &mut R) -> Self {
        let layers = topology
            .layer_dims()
            .into_iter()
            .zip(&topology.layers)
            .map(|((inputs, units), spec)| Dense::glorot(inputs, units, spec.activation, rng))
            .collect();

        Self { topology, layers }
    }

    /// Rebuilds a network from its topology and the tensors produced by
    /// [`Network::weights`]. Any shape disagreement means a corrupt snapshot.
    pub fn from_weights(topology: Topology, weights: &[WeightTensor]) -> Result<Self, EngineError> {
        if topology.output_width() != 1 {
            return Err(corrupt(format!(
                "expected a single output unit, found {}",
                topology.output_width()
            )));
        }

        let dims = topology.layer_dims();
        if weights.len() != dims.len() * 2 {
            return Err(corrupt(format!(
                "expected {} weight tensors, found {}",
                dims.len() * 2,
                weights.len()
            )));
        }

        let mut layers = Vec::with_capacity(dims.len());
        for (i, ((inputs, units), spec)) in dims.into_iter().zip(&topology.layers).enumerate() {
            let kernel = &weights[i * 2];
            let bias = &weights[i * 2 + 1];
            check_tensor(kernel, &[inputs, units])?;
            check_tensor(bias, &[units])?;

            layers.push(Dense {
                weights: DMatrix::from_column_slice(units, inputs, &kernel.data),
                bias: DVector::from_column_slice(&bias.data),
                activation: spec.activation,
            });
        }

        Ok(Self { topology, layers })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Kernel then bias for every layer, in layer order.
    pub fn weights(&self) -> Vec<WeightTensor> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                [
                    WeightTensor {
                        name: format!("dense_{}/kernel", i + 1),
                        shape: vec![layer.weights.ncols(), layer.weights.nrows()],
                        data: layer.weights.as_slice().to_vec(),
                    },
                    WeightTensor {
                        name: format!("dense_{}/bias", i + 1),
                        shape: vec![layer.bias.len()],
                        data: layer.bias.as_slice().to_vec(),
                    },
                ]
            })
            .collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.weights.len() + layer.bias.len())
            .sum()
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    /// Single-output forward pass.
    pub fn predict(&self, input: &[f64]) -> Result<f64, EngineError> {
        if input.len() != self.topology.input_width {
            return Err(EngineError::ModelNotTrained(format!(
                "model expects {} inputs, got {}",
                self.topology.input_width,
                input.len()
            )));
        }

        let mut current = DVector::from_column_slice(input);
        for layer in &self.layers {
            current = layer.pre_activation(&current).map(|z| layer.activation.apply(z));
        }

        current
            .get(0)
            .copied()
            .ok_or_else(|| EngineError::ModelNotTrained("model has no output unit".to_string()))
    }

    /// Mean squared error of the batch and its gradients with respect to
    /// every layer's parameters.
    pub fn batch_gradients(&self, inputs: &[&[f64]], targets: &[f64]) -> (f64, Vec<LayerGradients>) {
        let mut gradients: Vec<LayerGradients> = self
            .layers
            .iter()
            .map(|layer| LayerGradients {
                weights: DMatrix::zeros(layer.weights.nrows(), layer.weights.ncols()),
                bias: DVector::zeros(layer.bias.len()),
            })
            .collect();

        let batch = inputs.len().max(1) as f64;
        let mut loss = 0.0;

        for (input, &target) in inputs.iter().zip(targets) {
            // activations[0] is the input, activations[l + 1] the output of layer l
            let mut activations = vec![DVector::from_column_slice(input)];
            let mut pre_activations = Vec::with_capacity(self.layers.len());
            for layer in &self.layers {
                let z = layer.pre_activation(&activations[activations.len() - 1]);
                activations.push(z.map(|v| layer.activation.apply(v)));
                pre_activations.push(z);
            }

            let error = activations[activations.len() - 1][0] - target;
            loss += error * error;

            let mut upstream = DVector::from_element(1, 2.0 * error / batch);
            for l in (0..self.layers.len()).rev() {
                let layer = &self.layers[l];
                let delta = upstream.component_mul(
                    &pre_activations[l].map(|z| layer.activation.derivative(z)),
                );

                gradients[l].weights += &delta * activations[l].transpose();
                gradients[l].bias += &delta;
                upstream = layer.weights.transpose() * &delta;
            }
        }

        (loss / batch, gradients)
    }
}

fn check_tensor(tensor: &WeightTensor, shape: &[usize]) -> Result<(), EngineError> {
    if tensor.shape != shape {
        return Err(corrupt(format!(
            "tensor {} has shape {:?}, expected {:?}",
            tensor.name, tensor.shape, shape
        )));
    }
    if tensor.data.len() != shape.iter().product::<usize>() {
        return Err(corrupt(format!(
            "tensor {} holds {} values for shape {:?}",
            tensor.name,
            tensor.data.len(),
            shape
        )));
    }
    if tensor.data.iter().any(|v| !v.is_finite()) {
        return Err(corrupt(format!("tensor {} contains non-finite values", tensor.name)));
    }
    Ok(())
}

fn corrupt(detail: String) -> EngineError {
    EngineError::ModelNotTrained(format!("corrupt model artifact: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn network() -> Network {
        let mut rng = StdRng::seed_from_u64(7);
        Network::new(Topology::demand_regressor(5), &mut rng)
    }

    #[test]
    fn test_demand_topology() {
        let net = network();
        let shapes: Vec<Vec<usize>> = net.weights().into_iter().map(|w| w.shape).collect();
        assert_eq!(
            shapes,
            vec![vec![5, 16], vec![16], vec![16, 8], vec![8], vec![8, 1], vec![1]]
        );
        assert_eq!(net.num_parameters(), 5 * 16 + 16 + 16 * 8 + 8 + 8 + 1);
        assert_eq!(net.topology().output_width(), 1);
    }

    #[test]
    fn test_kernel_layout_is_inputs_by_units_row_major() {
        let mut net = network();
        let kernel = net.weights().remove(0);
        let w = net.layers_mut()[0].weights.clone();
        // kernel[i][j] connects input i to unit j
        assert_eq!(kernel.data[2 * 16 + 3], w[(3, 2)]);
        assert_eq!(kernel.data[4 * 16 + 15], w[(15, 4)]);
    }

    #[test]
    fn test_rebuilt_network_predicts_identically() {
        let net = network();
        let rebuilt = Network::from_weights(net.topology().clone(), &net.weights()).unwrap();
        let input = [0.2, 0.5, 0.9, 0.0, 1.0];
        assert_eq!(net.predict(&input).unwrap(), rebuilt.predict(&input).unwrap());
    }

    #[test]
    fn test_rejects_mismatched_tensors() {
        let net = network();
        let mut weights = net.weights();
        weights[2].shape = vec![8, 16];
        let err = Network::from_weights(net.topology().clone(), &weights).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotTrained(_)));

        let mut topology = net.topology().clone();
        topology.layers.pop();
        let err = Network::from_weights(topology, &net.weights()).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotTrained(ref msg) if msg.contains("single output")));

        let err = Network::from_weights(net.topology().clone(), &weights[..4]).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotTrained(_)));
    }

    #[test]
    fn test_wrong_input_width() {
        assert!(network().predict(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut net = network();
        let inputs: Vec<&[f64]> = vec![&[0.1, 0.4, 0.7, 0.2, 0.9][..], &[0.8, 0.3, 0.2, 0.6, 0.1][..]];
        let targets = [0.3, 0.8];

        let (_, grads) = net.batch_gradients(&inputs, &targets);
        let analytic = grads[2].bias[0];

        let eps = 1e-6;
        net.layers_mut()[2].bias[0] += eps;
        let (plus, _) = net.batch_gradients(&inputs, &targets);
        net.layers_mut()[2].bias[0] -= 2.0 * eps;
        let (minus, _) = net.batch_gradients(&inputs, &targets);

        let numeric = (plus - minus) / (2.0 * eps);
        assert!((analytic - numeric).abs() < 1e-5, "{} vs {}", analytic, numeric);
    }
}

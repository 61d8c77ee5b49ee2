//! Minimal dense feed-forward networks over `ndarray`.
//!
//! Just enough backend to exercise the runner end to end: sigmoid or
//! identity layers, a softmax cross-entropy head, manual backprop, and
//! plain SGD updates. Not a framework.

use ndarray::{Array, Array1, Array2, ArrayView1, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Normal;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use treadle_abstraction::{ParamState, ParamTensor, SessionError, SessionResult};

/// Activation applied by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    /// No nonlinearity; used for the logits layer.
    Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub units: usize,
    pub activation: Activation,
}

/// Shape of a dense network: input width plus one entry per layer.
///
/// The final layer's output is treated as logits and trained under
/// softmax cross-entropy against one-hot targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input: usize,
    pub layers: Vec<LayerSpec>,
    pub seed: u64,
}

impl NetworkSpec {
    /// Classifier shape: sigmoid hidden layers and an identity logits
    /// layer of `classes` units.
    #[must_use]
    pub fn classifier(input: usize, hidden: &[usize], classes: usize, seed: u64) -> Self {
        let mut layers: Vec<LayerSpec> = hidden
            .iter()
            .map(|&units| LayerSpec { units, activation: Activation::Sigmoid })
            .collect();
        layers.push(LayerSpec { units: classes, activation: Activation::Identity });
        Self { input, layers, seed }
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.input == 0 {
            return Err(SessionError::Backend("input width must be > 0".to_string()));
        }
        if self.layers.is_empty() {
            return Err(SessionError::Backend("network needs at least one layer".to_string()));
        }
        if self.layers.iter().any(|layer| layer.units == 0) {
            return Err(SessionError::Backend("layer widths must be > 0".to_string()));
        }
        Ok(())
    }
}

struct DenseLayer {
    weights: Array2<f32>,
    biases: Array1<f32>,
    activation: Activation,
}

/// Parameter state of one spec-shaped network.
pub(crate) struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Fresh network: seeded normal weights, zero biases.
    pub(crate) fn initialized(spec: &NetworkSpec) -> SessionResult<Self> {
        spec.validate()?;
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let dist = Normal::new(0.0_f32, 0.5)
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut fan_in = spec.input;
        for layer in &spec.layers {
            layers.push(DenseLayer {
                weights: Array::random_using((fan_in, layer.units), dist, &mut rng),
                biases: Array1::zeros(layer.units),
                activation: layer.activation,
            });
            fan_in = layer.units;
        }
        Ok(Self { layers })
    }

    /// Rebuilds a network from an exported snapshot, shape-checked
    /// against `spec`.
    pub(crate) fn import(spec: &NetworkSpec, state: &ParamState) -> SessionResult<Self> {
        spec.validate()?;
        state.validate()?;

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut fan_in = spec.input;
        for (idx, layer_spec) in spec.layers.iter().enumerate() {
            let weights = tensor(state, &format!("layer{idx}/weights"), &[fan_in, layer_spec.units])?;
            let biases = tensor(state, &format!("layer{idx}/biases"), &[layer_spec.units])?;

            let weights = Array2::from_shape_vec((fan_in, layer_spec.units), weights.values.clone())
                .map_err(|e| SessionError::ShapeMismatch(e.to_string()))?;
            layers.push(DenseLayer {
                weights,
                biases: Array1::from_vec(biases.values.clone()),
                activation: layer_spec.activation,
            });
            fan_in = layer_spec.units;
        }
        Ok(Self { layers })
    }

    pub(crate) fn export(&self) -> ParamState {
        let mut state = ParamState::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            state.insert(
                format!("layer{idx}/weights"),
                vec![layer.weights.nrows(), layer.weights.ncols()],
                layer.weights.iter().copied().collect(),
            );
            state.insert(
                format!("layer{idx}/biases"),
                vec![layer.biases.len()],
                layer.biases.to_vec(),
            );
        }
        state
    }

    /// Activations after each layer for `inputs` (batch x features).
    fn forward(&self, inputs: &Array2<f32>) -> SessionResult<Vec<Array2<f32>>> {
        let expected = self.layers[0].weights.nrows();
        if inputs.ncols() != expected {
            return Err(SessionError::ShapeMismatch(format!(
                "batch has {} features, network expects {expected}",
                inputs.ncols()
            )));
        }

        let mut activations: Vec<Array2<f32>> = Vec::with_capacity(self.layers.len());
        for (idx, layer) in self.layers.iter().enumerate() {
            let input = if idx == 0 { inputs } else { &activations[idx - 1] };
            let mut z = input.dot(&layer.weights) + &layer.biases;
            if layer.activation == Activation::Sigmoid {
                z.mapv_inplace(sigmoid);
            }
            activations.push(z);
        }
        Ok(activations)
    }

    fn check_targets(&self, logits: &Array2<f32>, targets: &Array2<f32>) -> SessionResult<()> {
        if targets.shape() != logits.shape() {
            return Err(SessionError::ShapeMismatch(format!(
                "targets have shape {:?}, logits {:?}",
                targets.shape(),
                logits.shape()
            )));
        }
        Ok(())
    }

    /// Mean loss and per-layer gradients on one batch.
    fn gradients(
        &self,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
    ) -> SessionResult<(f64, Vec<(Array2<f32>, Array1<f32>)>)> {
        let activations = self.forward(inputs)?;
        let Some(logits) = activations.last() else {
            return Err(SessionError::Backend("network has no layers".to_string()));
        };
        self.check_targets(logits, targets)?;

        let probs = softmax(logits);
        let loss = cross_entropy(&probs, targets);

        let batch = inputs.nrows() as f32;
        let mut delta = (&probs - targets) / batch;
        let mut grads = vec![None; self.layers.len()];

        for idx in (0..self.layers.len()).rev() {
            let input = if idx == 0 { inputs } else { &activations[idx - 1] };
            let grad_w = input.t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            grads[idx] = Some((grad_w, grad_b));

            if idx > 0 {
                let weights_t = self.layers[idx].weights.t();
                let mut next = delta.dot(&weights_t);
                if self.layers[idx - 1].activation == Activation::Sigmoid {
                    next.zip_mut_with(&activations[idx - 1], |d, &a| *d *= a * (1.0 - a));
                }
                delta = next;
            }
        }

        let grads = grads.into_iter().flatten().collect();
        Ok((loss, grads))
    }

    /// One SGD step on `batch`; returns the mean batch loss.
    pub(crate) fn train_step(
        &mut self,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
        learning_rate: f32,
    ) -> SessionResult<f64> {
        let (loss, grads) = self.gradients(inputs, targets)?;
        for (layer, (grad_w, grad_b)) in self.layers.iter_mut().zip(grads) {
            layer.weights.scaled_add(-learning_rate, &grad_w);
            layer.biases.scaled_add(-learning_rate, &grad_b);
        }
        Ok(loss)
    }

    /// Mean softmax cross-entropy loss without updating parameters.
    pub(crate) fn loss(&self, inputs: &Array2<f32>, targets: &Array2<f32>) -> SessionResult<f64> {
        let activations = self.forward(inputs)?;
        let Some(logits) = activations.last() else {
            return Err(SessionError::Backend("network has no layers".to_string()));
        };
        self.check_targets(logits, targets)?;
        Ok(cross_entropy(&softmax(logits), targets))
    }

    /// Fraction of rows whose predicted class matches the target class.
    pub(crate) fn accuracy(&self, inputs: &Array2<f32>, targets: &Array2<f32>) -> SessionResult<f64> {
        let activations = self.forward(inputs)?;
        let Some(logits) = activations.last() else {
            return Err(SessionError::Backend("network has no layers".to_string()));
        };
        self.check_targets(logits, targets)?;

        let mut correct = 0_usize;
        for (predicted, expected) in logits.rows().into_iter().zip(targets.rows()) {
            if argmax(predicted) == argmax(expected) {
                correct += 1;
            }
        }
        Ok(correct as f64 / logits.nrows() as f64)
    }
}

fn tensor<'a>(state: &'a ParamState, name: &str, shape: &[usize]) -> SessionResult<&'a ParamTensor> {
    let tensor = state
        .get(name)
        .ok_or_else(|| SessionError::ShapeMismatch(format!("missing tensor {name}")))?;
    if tensor.shape != shape {
        return Err(SessionError::ShapeMismatch(format!(
            "tensor {name} has shape {:?}, expected {shape:?}",
            tensor.shape
        )));
    }
    Ok(tensor)
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = idx;
        }
    }
    best
}

/// Row-wise softmax, shifted by the row max for stability.
fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Mean cross-entropy of row-wise probabilities against one-hot targets.
fn cross_entropy(probs: &Array2<f32>, targets: &Array2<f32>) -> f64 {
    let mut total = 0.0_f64;
    for (p, t) in probs.iter().zip(targets.iter()) {
        if *t > 0.0 {
            total -= f64::from(*t) * f64::from(p.max(1e-12).ln());
        }
    }
    total / probs.nrows() as f64
}

//! Session abstraction layer for Treadle.
//!
//! This crate defines the seam between the training-loop runner and the
//! tensor backend that actually executes numeric work: an execution
//! [`Session`] owning mutable parameter state, [`Operation`]s runnable
//! against it, and the serialized [`ParamState`] exchanged with
//! checkpoint storage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Represents an error surfaced by a session backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// An operation needed parameters that were never initialized or restored.
    #[error("parameters are not initialized")]
    Uninitialized,

    /// Imported parameters or fed data did not match the model's shapes.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An input batch was rejected by the backend.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Other backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// A single named parameter tensor, flattened row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    /// Number of elements the shape implies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that the flattened values match the declared shape.
    pub fn validate(&self) -> SessionResult<()> {
        if self.values.len() != self.len() {
            return Err(SessionError::ShapeMismatch(format!(
                "shape {:?} implies {} values, got {}",
                self.shape,
                self.len(),
                self.values.len()
            )));
        }
        Ok(())
    }
}

/// Serialized snapshot of every trainable parameter in a session.
///
/// Tensors are keyed by name in an ordered map so snapshots serialize
/// deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    pub tensors: BTreeMap<String, ParamTensor>,
}

impl ParamState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tensor under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) {
        self.tensors.insert(name.into(), ParamTensor { shape, values });
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.tensors.get(name)
    }

    /// Validates every tensor in the snapshot.
    pub fn validate(&self) -> SessionResult<()> {
        for (name, tensor) in &self.tensors {
            tensor.validate().map_err(|e| {
                SessionError::ShapeMismatch(format!("tensor {name}: {e}"))
            })?;
        }
        Ok(())
    }
}

/// An execution session owning the mutable parameter state of a model.
///
/// A session lives at most as long as its process; parameters survive
/// across processes only through exported [`ParamState`] snapshots.
pub trait Session {
    /// One input batch, already bound to the model's inputs.
    type Batch;

    /// Initializes all trainable parameters from scratch.
    fn initialize(&mut self) -> SessionResult<()>;

    /// True once parameters have been initialized or imported.
    fn is_initialized(&self) -> bool;

    /// Captures the current parameter values.
    fn export_params(&self) -> SessionResult<ParamState>;

    /// Replaces the parameter values with a previously exported snapshot.
    fn import_params(&mut self, state: &ParamState) -> SessionResult<()>;
}

/// A unit of executable work against a session.
///
/// Covers the optimizer-produced training op (updates parameters and
/// yields the batch loss), plain loss fetches, and evaluation metrics:
/// each run consumes one batch and produces one scalar.
pub trait Operation<S: Session + ?Sized> {
    /// Executes against `session` with one input batch.
    fn run(&self, session: &mut S, batch: &S::Batch) -> SessionResult<f64>;

    /// Short name used in logs and progress events.
    fn name(&self) -> &str {
        "op"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_tensor_validate_rejects_bad_length() {
        let tensor = ParamTensor { shape: vec![2, 3], values: vec![0.0; 5] };
        assert!(tensor.validate().is_err());

        let tensor = ParamTensor { shape: vec![2, 3], values: vec![0.0; 6] };
        assert!(tensor.validate().is_ok());
    }

    #[test]
    fn test_param_state_roundtrips_through_json() {
        let mut state = ParamState::new();
        state.insert("layer0/weights", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        state.insert("layer0/biases", vec![2], vec![0.5, -0.5]);

        let json = serde_json::to_string(&state).unwrap();
        let back: ParamState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn test_param_state_validate_names_offending_tensor() {
        let mut state = ParamState::new();
        state.insert("broken", vec![4], vec![1.0]);

        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}

//! Minibatch helpers for in-memory datasets.

use crate::session::DenseBatch;
use ndarray::{Array2, s};
use treadle_abstraction::{SessionError, SessionResult};

/// Slices `inputs`/`targets` into row-aligned minibatches of
/// `batch_size` rows each.
///
/// A trailing partial batch is dropped, keeping every batch the same
/// shape. Batches are `Clone`, so callers cycle them with standard
/// iterator adapters for multi-epoch feeds.
pub fn minibatches(
    batch_size: usize,
    inputs: &Array2<f32>,
    targets: &Array2<f32>,
) -> SessionResult<Vec<DenseBatch>> {
    if batch_size == 0 {
        return Err(SessionError::InvalidBatch("batch_size must be > 0".to_string()));
    }
    if inputs.nrows() != targets.nrows() {
        return Err(SessionError::InvalidBatch(format!(
            "inputs have {} rows, targets {}",
            inputs.nrows(),
            targets.nrows()
        )));
    }

    let full = inputs.nrows() / batch_size;
    let mut batches = Vec::with_capacity(full);
    for idx in 0..full {
        let rows = idx * batch_size..(idx + 1) * batch_size;
        batches.push(DenseBatch {
            inputs: inputs.slice(s![rows.clone(), ..]).to_owned(),
            targets: targets.slice(s![rows, ..]).to_owned(),
        });
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_minibatches_slice_rows() {
        let inputs = array![[1.0_f32, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]];
        let targets = array![[1.0_f32, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]];

        let batches = minibatches(2, &inputs, &targets).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].inputs, array![[1.0_f32, 0.0], [0.0, 1.0]]);
        assert_eq!(batches[1].targets, array![[0.0_f32, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_minibatches_drop_partial_tail() {
        let inputs = array![[1.0_f32], [2.0], [3.0]];
        let targets = array![[1.0_f32], [0.0], [1.0]];

        let batches = minibatches(2, &inputs, &targets).unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_minibatches_reject_bad_input() {
        let inputs = array![[1.0_f32], [2.0]];
        let targets = array![[1.0_f32]];

        assert!(minibatches(0, &inputs, &inputs).is_err());
        assert!(minibatches(1, &inputs, &targets).is_err());
    }
}

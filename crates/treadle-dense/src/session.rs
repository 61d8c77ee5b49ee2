//! Session backend over dense networks.

use crate::network::{DenseNetwork, NetworkSpec};
use ndarray::Array2;
use treadle_abstraction::{Operation, ParamState, Session, SessionError, SessionResult};

/// One input batch bound to a dense network: row-major inputs and
/// one-hot targets with matching row counts.
#[derive(Debug, Clone)]
pub struct DenseBatch {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

impl DenseBatch {
    #[must_use]
    pub fn new(inputs: Array2<f32>, targets: Array2<f32>) -> Self {
        Self { inputs, targets }
    }
}

/// Execution session holding the parameters of one dense network.
///
/// Created empty; the runner decides whether parameters come from fresh
/// initialization or a checkpoint import.
pub struct DenseSession {
    spec: NetworkSpec,
    network: Option<DenseNetwork>,
}

impl DenseSession {
    #[must_use]
    pub fn new(spec: NetworkSpec) -> Self {
        Self { spec, network: None }
    }

    #[must_use]
    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    fn network(&self) -> SessionResult<&DenseNetwork> {
        self.network.as_ref().ok_or(SessionError::Uninitialized)
    }

    fn network_mut(&mut self) -> SessionResult<&mut DenseNetwork> {
        self.network.as_mut().ok_or(SessionError::Uninitialized)
    }
}

impl Session for DenseSession {
    type Batch = DenseBatch;

    fn initialize(&mut self) -> SessionResult<()> {
        self.network = Some(DenseNetwork::initialized(&self.spec)?);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.network.is_some()
    }

    fn export_params(&self) -> SessionResult<ParamState> {
        Ok(self.network()?.export())
    }

    fn import_params(&mut self, state: &ParamState) -> SessionResult<()> {
        self.network = Some(DenseNetwork::import(&self.spec, state)?);
        Ok(())
    }
}

/// Optimizer-produced training op: backprop plus an SGD update, fetching
/// the mean batch loss.
#[derive(Debug, Clone, Copy)]
pub struct SgdOp {
    pub learning_rate: f32,
}

impl SgdOp {
    #[must_use]
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Operation<DenseSession> for SgdOp {
    fn run(&self, session: &mut DenseSession, batch: &DenseBatch) -> SessionResult<f64> {
        session
            .network_mut()?
            .train_step(&batch.inputs, &batch.targets, self.learning_rate)
    }

    fn name(&self) -> &str {
        "sgd"
    }
}

/// Fetches the mean batch loss without updating parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossOp;

impl Operation<DenseSession> for LossOp {
    fn run(&self, session: &mut DenseSession, batch: &DenseBatch) -> SessionResult<f64> {
        session.network()?.loss(&batch.inputs, &batch.targets)
    }

    fn name(&self) -> &str {
        "loss"
    }
}

/// Fraction of batch rows classified correctly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracyOp;

impl Operation<DenseSession> for AccuracyOp {
    fn run(&self, session: &mut DenseSession, batch: &DenseBatch) -> SessionResult<f64> {
        session.network()?.accuracy(&batch.inputs, &batch.targets)
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn xor_batch() -> DenseBatch {
        DenseBatch::new(
            array![[0.0_f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            array![[0.0_f32, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
        )
    }

    #[test]
    fn test_ops_need_initialization() {
        let mut session = DenseSession::new(NetworkSpec::classifier(2, &[4], 2, 1));
        let batch = xor_batch();

        assert_eq!(SgdOp::new(0.5).run(&mut session, &batch), Err(SessionError::Uninitialized));
        assert_eq!(LossOp.run(&mut session, &batch), Err(SessionError::Uninitialized));
        assert!(session.export_params().is_err());
    }

    #[test]
    fn test_session_roundtrips_params() {
        let mut session = DenseSession::new(NetworkSpec::classifier(2, &[4], 2, 1));
        session.initialize().unwrap();
        let batch = xor_batch();

        SgdOp::new(0.5).run(&mut session, &batch).unwrap();
        let trained_loss = LossOp.run(&mut session, &batch).unwrap();
        let state = session.export_params().unwrap();

        let mut other = DenseSession::new(NetworkSpec::classifier(2, &[4], 2, 99));
        assert!(!other.is_initialized());
        other.import_params(&state).unwrap();
        assert!(other.is_initialized());
        assert_eq!(LossOp.run(&mut other, &batch).unwrap(), trained_loss);
    }

    #[test]
    fn test_accuracy_bounded() {
        let mut session = DenseSession::new(NetworkSpec::classifier(2, &[4], 2, 1));
        session.initialize().unwrap();
        let batch = xor_batch();

        let accuracy = AccuracyOp.run(&mut session, &batch).unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }
}

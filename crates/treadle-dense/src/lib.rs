//! Treadle Dense
//!
//! Reference session backend for the Treadle runner: small dense
//! feed-forward networks over `ndarray` with manual backprop and SGD.
//! It exists so the runner can be exercised end to end in tests and
//! demos; anything heavier belongs in a real tensor framework behind
//! the same `treadle-abstraction` traits.

pub mod feed;
pub mod network;
pub mod session;

pub use feed::minibatches;
pub use network::{Activation, LayerSpec, NetworkSpec};
pub use session::{AccuracyOp, DenseBatch, DenseSession, LossOp, SgdOp};

//! Data-feeding collaborators.

use crate::coordinator::Coordinator;
use crate::error::RunnerResult;
use std::thread::JoinHandle;

/// A collaborator that feeds data from background threads while a
/// training run is in flight.
///
/// Implementations spawn their worker threads wired to `coordinator`:
/// workers watch [`Coordinator::should_stop`] (or block in
/// [`Coordinator::wait_for_stop`]) to shut down, and report failures
/// through [`Coordinator::request_stop`]. The runner spawns registered
/// queue runners only when it owns the coordinator; with an external
/// coordinator, thread lifecycle stays with the caller.
pub trait QueueRunner: Send + Sync {
    /// Spawns this runner's worker threads.
    fn spawn(&self, coordinator: &Coordinator) -> RunnerResult<Vec<JoinHandle<()>>>;
}

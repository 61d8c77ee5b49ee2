//! The training/evaluation loop runner.

use crate::coordinator::Coordinator;
use crate::error::{RunnerError, RunnerResult};
use crate::progress::{ProgressEvent, ProgressSink, TracingSink};
use crate::queue::QueueRunner;
use crate::saver::Saver;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info_span;
use treadle_abstraction::{Operation, Session};
use uuid::Uuid;

/// Identifier for a single train or evaluate invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Checkpoint path prefix; `None` disables persistence.
    pub save_path: Option<PathBuf>,
    /// Whether to restore from the latest checkpoint when the session
    /// holds no parameters.
    pub restore: bool,
    /// Checkpoint history retained on disk.
    pub max_to_keep: usize,
    /// Mid-run checkpoint cadence in steps; `None` saves only on
    /// completion.
    pub save_every: Option<u64>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { save_path: None, restore: true, max_to_keep: 5, save_every: None }
    }
}

/// Drives training and evaluation loops over a session backend.
///
/// The runner owns only control flow: step looping, checkpoint cadence,
/// the restore-vs-initialize decision, and the lifecycle of registered
/// data-feeding workers. All numeric work happens inside the operations
/// it is handed.
pub struct Runner {
    saver: Option<Saver>,
    restore: bool,
    save_every: Option<u64>,
    global_step: u64,
    last_init: bool,
    last_restore: bool,
    queue_runners: Vec<Arc<dyn QueueRunner>>,
    progress: Arc<dyn ProgressSink>,
}

impl Runner {
    /// Runner without persistence: parameters live only in the session.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RunnerOptions::default())
    }

    /// Runner persisting checkpoints under `save_path`.
    #[must_use]
    pub fn with_save_path(save_path: impl Into<PathBuf>) -> Self {
        Self::with_options(RunnerOptions {
            save_path: Some(save_path.into()),
            ..RunnerOptions::default()
        })
    }

    #[must_use]
    pub fn with_options(options: RunnerOptions) -> Self {
        let saver = options
            .save_path
            .map(|prefix| Saver::new(prefix).with_max_to_keep(options.max_to_keep));
        Self {
            saver,
            restore: options.restore,
            save_every: options.save_every,
            global_step: 0,
            last_init: false,
            last_restore: false,
            queue_runners: Vec::new(),
            progress: Arc::new(TracingSink),
        }
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Registers a data-feeding collaborator started on training runs.
    pub fn register_queue_runner(&mut self, runner: Arc<dyn QueueRunner>) {
        self.queue_runners.push(runner);
    }

    /// True if the most recent run initialized parameters from scratch.
    #[must_use]
    pub fn last_init(&self) -> bool {
        self.last_init
    }

    /// True if the most recent run restored parameters from a checkpoint.
    #[must_use]
    pub fn last_restore(&self) -> bool {
        self.last_restore
    }

    /// Cumulative optimization steps across all runs of this runner.
    #[must_use]
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Checkpoint persistence helper, when a save path was configured.
    #[must_use]
    pub fn saver(&self) -> Option<&Saver> {
        self.saver.as_ref()
    }

    /// Runs `num_steps` optimization steps of `train_op`, feeding one
    /// batch per step from `feed`.
    ///
    /// The session is restored or initialized first. Registered queue
    /// runners are started on an internally owned coordinator, stopped
    /// and joined on every exit path; when `external_coordinator` is
    /// supplied the runner neither spawns nor stops worker threads and
    /// only observes the stop signal. The windowed mean loss is reported
    /// every `print_every` steps (`0` disables reporting), and a
    /// checkpoint is written on completion when a save path was
    /// configured. An error recorded by a background worker is returned
    /// from here, taking precedence over a loop cut short by the stop
    /// signal.
    ///
    /// Returns the mean loss over the executed steps.
    pub fn train_model<S, O, I>(
        &mut self,
        session: &mut S,
        train_op: &O,
        num_steps: u64,
        feed: I,
        print_every: u64,
        external_coordinator: Option<&Coordinator>,
    ) -> RunnerResult<f64>
    where
        S: Session,
        O: Operation<S>,
        I: IntoIterator<Item = S::Batch>,
    {
        let run_id = RunId::new();
        let span = info_span!("train", run = %run_id, op = train_op.name());
        let _guard = span.enter();

        self.progress.on_event(ProgressEvent::Started { run_id: run_id.clone(), num_steps });
        self.prepare_session(session, &run_id, true)?;

        let owned;
        let coordinator = match external_coordinator {
            Some(external) => external,
            None => {
                owned = Coordinator::new();
                &owned
            }
        };
        let internal = external_coordinator.is_none();

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut failure: Option<RunnerError> = None;
        if internal {
            for queue_runner in &self.queue_runners {
                match queue_runner.spawn(coordinator) {
                    Ok(mut handles) => workers.append(&mut handles),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        let mut feed = feed.into_iter();
        let mut total_loss = 0.0_f64;
        let mut executed = 0_u64;
        let mut window_loss = 0.0_f64;
        let mut window_count = 0_u64;

        if failure.is_none() {
            for step in 1..=num_steps {
                if coordinator.should_stop() {
                    break;
                }
                let Some(batch) = feed.next() else {
                    failure = Some(RunnerError::FeedExhausted { got: step - 1, want: num_steps });
                    break;
                };
                let loss = match train_op.run(session, &batch) {
                    Ok(loss) => loss,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                };
                self.global_step += 1;
                executed += 1;
                total_loss += loss;
                window_loss += loss;
                window_count += 1;

                if print_every != 0 && step % print_every == 0 {
                    self.progress.on_event(ProgressEvent::Loss {
                        run_id: run_id.clone(),
                        global_step: self.global_step,
                        mean_loss: window_loss / window_count as f64,
                    });
                    window_loss = 0.0;
                    window_count = 0;
                }
                if let Some(every) = self.save_every {
                    if every != 0 && step % every == 0 {
                        if let Err(e) = self.save_checkpoint(session, &run_id) {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
        }

        if internal {
            coordinator.request_stop(None);
            coordinator.join(workers)?;
        }
        if let Some(e) = failure {
            return Err(e);
        }

        self.save_checkpoint(session, &run_id)?;
        self.progress.on_event(ProgressEvent::Finished {
            run_id,
            global_step: self.global_step,
        });
        Ok(if executed == 0 { 0.0 } else { total_loss / executed as f64 })
    }

    /// Averages `metric_op` over `num_steps` batches.
    ///
    /// Never checkpoints and never initializes fresh parameters: when
    /// the session holds none, they are restored from the latest
    /// checkpoint, and the call fails with a precondition error if that
    /// is not possible.
    pub fn evaluate_model<S, O, I>(
        &mut self,
        session: &mut S,
        metric_op: &O,
        num_steps: u64,
        feed: I,
    ) -> RunnerResult<f64>
    where
        S: Session,
        O: Operation<S>,
        I: IntoIterator<Item = S::Batch>,
    {
        if num_steps == 0 {
            return Err(RunnerError::FailedPrecondition(
                "evaluate_model needs num_steps > 0".to_string(),
            ));
        }

        let run_id = RunId::new();
        let span = info_span!("eval", run = %run_id, op = metric_op.name());
        let _guard = span.enter();

        self.prepare_session(session, &run_id, false)?;

        let mut feed = feed.into_iter();
        let mut total = 0.0_f64;
        for step in 0..num_steps {
            let Some(batch) = feed.next() else {
                return Err(RunnerError::FeedExhausted { got: step, want: num_steps });
            };
            total += metric_op.run(session, &batch)?;
        }

        let mean = total / num_steps as f64;
        self.progress.on_event(ProgressEvent::EvalResult {
            run_id,
            mean_metric: mean,
            num_steps,
        });
        Ok(mean)
    }

    /// Decides between reuse, restore, and fresh initialization.
    ///
    /// A session that already holds parameters is left alone. Otherwise
    /// restore wins when enabled and a checkpoint resolves; training may
    /// fall back to fresh initialization, evaluation may not.
    fn prepare_session<S: Session>(
        &mut self,
        session: &mut S,
        run_id: &RunId,
        allow_initialize: bool,
    ) -> RunnerResult<()> {
        self.last_init = false;
        self.last_restore = false;

        if session.is_initialized() {
            return Ok(());
        }

        if self.restore {
            if let Some(saver) = self.saver.as_ref() {
                if let Some(path) = saver.latest_checkpoint()? {
                    let data = saver.restore(&path)?;
                    session.import_params(&data.params)?;
                    self.global_step = data.global_step;
                    self.last_restore = true;
                    self.progress.on_event(ProgressEvent::Restored {
                        run_id: run_id.clone(),
                        checkpoint: path,
                        global_step: self.global_step,
                    });
                    return Ok(());
                }
            }
        }

        if allow_initialize {
            session.initialize()?;
            self.last_init = true;
            self.progress.on_event(ProgressEvent::Initialized { run_id: run_id.clone() });
            return Ok(());
        }

        Err(RunnerError::FailedPrecondition(
            "session has no parameters and none can be restored (restore disabled or no checkpoint found)"
                .to_string(),
        ))
    }

    fn save_checkpoint<S: Session>(&mut self, session: &S, run_id: &RunId) -> RunnerResult<()> {
        let Some(saver) = self.saver.as_mut() else {
            return Ok(());
        };
        let params = session.export_params()?;
        let path = saver.save(&params, self.global_step)?;
        self.progress.on_event(ProgressEvent::CheckpointSaved {
            run_id: run_id.clone(),
            path,
            global_step: self.global_step,
        });
        Ok(())
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

//! Treadle CLI - drive the training-loop runner from the command line.
//!
//! Trains and evaluates the built-in XOR demo model, demonstrating
//! checkpointing, restore, and checkpoint inspection.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ndarray::array;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use treadle_dense::{AccuracyOp, DenseBatch, DenseSession, NetworkSpec, SgdOp, minibatches};
use treadle_runner::{Runner, RunnerOptions, Saver};

/// Treadle - training-loop runner demo
#[derive(Parser, Debug)]
#[command(
    name = "treadle",
    author,
    version,
    about = "Treadle - training-loop runner demo",
    long_about = "Trains and evaluates a small XOR classifier through the Treadle runner,\nwith checkpointing, restore, and coordinated data feeding."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Optional TOML file with training settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run optimization steps on the XOR demo model
    Train {
        /// Checkpoint path prefix; omit to skip persistence
        #[arg(long)]
        save_path: Option<PathBuf>,

        /// Number of optimization steps (overrides config)
        #[arg(long)]
        steps: Option<u64>,

        /// Report the windowed mean loss every N steps (overrides config)
        #[arg(long)]
        print_every: Option<u64>,

        /// Initialize fresh instead of restoring an existing checkpoint
        #[arg(long)]
        no_restore: bool,
    },

    /// Evaluate the latest checkpoint's accuracy
    Eval {
        /// Checkpoint path prefix to restore from
        #[arg(long)]
        save_path: PathBuf,

        /// Number of evaluation batches
        #[arg(long, default_value_t = 1)]
        steps: u64,
    },

    /// List checkpoints recorded under a save path
    Checkpoints {
        /// Checkpoint path prefix
        #[arg(long)]
        save_path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;
    let settings = config::load(args.config.as_deref())?;

    match args.command {
        Command::Train { save_path, steps, print_every, no_restore } => train(
            &settings,
            save_path,
            steps.unwrap_or(settings.steps),
            print_every.unwrap_or(settings.print_every),
            !no_restore,
        ),
        Command::Eval { save_path, steps } => eval(&settings, save_path, steps),
        Command::Checkpoints { save_path } => checkpoints(save_path),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("invalid log level: {level}"))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn xor_batches() -> anyhow::Result<Vec<DenseBatch>> {
    let inputs = array![[0.0_f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let targets = array![[0.0_f32, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
    Ok(minibatches(4, &inputs, &targets)?)
}

fn demo_session(settings: &config::Settings) -> DenseSession {
    DenseSession::new(NetworkSpec::classifier(2, &[settings.hidden], 2, settings.seed))
}

fn train(
    settings: &config::Settings,
    save_path: Option<PathBuf>,
    steps: u64,
    print_every: u64,
    restore: bool,
) -> anyhow::Result<()> {
    let mut session = demo_session(settings);
    let mut runner = Runner::with_options(RunnerOptions {
        save_path,
        restore,
        max_to_keep: settings.max_to_keep,
        save_every: settings.save_every,
    });

    let feed = xor_batches()?.into_iter().cycle();
    let mean_loss = runner.train_model(
        &mut session,
        &SgdOp::new(settings.learning_rate),
        steps,
        feed,
        print_every,
        None,
    )?;

    let source = if runner.last_restore() { "restored" } else { "initialized" };
    println!(
        "trained {steps} steps ({source}), global step {}, mean loss {mean_loss:.6}",
        runner.global_step()
    );
    Ok(())
}

fn eval(settings: &config::Settings, save_path: PathBuf, steps: u64) -> anyhow::Result<()> {
    let mut session = demo_session(settings);
    let mut runner = Runner::with_save_path(save_path);

    let feed = xor_batches()?.into_iter().cycle();
    let accuracy = runner.evaluate_model(&mut session, &AccuracyOp, steps, feed)?;

    println!(
        "accuracy over {steps} batch(es) at global step {}: {accuracy:.4}",
        runner.global_step()
    );
    Ok(())
}

fn checkpoints(save_path: PathBuf) -> anyhow::Result<()> {
    let saver = Saver::new(save_path);
    let entries = saver.list_entries()?;
    if entries.is_empty() {
        println!("no checkpoints recorded");
        return Ok(());
    }

    for entry in entries {
        println!(
            "step {:>8}  {}  sha256:{}  {}",
            entry.global_step,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            &entry.sha256[..12.min(entry.sha256.len())],
            entry.path.display()
        );
    }
    Ok(())
}

// RTMCTL v0.3.2 -- RUNTIME RESOURCE MANAGER
// PICKS FREQUENCY, GOVERNOR AND CORE ASSIGNMENT FOR REGISTERED WORKLOADS
//
// DECISIONS HAPPEN IN THE LIBRARY (REGISTRY + ENGINE + CONTROL LOOP)
// THIS BINARY ONLY BOOTSTRAPS A SESSION AGAINST THE SIMULATED PLATFORM
// OR INSPECTS A DEVICE ARCHITECTURE DESCRIPTION

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use rtmctl::tuning::Strategy;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "rtmctl")]
#[command(about = "RTMCTL -- RUNTIME RESOURCE MANAGER")]
struct Cli {
    // PRINT DEBUG-LEVEL ENGINE OUTPUT
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    Qlearn,
    Regression,
}

impl From<Engine> for Strategy {
    fn from(e: Engine) -> Self {
        match e {
            Engine::Qlearn => Strategy::QLearning,
            Engine::Regression => Strategy::Regression,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "RUN A CLOSED-LOOP SESSION AGAINST THE SIMULATED PLATFORM")]
    Run(RunArgs),
    #[command(about = "PRINT AND CLASSIFY A DEVICE ARCHITECTURE DESCRIPTION")]
    Arch {
        // JSON DESCRIPTION; THE SIMULATED PLATFORM'S WHEN OMITTED
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    // DECISION ENGINE
    #[arg(long, value_enum, default_value_t = Engine::Regression)]
    engine: Engine,

    // FRAMES TO SIMULATE (0 = UNTIL CTRL+C)
    #[arg(long, default_value_t = 6000)]
    frames: u64,

    // WALL-CLOCK MICROSECONDS PER SIMULATED FRAME
    #[arg(long, default_value_t = 2000)]
    frame_us: u64,

    // REGRESSION: MINIMUM FRAMES PER SECOND. Q-LEARNING: FRAME DEADLINE IN MS
    #[arg(long)]
    bound: Option<f64>,

    // Q-LEARNING: FRAMES SPENT MEASURING THE WORKLOAD RANGE (0 = STATIC TABLE)
    #[arg(long, default_value_t = rtmctl::tuning::TRAINING_FRAMES)]
    training_frames: u64,

    // Q-LEARNING: ALSO PICK A CORE EACH DECISION
    #[arg(long)]
    mapping: bool,

    // CORES AVAILABLE TO THE AFFINITY KNOB
    #[arg(long, default_value_t = rtmctl::tuning::NUM_CORES)]
    cores: usize,

    // SEED FOR EXPLORATION (OS ENTROPY WHEN OMITTED)
    #[arg(long)]
    seed: Option<u64>,

    // DEVICE ARCHITECTURE DESCRIPTION (SIMULATED PLATFORM'S WHEN OMITTED)
    #[arg(long)]
    arch: Option<PathBuf>,

    // DUMP FULL DECISION LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Arch { path } => cli::arch::run_arch(path.as_deref()),
        Command::Run(args) => {
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;
            cli::run::run_session(&args, &SHUTDOWN)
        }
    }
}

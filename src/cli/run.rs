// RTMCTL CLOSED-LOOP SIMULATION
// REGISTERS THE SIMULATED DEVICE AND ONE APPLICATION, THEN FEEDS EVERY
// SIMULATED FRAME BACK AS A MONITOR UPDATE UNTIL DONE OR CTRL+C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use rtmctl::control::{AppMon, ControlLoop};
use rtmctl::device::{Actuator, DeviceArch};
use rtmctl::registry::Registry;
use rtmctl::sim::{SimConfig, SimPlatform};
use rtmctl::tuning::{QLearnConfig, RtmConfig, Strategy, TrainingConfig, MAPPING_CORES};
use rtmctl::types::*;

use crate::RunArgs;

const PERF_MON: u32 = 0;
const APP_UID: u64 = 1;

// DEFAULT BOUNDS: 150 FPS (REGRESSION), 40MS PER FRAME (Q-LEARNING)
const DEFAULT_MIN_FPS: f64 = 150.0;
const DEFAULT_DEADLINE_MS: f64 = 40.0;

fn build_config(args: &RunArgs) -> RtmConfig {
    let strategy: Strategy = args.engine.into();
    RtmConfig {
        strategy,
        qlearn: QLearnConfig {
            mapping_cores: args.mapping.then(|| MAPPING_CORES.min(args.cores.max(1))),
            ..QLearnConfig::default()
        },
        training: TrainingConfig {
            training_frames: args.training_frames,
            ..TrainingConfig::default()
        },
        num_cores: args.cores.max(1),
        seed: args.seed,
        ..RtmConfig::default()
    }
}

pub fn run_session(args: &RunArgs, shutdown: &'static AtomicBool) -> Result<()> {
    let config = build_config(args);
    let strategy = config.strategy;
    let arch = match &args.arch {
        Some(p) => DeviceArch::from_path(p)?,
        None => SimPlatform::arch()?,
    };

    let sim = Arc::new(SimPlatform::new(SimConfig { num_cores: config.num_cores, ..SimConfig::default() }));
    let registry = Arc::new(Registry::new());
    let actuator: Arc<dyn Actuator> = sim.clone();
    let control = Arc::new(ControlLoop::new(registry, actuator, config).with_arch(arch));

    println!("RTMCTL v0.3.2");
    println!("ENGINE:          {:?}", strategy);
    println!("FRAMES:          {}", if args.frames == 0 { "UNBOUNDED".to_string() } else { args.frames.to_string() });
    println!("FRAME PERIOD:    {} us", args.frame_us);
    println!("CORES:           {}", control.config().num_cores);
    if strategy == Strategy::QLearning {
        println!("TRAINING:        {} frames", args.training_frames);
        println!("MAPPING:         {}", args.mapping);
    }
    println!();

    let (kd, kc, md, mc) = sim.device_items();
    control.register_device(kd, kc, md, mc);
    control.start_session()?;

    // THE SIMULATED APPLICATION
    let pid = std::process::id() as Pid;
    control.on_app_register(pid, APP_UID);
    let perf = match strategy {
        Strategy::Regression => {
            let min_fps = args.bound.unwrap_or(DEFAULT_MIN_FPS);
            AppMonCont::app(pid, PERF_MON, AppMonType::Perf, min_fps, 10_000.0, 1.0)
        }
        Strategy::QLearning => {
            let deadline = args.bound.unwrap_or(DEFAULT_DEADLINE_MS);
            // SINGLE-THREADED DECODER
            sim.set_process_affinity(pid, &[0])?;
            AppMonCont::app(pid, PERF_MON, AppMonType::Perf, 0.0, deadline, 1.0)
        }
    };
    control.on_monitor_register(pid, AppMon::Cont(perf));

    println!("RTMCTL IS ACTIVE (CTRL+C TO EXIT)");

    let tick = Duration::from_micros(args.frame_us);
    let mut last = None;
    while !shutdown.load(Ordering::Relaxed) {
        let frame = sim.step();
        let reading = match strategy {
            Strategy::Regression => frame.fps,
            Strategy::QLearning => frame.time_ms,
        };
        control.on_value_change(pid, Domain::Cont, PERF_MON, reading);
        last = Some(frame);
        if args.frames != 0 && frame.index >= args.frames {
            break;
        }
        std::thread::sleep(tick);
    }

    println!("RTMCTL IS SHUTTING DOWN");

    control.on_app_deregister(pid);
    control.stop_session()?;
    control.deregister_device();

    if let Some(f) = last {
        println!("LAST FRAME:      {} ({:.2} ms, {:.1} fps)", f.index, f.time_ms, f.fps);
    }
    println!("OPERATING POINT: level {} on {} cores, {:.2} W",
        sim.freq_level(), sim.cores(), sim.power_watts());

    let log = control.decision_log();
    if args.dump_log {
        log.dump();
    }
    log.summary();

    println!("RTMCTL OUT.");
    Ok(())
}

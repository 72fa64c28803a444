// RTMCTL CONTROL LOOP TESTS
// DEVICE WIRING, PREDICTOR LAYOUT, REGRESSION CYCLE, Q-LEARNING FRAMES,
// POWER LOGGER
//
// A RECORDING ACTUATOR STANDS IN FOR THE TRANSPORT. THE Q-LEARNING
// SECTION DRIVES THE SIMULATED PLATFORM. EVERY ENGINE IS SEEDED.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;

use rtmctl::control::{AppKnob, AppMon, ControlLoop, PredictorClass};
use rtmctl::device::Actuator;
use rtmctl::error::RtmError;
use rtmctl::event::DecisionKind;
use rtmctl::registry::Registry;
use rtmctl::session::SessionState;
use rtmctl::sim::{SimConfig, SimPlatform, CYCLES_MON, FREQ_KNOB, GOVERNOR_KNOB, GOVERNOR_ONDEMAND};
use rtmctl::tuning::{RtmConfig, TrainingConfig, AFFINITY_KNOB_ID, DEFAULT_FREQ_LEVEL, GOVERNOR_USERSPACE};
use rtmctl::types::*;

const PID: Pid = 4242;
const PERF: u32 = 0;
const FREQ: u32 = 10;
const GOV: u32 = 11;
const POWER: u32 = 20;

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Disc(Key, Disc),
    Cont(Key, Cont),
    Pin(Pid, Vec<usize>),
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
    power: Mutex<f64>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl Actuator for Recorder {
    fn set_discrete_knob(&self, knob: Key, value: Disc) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Disc(knob, value));
        Ok(())
    }

    fn set_continuous_knob(&self, knob: Key, value: Cont) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Cont(knob, value));
        Ok(())
    }

    fn get_discrete_monitor(&self, mon: Key) -> anyhow::Result<Disc> {
        bail!("no discrete monitor {}", mon)
    }

    fn get_continuous_monitor(&self, _mon: Key) -> anyhow::Result<Cont> {
        Ok(*self.power.lock())
    }

    fn set_process_affinity(&self, pid: Pid, cores: &[usize]) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Pin(pid, cores.to_vec()));
        Ok(())
    }
}

fn regression_config() -> RtmConfig {
    RtmConfig { num_cores: 4, seed: Some(7), ..RtmConfig::default() }
}

fn recorded(config: RtmConfig) -> (Arc<Recorder>, ControlLoop) {
    let rec = Arc::new(Recorder::default());
    let actuator: Arc<dyn Actuator> = rec.clone();
    let control = ControlLoop::new(Arc::new(Registry::new()), actuator, config);
    (rec, control)
}

fn register_device(control: &ControlLoop) {
    control.register_device(
        vec![
            DevKnobDisc::device(FREQ, DevKnobType::Freq, 0, 18, 5),
            DevKnobDisc::device(GOV, DevKnobType::Governor, 0, 3, GOVERNOR_ONDEMAND),
        ],
        vec![],
        vec![],
        vec![DevMonCont::device(POWER, DevMonType::Pow, 0.0, 100.0)],
    );
}

fn perf_monitor(min: f64) -> AppMon {
    AppMon::Cont(AppMonCont::app(PID, PERF, AppMonType::Perf, min, 10_000.0, 1.0))
}

fn layout(control: &ControlLoop) -> Vec<(PredictorClass, Key)> {
    control.with_engine(|c| {
        c.regression()
            .map(|d| d.layout().entries().iter().map(|p| (p.class, p.key)).collect())
            .unwrap_or_default()
    })
}

fn perf_samples(control: &ControlLoop) -> usize {
    control.with_engine(|c| {
        c.regression()
            .and_then(|d| d.optimizer().model(Key::app(PID, PERF)))
            .map_or(0, |m| m.samples())
    })
}

// CURRENT (AFFINITY, FREQUENCY) SETTING AS THE REGISTRY SEES IT
fn operating_point(control: &ControlLoop) -> (f64, f64) {
    let snap = control.registry().snapshot();
    let cores = snap.app_knob_disc(Key::app(PID, AFFINITY_KNOB_ID)).map_or(0, |k| k.val);
    let freq = snap.dev_knob_disc(FREQ).map_or(0, |k| k.val);
    (cores as f64, freq as f64)
}

// LINEAR PLANT: BOTH SIGNALS RISE WITH CORES AND FREQUENCY
fn plant_perf(cores: f64, freq: f64) -> f64 {
    20.0 * cores + 5.0 * freq
}

fn plant_power(cores: f64, freq: f64) -> f64 {
    1.0 + 2.0 * cores + freq
}

// FEED THE PLANT UNTIL THE FIRST OPTIMISATION LANDS
fn train(control: &ControlLoop) {
    for _ in 0..400 {
        let (c, f) = operating_point(control);
        control.on_device_sample(POWER, plant_power(c, f));
        control.on_value_change(PID, Domain::Cont, PERF, plant_perf(c, f));
        if control.decision_log().count(DecisionKind::Optimise) > 0 {
            return;
        }
    }
    panic!("no optimisation after 400 frames");
}

fn trained_loop(min_perf: f64) -> (Arc<Recorder>, ControlLoop) {
    let (rec, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    assert!(control.on_monitor_register(PID, perf_monitor(min_perf)));
    train(&control);
    (rec, control)
}

// === DEVICE WIRING ===

#[test]
fn register_device_takes_over_governors_and_maxes_frequency() {
    let (rec, control) = recorded(regression_config());
    register_device(&control);

    let calls = rec.calls();
    assert!(calls.contains(&Call::Disc(Key::device(GOV), GOVERNOR_USERSPACE)));
    assert!(calls.contains(&Call::Disc(Key::device(FREQ), 18)));
    assert_eq!(control.registry().dev_knobs_disc().get(Key::device(GOV)).unwrap().val, GOVERNOR_USERSPACE);
    assert_eq!(control.registry().dev_knobs_disc().get(Key::device(FREQ)).unwrap().val, 18);

    assert_eq!(layout(&control), vec![(PredictorClass::DevDisc, Key::device(FREQ))]);
    control.with_engine(|c| {
        let d = c.regression().unwrap();
        assert_eq!(d.power_monitors(), &[POWER]);
        assert!(d.optimizer().has_model(Key::device(POWER)));
    });
}

#[test]
fn deregister_device_restores_governors() {
    let (rec, control) = recorded(regression_config());
    register_device(&control);
    control.deregister_device();

    assert_eq!(rec.calls().last(), Some(&Call::Disc(Key::device(GOV), GOVERNOR_ONDEMAND)));
    assert!(layout(&control).is_empty());
    assert!(control.registry().dev_knobs_disc().is_empty());
    control.with_engine(|c| {
        let d = c.regression().unwrap();
        assert!(d.power_monitors().is_empty());
        assert!(!d.optimizer().has_model(Key::device(POWER)));
        assert_eq!(d.optimizer().num_knobs(), 0);
    });
}

// === PREDICTOR LAYOUT ===

#[test]
fn layout_keeps_category_order() {
    let (_, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    let gen_before = control.with_engine(|c| c.regression().unwrap().layout().generation());

    assert!(control.on_knob_register(PID, AppKnob::Cont(AppKnobCont::app(PID, 2, AppKnobType::Par, 0.5, 2.0, 1.0))));
    assert!(control.on_knob_register(PID, AppKnob::Disc(AppKnobDisc::app(PID, 1, AppKnobType::Par, 1, 8, 4))));

    assert_eq!(layout(&control), vec![
        (PredictorClass::AppDisc, Key::app(PID, AFFINITY_KNOB_ID)),
        (PredictorClass::AppDisc, Key::app(PID, 1)),
        (PredictorClass::AppCont, Key::app(PID, 2)),
        (PredictorClass::DevDisc, Key::device(FREQ)),
    ]);
    control.with_engine(|c| {
        let d = c.regression().unwrap();
        assert_eq!(d.optimizer().num_knobs(), 4);
        assert_eq!(d.layout().generation(), gen_before + 2);
    });
}

#[test]
fn affinity_knob_spans_configured_cores() {
    let (_, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    let k = control.registry().app_knobs_disc().get(Key::app(PID, AFFINITY_KNOB_ID)).unwrap();
    assert_eq!((k.min, k.max, k.val), (1, 4, 4));
    assert_eq!(k.kind, AppKnobType::Aff);
}

#[test]
fn non_parameter_knobs_stay_out_of_layout() {
    let (rec, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    assert!(control.on_knob_register(PID, AppKnob::Disc(AppKnobDisc::app(PID, 5, AppKnobType::Prec, 0, 3, 1))));
    assert!(control.on_knob_register(PID, AppKnob::Disc(AppKnobDisc::app(PID, 6, AppKnobType::DevSel, 1, 3, 2))));

    assert_eq!(layout(&control).len(), 1);
    // DEVICE SELECTION STARTS ON ITS FIRST DEVICE
    assert!(rec.calls().contains(&Call::Disc(Key::app(PID, 6), 1)));
    assert_eq!(control.registry().app_knobs_disc().get(Key::app(PID, 6)).unwrap().val, 1);
}

#[test]
fn rejected_knob_leaves_layout_alone() {
    let (_, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    assert!(!control.on_knob_register(PID, AppKnob::Cont(AppKnobCont::app(PID, 3, AppKnobType::Par, 5.0, 1.0, 2.0))));
    assert_eq!(layout(&control).len(), 1);
}

#[test]
fn knob_deregistration_shrinks_layout() {
    let (_, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    control.on_knob_register(PID, AppKnob::Cont(AppKnobCont::app(PID, 2, AppKnobType::Par, 0.5, 2.0, 1.0)));
    assert_eq!(layout(&control).len(), 2);

    assert!(control.on_knob_deregister(PID, Domain::Cont, 2));
    assert!(!control.on_knob_deregister(PID, Domain::Cont, 2));
    assert_eq!(layout(&control), vec![(PredictorClass::AppDisc, Key::app(PID, AFFINITY_KNOB_ID))]);
    assert_eq!(control.with_engine(|c| c.regression().unwrap().optimizer().num_knobs()), 1);
}

#[test]
fn app_deregistration_drops_predictors_and_models() {
    let (_, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    control.on_knob_register(PID, AppKnob::Disc(AppKnobDisc::app(PID, 1, AppKnobType::Par, 1, 8, 4)));
    control.on_monitor_register(PID, perf_monitor(60.0));
    assert!(control.with_engine(|c| c.regression().unwrap().optimizer().has_model(Key::app(PID, PERF))));

    control.on_app_deregister(PID);
    assert_eq!(layout(&control), vec![(PredictorClass::DevDisc, Key::device(FREQ))]);
    control.with_engine(|c| {
        let d = c.regression().unwrap();
        assert!(!d.optimizer().has_model(Key::app(PID, PERF)));
        assert!(d.optimizer().has_model(Key::device(POWER)));
        assert_eq!(d.optimizer().num_knobs(), 1);
    });
    assert_eq!(control.registry().binding_perf(), None);
}

#[test]
fn monitor_deregistration_forgets_model() {
    let (_, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, perf_monitor(60.0));
    assert!(control.on_monitor_deregister(PID, Domain::Cont, PERF));
    assert!(!control.on_monitor_deregister(PID, Domain::Cont, PERF));
    assert!(!control.with_engine(|c| c.regression().unwrap().optimizer().has_model(Key::app(PID, PERF))));
}

// === REGRESSION CYCLE ===

#[test]
fn first_update_after_push_is_skipped() {
    let (_, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, perf_monitor(60.0));
    let settled = || control.with_engine(|c| c.regression().unwrap().is_settled());

    assert!(control.on_value_change(PID, Domain::Cont, PERF, 100.0));
    assert_eq!(perf_samples(&control), 1);
    assert_eq!(control.decision_log().count(DecisionKind::Randomise), 1);
    assert!(!settled());

    control.on_value_change(PID, Domain::Cont, PERF, 100.0);
    assert_eq!(perf_samples(&control), 1);
    assert!(settled());

    control.on_value_change(PID, Domain::Cont, PERF, 100.0);
    assert_eq!(perf_samples(&control), 2);
    assert_eq!(control.decision_log().count(DecisionKind::Randomise), 2);
}

#[test]
fn randomise_stays_inside_ranges() {
    let (rec, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, perf_monitor(60.0));
    for _ in 0..40 {
        control.on_value_change(PID, Domain::Cont, PERF, 100.0);
        let (cores, freq) = operating_point(&control);
        assert!((1.0..=4.0).contains(&cores));
        assert!((0.0..=18.0).contains(&freq));
    }
    // AFFINITY IS APPLIED AS A PIN, NOT A KNOB WRITE
    let pins: Vec<Call> = rec.calls().into_iter().filter(|c| matches!(c, Call::Pin(..))).collect();
    assert!(!pins.is_empty());
    assert!(!rec.calls().iter().any(|c| matches!(c, Call::Disc(k, _) if k.id == AFFINITY_KNOB_ID)));
}

#[test]
fn unbounded_knob_randomises_inside_its_range() {
    let (rec, control) = recorded(regression_config());
    control.on_app_register(PID, 1);
    let wide = Key::app(PID, 3);
    let huge = Key::app(PID, 4);
    assert!(control.on_knob_register(PID, AppKnob::Cont(AppKnobCont::app(PID, 3, AppKnobType::Par, 0.0, f64::MAX, 1.0))));
    assert!(control.on_knob_register(PID, AppKnob::Cont(AppKnobCont::app(PID, 4, AppKnobType::Par, -f64::MAX, f64::MAX, 0.0))));
    control.on_monitor_register(PID, perf_monitor(60.0));

    for _ in 0..20 {
        control.on_value_change(PID, Domain::Cont, PERF, 100.0);
    }
    assert!(control.decision_log().count(DecisionKind::Randomise) >= 10);
    let pushed: Vec<f64> = rec
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Cont(k, v) if k == wide || k == huge => Some(v),
            _ => None,
        })
        .collect();
    assert!(!pushed.is_empty());
    assert!(pushed.iter().all(|v| v.is_finite()));
    let w = control.registry().app_knobs_cont().get(wide).unwrap();
    assert!(w.val >= 0.0 && w.val <= f64::MAX);
}

#[test]
fn non_perf_monitor_never_randomises() {
    let (_, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, AppMon::Cont(AppMonCont::app(PID, 9, AppMonType::Acc, 0.0, 1.0, 1.0)));
    for _ in 0..10 {
        control.on_value_change(PID, Domain::Cont, 9, 0.5);
    }
    assert_eq!(control.decision_log().count(DecisionKind::Randomise), 0);
    assert_eq!(control.with_engine(|c| c.regression().unwrap().optimizer().model(Key::app(PID, 9)).unwrap().samples()), 10);
}

#[test]
fn trained_models_optimise_once_and_meet_bound() {
    let (rec, control) = trained_loop(60.0);

    let (c, f) = operating_point(&control);
    assert!(plant_perf(c, f) >= 60.0 - 1e-6, "perf {} at ({}, {})", plant_perf(c, f), c, f);
    assert!(plant_power(c, f) < plant_power(4.0, 18.0));
    assert!(control.with_engine(|e| e.regression().unwrap().has_optimised(Key::app(PID, PERF))));
    assert!(rec.calls().contains(&Call::Pin(PID, (4 - c as usize..4).collect())));

    let last = *control.decision_log().last().unwrap();
    assert_eq!(last.kind, DecisionKind::Optimise);
    assert_eq!(last.knobs, 2);
    assert!(last.predicted.is_finite());

    // LATER SAMPLES DO NOT RE-TRIGGER THE SEARCH
    for _ in 0..20 {
        let (c, f) = operating_point(&control);
        control.on_device_sample(POWER, plant_power(c, f));
        control.on_value_change(PID, Domain::Cont, PERF, plant_perf(c, f));
    }
    assert_eq!(control.decision_log().count(DecisionKind::Optimise), 1);
}

#[test]
fn bound_change_reoptimises() {
    let (_, control) = trained_loop(60.0);
    assert!(control.on_bound_change(PID, Target::Monitor(Domain::Cont), PERF, Field::Min, 120.0));
    assert_eq!(control.decision_log().count(DecisionKind::Optimise), 2);
    let (c, f) = operating_point(&control);
    assert!(plant_perf(c, f) >= 120.0 - 1e-6);
}

#[test]
fn unreachable_bound_is_logged_infeasible() {
    let (_, control) = trained_loop(60.0);
    let before = operating_point(&control);
    assert!(control.on_bound_change(PID, Target::Monitor(Domain::Cont), PERF, Field::Min, 500.0));
    assert_eq!(control.decision_log().count(DecisionKind::Infeasible), 1);
    assert_eq!(operating_point(&control), before);
    assert!(matches!(control.optimise(), Err(RtmError::Infeasible { .. })));
}

#[test]
fn weight_change_does_not_optimise() {
    let (_, control) = trained_loop(60.0);
    assert!(control.on_bound_change(PID, Target::Monitor(Domain::Cont), PERF, Field::Weight, 3.0));
    assert_eq!(control.decision_log().count(DecisionKind::Optimise), 1);
}

#[test]
fn optimise_without_target_fails() {
    let (_, control) = recorded(regression_config());
    assert_eq!(control.optimise(), Err(RtmError::NoTarget));

    // PERFORMANCE MONITOR BUT NO POWER MONITOR
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, perf_monitor(60.0));
    assert_eq!(control.optimise(), Err(RtmError::NoTarget));
}

#[test]
fn optimise_untrained_reports_untrained() {
    let (_, control) = recorded(regression_config());
    register_device(&control);
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, perf_monitor(60.0));
    assert!(control.optimise().unwrap_err().is_untrained());
}

#[test]
fn updates_for_unknown_items_are_ignored() {
    let (_, control) = recorded(regression_config());
    assert!(!control.on_value_change(PID, Domain::Cont, 77, 1.0));
    assert!(!control.on_bound_change(PID, Target::Monitor(Domain::Disc), 77, Field::Min, 1.0));
    assert!(control.decision_log().is_empty());
}

// === Q-LEARNING FRAMES ===

fn sim_loop(training: TrainingConfig) -> (Arc<SimPlatform>, ControlLoop) {
    let sim = Arc::new(SimPlatform::new(SimConfig::default()));
    let actuator: Arc<dyn Actuator> = sim.clone();
    let config = RtmConfig { training, seed: Some(11), ..RtmConfig::qlearning() };
    let control = ControlLoop::new(Arc::new(Registry::new()), actuator, config)
        .with_arch(SimPlatform::arch().unwrap());
    let (kd, kc, md, mc) = sim.device_items();
    control.register_device(kd, kc, md, mc);
    (sim, control)
}

fn run_frames(sim: &SimPlatform, control: &ControlLoop, frames: u64) {
    for _ in 0..frames {
        let frame = sim.step();
        control.on_value_change(PID, Domain::Cont, PERF, frame.time_ms);
    }
}

fn deadline_monitor() -> AppMon {
    AppMon::Cont(AppMonCont::app(PID, PERF, AppMonType::Perf, 0.0, 40.0, 1.0))
}

#[test]
fn qlearning_picks_unit_controls() {
    let (sim, control) = sim_loop(TrainingConfig { training_frames: 0, ..TrainingConfig::default() });
    assert_eq!(sim.governor(), GOVERNOR_USERSPACE);
    control.with_engine(|c| {
        let d = c.qlearning().unwrap();
        assert_eq!(d.freq_knob(), Some(FREQ_KNOB));
        assert_eq!(d.cycle_monitor(), Some(CYCLES_MON));
    });

    control.on_app_register(PID, 1);
    assert_eq!(sim.freq_level(), DEFAULT_FREQ_LEVEL as Disc);
}

#[test]
fn static_table_decides_every_period() {
    let (sim, control) = sim_loop(TrainingConfig { training_frames: 0, ..TrainingConfig::default() });
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, deadline_monitor());

    run_frames(&sim, &control, 100);

    let log = control.decision_log();
    assert_eq!(log.count(DecisionKind::QStep), 10);
    let last = log.last().unwrap();
    assert_eq!(last.level, sim.freq_level());
    assert_eq!(last.core, -1);
    drop(log);

    control.with_engine(|c| {
        let d = c.qlearning().unwrap();
        assert_eq!(d.frame(), 100);
        assert_eq!(d.controller().unwrap().deadline(), 40.0);
    });
}

#[test]
fn training_phase_builds_table_then_decides() {
    let training = TrainingConfig { training_frames: 200, warmup_frames: 50, ..TrainingConfig::default() };
    let (sim, control) = sim_loop(training);
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, deadline_monitor());

    run_frames(&sim, &control, 199);
    assert!(control.with_engine(|c| c.qlearning().unwrap().controller().is_none()));
    assert!(control.decision_log().is_empty());

    run_frames(&sim, &control, 101);
    assert_eq!(control.decision_log().count(DecisionKind::QStep), 10);
    control.with_engine(|c| {
        let d = c.qlearning().unwrap();
        let geometry = d.calibration().geometry();
        let rows = d.controller().unwrap().table().rows();
        match geometry {
            Some((r, _)) => assert_eq!(rows, r),
            None => assert!(rows > 0),
        }
    });
}

#[test]
fn new_app_restarts_training() {
    let (sim, control) = sim_loop(TrainingConfig { training_frames: 0, ..TrainingConfig::default() });
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, deadline_monitor());
    run_frames(&sim, &control, 30);
    assert_eq!(control.with_engine(|c| c.qlearning().unwrap().frame()), 30);

    control.on_app_register(PID + 1, 2);
    control.with_engine(|c| {
        let d = c.qlearning().unwrap();
        assert_eq!(d.frame(), 0);
        assert!(d.controller().is_none());
    });
}

#[test]
fn non_binding_monitor_does_not_step() {
    let (_, control) = sim_loop(TrainingConfig { training_frames: 0, ..TrainingConfig::default() });
    control.on_app_register(PID, 1);
    control.on_monitor_register(PID, AppMon::Cont(AppMonCont::app(PID, 3, AppMonType::Acc, 0.0, 1.0, 1.0)));
    for _ in 0..20 {
        control.on_value_change(PID, Domain::Cont, 3, 0.5);
    }
    assert_eq!(control.with_engine(|c| c.qlearning().unwrap().frame()), 0);
}

#[test]
fn qlearning_deregister_restores_governor() {
    let (sim, control) = sim_loop(TrainingConfig { training_frames: 0, ..TrainingConfig::default() });
    control.deregister_device();
    assert_eq!(sim.governor(), GOVERNOR_ONDEMAND);
    control.with_engine(|c| assert_eq!(c.qlearning().unwrap().freq_knob(), None));
    let gov = control.registry().dev_knobs_disc().get(Key::device(GOVERNOR_KNOB));
    assert!(gov.is_none());
}

// === POWER LOGGER ===

#[test]
fn power_logger_feeds_power_model() {
    let config = RtmConfig {
        power_poll: Duration::from_millis(1),
        power_sample: Duration::from_millis(2),
        ..regression_config()
    };
    let (rec, control) = recorded(config);
    *rec.power.lock() = 2.5;
    let control = Arc::new(control);
    register_device(&control);

    control.start_session().unwrap();
    assert_eq!(control.session().worker_count(), 1);
    std::thread::sleep(Duration::from_millis(80));
    control.stop_session().unwrap();

    assert_eq!(control.session().state(), SessionState::Stopped);
    assert_eq!(control.session().worker_count(), 0);
    let samples = control.with_engine(|c| {
        c.regression().unwrap().optimizer().model(Key::device(POWER)).unwrap().samples()
    });
    assert!(samples > 0);
    assert_eq!(control.registry().dev_mons_cont().get(Key::device(POWER)).unwrap().val, 2.5);
}

#[test]
fn session_without_power_monitor_spawns_nothing() {
    let (_, control) = recorded(regression_config());
    let control = Arc::new(control);
    control.start_session().unwrap();
    assert_eq!(control.session().worker_count(), 0);
    control.stop_session().unwrap();
    assert!(control.stop_session().is_err());
}

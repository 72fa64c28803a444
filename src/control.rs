// RTMCTL CONTROL LOOP
// OWNS THE REGISTRY HANDLE, THE ACTIVE ENGINE AND THE SESSION.
// EVERY INBOUND EVENT FROM THE APP/DEVICE TRANSPORT LANDS HERE, IS APPLIED
// TO THE REGISTRY, AND THEN FORWARDED TO WHICHEVER ENGINE WAS SELECTED.
//
// LOCK ORDER: ENGINE -> REGISTRY COLLECTION -> DECISION LOG.
// THE REGRESSION SEARCH RUNS WITH THE ENGINE LOCK RELEASED AND IS
// DISCARDED IF THE PREDICTOR LAYOUT MOVED UNDERNEATH IT.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::{Actuator, DeviceArch, UnitControls};
use crate::error::{Result, RtmError, SessionError};
use crate::event::{DecisionKind, DecisionLog};
use crate::model::Fit;
use crate::qlearn::{Decision, QLearningController, WorkloadCalibration};
use crate::registry::{BindingPerf, Registry, Snapshot};
use crate::regression::{descend, KnobRange, RegressionOptimizer};
use crate::session::Session;
use crate::tuning::{
    cores_to_affinity, QLearnConfig, RtmConfig, Strategy, TrainingConfig, AFFINITY_KNOB_ID,
    DEFAULT_FREQ_LEVEL, GOVERNOR_USERSPACE,
};
use crate::types::*;

// --- INBOUND PAYLOADS ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AppKnob {
    Disc(AppKnobDisc),
    Cont(AppKnobCont),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AppMon {
    Disc(AppMonDisc),
    Cont(AppMonCont),
}

// --- PREDICTOR LAYOUT ---

// PREDICTOR CATEGORIES, IN THE ORDER THEY APPEAR IN THE KNOB VECTOR
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PredictorClass {
    AppDisc,
    AppCont,
    DevDisc,
    DevCont,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Predictor {
    pub class: PredictorClass,
    pub key: Key,
    // APPLYING THIS KNOB PINS ITS OWNER INSTEAD OF SETTING A VALUE
    pub affinity: bool,
}

impl Predictor {
    fn read(&self, snap: &Snapshot) -> Option<(KnobRange, f64)> {
        match self.class {
            PredictorClass::AppDisc => snap.app_knob_disc(self.key)
                .map(|k| (KnobRange::new(k.min as f64, k.max as f64), k.val as f64)),
            PredictorClass::AppCont => snap.app_knob_cont(self.key)
                .map(|k| (KnobRange::new(k.min, k.max), k.val)),
            PredictorClass::DevDisc => snap.dev_knob_disc(self.key.id)
                .map(|k| (KnobRange::new(k.min as f64, k.max as f64), k.val as f64)),
            PredictorClass::DevCont => snap.dev_knob_cont(self.key.id)
                .map(|k| (KnobRange::new(k.min, k.max), k.val)),
        }
    }

    fn is_discrete(&self) -> bool {
        matches!(self.class, PredictorClass::AppDisc | PredictorClass::DevDisc)
    }
}

// FIXED-ORDER LIST OF THE KNOBS THAT MAKE UP EVERY MODEL'S PREDICTOR
// VECTOR. `generation` MOVES ON EVERY CHANGE
#[derive(Clone, Debug, Default)]
pub struct PredictorLayout {
    entries: Vec<Predictor>,
    generation: u64,
}

impl PredictorLayout {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[Predictor] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|p| p.key).collect()
    }

    // KEEPS CATEGORY ORDER; INSERTION ORDER WITHIN A CATEGORY
    fn insert(&mut self, p: Predictor) -> bool {
        if self.entries.iter().any(|e| e.class == p.class && e.key == p.key) {
            return false;
        }
        let pos = self.entries.iter().rposition(|e| e.class <= p.class).map_or(0, |i| i + 1);
        self.entries.insert(pos, p);
        self.generation += 1;
        true
    }

    fn remove(&mut self, class: PredictorClass, key: Key) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.class == class && e.key == key));
        let changed = self.entries.len() != before;
        if changed {
            self.generation += 1;
        }
        changed
    }

    fn remove_where<F: Fn(&Predictor) -> bool>(&mut self, pred: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !pred(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.generation += 1;
        }
        removed
    }

    // CURRENT RANGES AND VALUES OF EVERY PREDICTOR, IN LAYOUT ORDER
    pub fn read(&self, snap: &Snapshot) -> Result<(Vec<KnobRange>, Vec<f64>)> {
        let mut ranges = Vec::with_capacity(self.entries.len());
        let mut values = Vec::with_capacity(self.entries.len());
        for p in &self.entries {
            if let Some((r, v)) = p.read(snap) {
                ranges.push(r);
                values.push(v);
            }
        }
        if values.len() != self.entries.len() {
            return Err(RtmError::PredictorMismatch { expected: self.entries.len(), got: values.len() });
        }
        Ok((ranges, values))
    }
}

// --- REGRESSION DRIVER ---

enum Followup {
    Nothing,
    Randomise,
    Optimise,
}

pub struct RegressionDriver {
    optimizer: RegressionOptimizer,
    layout: PredictorLayout,
    // FALSE FROM A KNOB PUSH UNTIL THE FIRST MONITOR UPDATE AFTER IT
    settled: bool,
    trained_once: HashSet<Key>,
    power_monitors: Vec<u32>,
    updates: HashMap<Key, u32>,
    rng: StdRng,
}

impl RegressionDriver {
    fn new(cfg: &RtmConfig, rng: StdRng) -> Self {
        Self {
            optimizer: RegressionOptimizer::new(cfg.regression.clone()),
            layout: PredictorLayout::default(),
            settled: true,
            trained_once: HashSet::new(),
            power_monitors: Vec::new(),
            updates: HashMap::new(),
            rng,
        }
    }

    pub fn optimizer(&self) -> &RegressionOptimizer {
        &self.optimizer
    }

    pub fn layout(&self) -> &PredictorLayout {
        &self.layout
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn power_monitors(&self) -> &[u32] {
        &self.power_monitors
    }

    pub fn has_optimised(&self, key: Key) -> bool {
        self.trained_once.contains(&key)
    }

    fn add_predictor(&mut self, p: Predictor) {
        if self.layout.insert(p) {
            self.optimizer.add_knob();
        }
    }

    fn remove_predictor(&mut self, class: PredictorClass, key: Key) {
        if self.layout.remove(class, key) {
            self.optimizer.remove_knob();
        }
    }

    fn remove_predictors_where<F: Fn(&Predictor) -> bool>(&mut self, pred: F) {
        for _ in 0..self.layout.remove_where(pred) {
            self.optimizer.remove_knob();
        }
    }

    fn forget_monitor(&mut self, key: Key) {
        self.optimizer.remove_model(key);
        self.trained_once.remove(&key);
        self.updates.remove(&key);
    }

    fn on_sample(&mut self, key: Key, value: f64, is_perf: bool, snap: &Snapshot, every: u32) -> Followup {
        let count = self.updates.entry(key).or_insert(0);
        *count = count.wrapping_add(1);
        if *count % every.max(1) != 0 {
            return Followup::Nothing;
        }
        // FIRST UPDATE AFTER A PUSH REFLECTS THE TRANSITION, NOT THE NEW SETTING
        if !self.settled {
            self.settled = true;
            return Followup::Nothing;
        }

        let x = match self.layout.read(snap) {
            Ok((_, x)) => x,
            Err(e) => {
                log_debug!("REGRESSION: SAMPLE FOR {} DROPPED: {}", key, e);
                return Followup::Nothing;
            }
        };
        match self.optimizer.add_sample(key, value, &x) {
            Ok(Fit::Trained) => log_debug!("REGRESSION: MODEL {} RETRAINED", key),
            Ok(Fit::Collected) => {}
            Err(e @ RtmError::DegenerateFit(_)) => log_debug!("REGRESSION: {}", e),
            Err(e) => {
                log_debug!("REGRESSION: SAMPLE FOR {} REJECTED: {}", key, e);
                return Followup::Nothing;
            }
        }

        if !is_perf {
            return Followup::Nothing;
        }
        if !self.optimizer.is_trained(key) {
            return Followup::Randomise;
        }
        if self.trained_once.insert(key) {
            Followup::Optimise
        } else {
            Followup::Nothing
        }
    }
}

// WIDEST CONTINUOUS SPAN rand's UNIFORM SAMPLER ACCEPTS WITHOUT OVERFLOW
const UNIFORM_SPAN_LIMIT: f64 = f64::MAX / 4.0;

fn draw(rng: &mut StdRng, p: &Predictor, r: KnobRange) -> f64 {
    if p.is_discrete() {
        rng.gen_range(r.min as i64..=r.max as i64) as f64
    } else if r.max - r.min <= UNIFORM_SPAN_LIMIT {
        rng.gen_range(r.min..=r.max)
    } else {
        // UNBOUNDED KNOBS ([0, f64::MAX]): STEP IN HALF-SPANS SO NOTHING OVERFLOWS
        let half = r.max / 2.0 - r.min / 2.0;
        let u: f64 = rng.gen();
        (r.min + u * half + u * half).clamp(r.min, r.max)
    }
}

// --- Q-LEARNING DRIVER ---

pub struct QLearnDriver {
    qcfg: QLearnConfig,
    training: TrainingConfig,
    controller: Option<QLearningController>,
    calibration: WorkloadCalibration,
    frame: u64,
    time_sum: f64,
    freq_knob: Option<u32>,
    cycle_mon: Option<u32>,
    rng: StdRng,
}

impl QLearnDriver {
    fn new(cfg: &RtmConfig, rng: StdRng) -> Self {
        Self {
            qcfg: cfg.qlearn.clone(),
            training: cfg.training.clone(),
            controller: None,
            calibration: WorkloadCalibration::new(cfg.training.clone()),
            frame: 0,
            time_sum: 0.0,
            freq_knob: None,
            cycle_mon: None,
            rng,
        }
    }

    pub fn controller(&self) -> Option<&QLearningController> {
        self.controller.as_ref()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn calibration(&self) -> &WorkloadCalibration {
        &self.calibration
    }

    pub fn freq_knob(&self) -> Option<u32> {
        self.freq_knob
    }

    pub fn cycle_monitor(&self) -> Option<u32> {
        self.cycle_mon
    }

    fn reset(&mut self) {
        self.controller = None;
        self.calibration.reset();
        self.frame = 0;
        self.time_sum = 0.0;
    }

    fn build(&mut self, deadline: f64, geometry: Option<(usize, u64)>) {
        let mut cfg = self.qcfg.clone();
        if let Some((rows, length)) = geometry {
            cfg.rows = rows;
            cfg.length = length;
        }
        log_info!("QLEARN: TABLE {} ROWS, ROW LENGTH {} CYCLES, DEADLINE {:.3}", cfg.rows, cfg.length, deadline);
        let rng = StdRng::seed_from_u64(self.rng.gen());
        self.controller = Some(QLearningController::with_rng(cfg, deadline, rng));
    }

    // ONE PERFORMANCE UPDATE. RETURNS A DECISION ON DECISION-PERIOD BOUNDARIES
    // ONCE THE TABLE EXISTS.
    fn step<F>(&mut self, elapsed: f64, deadline: f64, mut read_cycles: F) -> Option<Decision>
    where
        F: FnMut(u32) -> Option<u64>,
    {
        let training = self.training.training_frames;
        if training == 0 && self.controller.is_none() {
            self.build(deadline, None);
        }
        self.frame += 1;
        self.time_sum += elapsed;

        let period = self.training.decision_period.max(1);
        if self.frame % period != 0 {
            return None;
        }
        let mean = self.time_sum / period as f64;
        self.time_sum = 0.0;
        let cycles = self.cycle_mon.and_then(&mut read_cycles).map(|c| c / period);

        if self.frame < training {
            if let Some(c) = cycles {
                self.calibration.observe(self.frame, c);
            }
            return None;
        }
        if self.controller.is_none() {
            let geometry = self.calibration.geometry();
            if geometry.is_none() {
                log_warn!("QLEARN: CALIBRATION RANGE TOO NARROW, USING STATIC TABLE");
            }
            self.build(deadline, geometry);
            return None;
        }
        let controller = self.controller.as_mut()?;
        Some(controller.run(cycles.unwrap_or(0), mean))
    }
}

// --- CONTROLLER ---

// THE ENGINE SELECTED AT CONSTRUCTION. BOTH VARIANTS SHARE THE REGISTRY
pub enum Controller {
    QLearning(QLearnDriver),
    Regression(RegressionDriver),
}

impl Controller {
    fn new(cfg: &RtmConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        match cfg.strategy {
            Strategy::QLearning => Self::QLearning(QLearnDriver::new(cfg, rng)),
            Strategy::Regression => Self::Regression(RegressionDriver::new(cfg, rng)),
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::QLearning(_) => Strategy::QLearning,
            Self::Regression(_) => Strategy::Regression,
        }
    }

    pub fn regression(&self) -> Option<&RegressionDriver> {
        match self {
            Self::Regression(d) => Some(d),
            Self::QLearning(_) => None,
        }
    }

    pub fn qlearning(&self) -> Option<&QLearnDriver> {
        match self {
            Self::QLearning(d) => Some(d),
            Self::Regression(_) => None,
        }
    }
}

// --- CONTROL LOOP ---

pub struct ControlLoop {
    registry: Arc<Registry>,
    actuator: Arc<dyn Actuator>,
    config: RtmConfig,
    arch: Option<DeviceArch>,
    engine: Mutex<Controller>,
    log: Mutex<DecisionLog>,
    // GOVERNOR ID AND ITS VALUE BEFORE WE TOOK IT OVER
    governors: Mutex<Vec<(u32, Disc)>>,
    session: Session,
}

impl ControlLoop {
    pub fn new(registry: Arc<Registry>, actuator: Arc<dyn Actuator>, config: RtmConfig) -> Self {
        let engine = Controller::new(&config);
        Self {
            registry,
            actuator,
            config,
            arch: None,
            engine: Mutex::new(engine),
            log: Mutex::new(DecisionLog::new()),
            governors: Mutex::new(Vec::new()),
            session: Session::new(),
        }
    }

    pub fn with_arch(mut self, arch: DeviceArch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &RtmConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn decision_log(&self) -> MutexGuard<'_, DecisionLog> {
        self.log.lock()
    }

    // READ-ONLY VIEW OF THE ENGINE STATE
    pub fn with_engine<R>(&self, f: impl FnOnce(&Controller) -> R) -> R {
        f(&self.engine.lock())
    }

    // --- OUTBOUND HELPERS ---

    fn push_dev_disc(&self, id: u32, v: Disc) {
        self.registry.update_device(Target::Knob(Domain::Disc), id, Field::Value, v as f64);
        if let Err(e) = self.actuator.set_discrete_knob(Key::device(id), v) {
            log_warn!("ACTUATOR: DEVICE KNOB {} <- {} FAILED: {:#}", id, v, e);
        }
    }

    fn push_dev_cont(&self, id: u32, v: Cont) {
        self.registry.update_device(Target::Knob(Domain::Cont), id, Field::Value, v);
        if let Err(e) = self.actuator.set_continuous_knob(Key::device(id), v) {
            log_warn!("ACTUATOR: DEVICE KNOB {} <- {} FAILED: {:#}", id, v, e);
        }
    }

    fn pin(&self, pid: Pid, cores: &[usize]) {
        if let Err(e) = self.actuator.set_process_affinity(pid, cores) {
            log_warn!("ACTUATOR: AFFINITY {} -> {:?} FAILED: {:#}", pid, cores, e);
        }
    }

    fn read_cycles(&self, id: u32) -> Option<u64> {
        match self.actuator.get_discrete_monitor(Key::device(id)) {
            Ok(v) => {
                self.registry.update_device(Target::Monitor(Domain::Disc), id, Field::Value, v as f64);
                Some(v.max(0) as u64)
            }
            Err(e) => {
                log_warn!("ACTUATOR: CYCLE MONITOR {} READ FAILED: {:#}", id, e);
                None
            }
        }
    }

    // LEVEL INDEX CLAMPED INTO THE KNOB'S OWN RANGE
    fn level_value(&self, id: u32, level: usize) -> Disc {
        let level = level.min(Disc::MAX as usize) as Disc;
        match self.registry.dev_knobs_disc().get(Key::device(id)) {
            Some(k) => level.clamp_to(k.min, k.max),
            None => level,
        }
    }

    fn units(&self, snap: &Snapshot) -> Vec<UnitControls> {
        match &self.arch {
            Some(arch) => arch.classify(snap),
            // NO DESCRIPTION: THE WHOLE DEVICE IS ONE UNIT
            None => vec![UnitControls {
                unit: 0,
                name: "device".to_string(),
                freq_knobs: snap.dev_knobs_disc.iter().filter(|k| k.kind == DevKnobType::Freq).copied().collect(),
                freq_knobs_cont: snap.dev_knobs_cont.iter().filter(|k| k.kind == DevKnobType::Freq).copied().collect(),
                governors: snap.dev_knobs_disc.iter().filter(|k| k.kind == DevKnobType::Governor).copied().collect(),
                cycle_monitors: snap.dev_mons_disc.iter().filter(|m| m.kind == DevMonType::Cycles).copied().collect(),
                power_monitors: snap.dev_mons_cont.iter().filter(|m| m.kind == DevMonType::Pow).copied().collect(),
            }],
        }
    }

    // --- DEVICE ---

    // REGISTER THE DEVICE'S ITEMS, HAND EVERY GOVERNOR TO USERSPACE AND
    // WIRE THE FREQUENCY KNOBS AND MONITORS INTO THE ACTIVE ENGINE
    pub fn register_device(
        &self,
        knobs_disc: Vec<DevKnobDisc>,
        knobs_cont: Vec<DevKnobCont>,
        mons_disc: Vec<DevMonDisc>,
        mons_cont: Vec<DevMonCont>,
    ) {
        self.registry.register_device(knobs_disc, knobs_cont, mons_disc, mons_cont);
        let snap = self.registry.snapshot();
        let units = self.units(&snap);

        {
            let mut governors = self.governors.lock();
            for g in units.iter().flat_map(|u| u.governors.iter()) {
                governors.push((g.id, g.val));
                self.push_dev_disc(g.id, GOVERNOR_USERSPACE);
            }
        }

        let mut engine = self.engine.lock();
        match &mut *engine {
            Controller::Regression(d) => {
                for u in units.iter().filter(|u| u.has_governor() || self.arch.is_none()) {
                    for k in &u.freq_knobs {
                        self.push_dev_disc(k.id, k.max);
                        d.add_predictor(Predictor { class: PredictorClass::DevDisc, key: Key::device(k.id), affinity: false });
                    }
                    for k in &u.freq_knobs_cont {
                        self.push_dev_cont(k.id, k.max);
                        d.add_predictor(Predictor { class: PredictorClass::DevCont, key: Key::device(k.id), affinity: false });
                    }
                }
                for m in snap.dev_mons_cont.iter().filter(|m| m.kind == DevMonType::Pow) {
                    d.optimizer.add_model(Key::device(m.id));
                    d.power_monitors.push(m.id);
                }
            }
            Controller::QLearning(d) => {
                let unit = units.iter()
                    .find(|u| u.has_governor() && !u.freq_knobs.is_empty() && !u.cycle_monitors.is_empty())
                    .or_else(|| units.iter().find(|u| !u.freq_knobs.is_empty()));
                d.freq_knob = unit.and_then(|u| u.freq_knobs.first()).map(|k| k.id);
                d.cycle_mon = unit.and_then(|u| u.cycle_monitors.first()).map(|m| m.id);
                if d.freq_knob.is_none() {
                    log_warn!("QLEARN: NO FREQUENCY KNOB ON THE DEVICE");
                }
            }
        }
        log_info!("DEVICE: {} UNITS, {} GOVERNORS IN USERSPACE", units.len(), self.governors.lock().len());
    }

    // RESTORE GOVERNORS AND DROP EVERY DEVICE ITEM FROM THE ENGINE
    pub fn deregister_device(&self) {
        let governors: Vec<(u32, Disc)> = std::mem::take(&mut *self.governors.lock());
        for (id, initial) in governors {
            self.push_dev_disc(id, initial);
        }

        let mut engine = self.engine.lock();
        match &mut *engine {
            Controller::Regression(d) => {
                d.remove_predictors_where(|p| p.key.owner.is_none());
                for id in std::mem::take(&mut d.power_monitors) {
                    d.forget_monitor(Key::device(id));
                }
            }
            Controller::QLearning(d) => {
                d.freq_knob = None;
                d.cycle_mon = None;
            }
        }
        drop(engine);
        self.registry.deregister_device();
        log_info!("DEVICE: DEREGISTERED");
    }

    // POWER SAMPLE FROM THE DEVICE. FEEDS THE POWER MODEL REGARDLESS OF
    // WHETHER THE KNOBS HAVE SETTLED
    pub fn on_device_sample(&self, id: u32, value: Cont) {
        self.registry.update_device(Target::Monitor(Domain::Cont), id, Field::Value, value);
        let key = Key::device(id);
        let snap = self.registry.snapshot();
        let mut engine = self.engine.lock();
        if let Controller::Regression(d) = &mut *engine {
            if !d.optimizer.has_model(key) {
                return;
            }
            let x = match d.layout.read(&snap) {
                Ok((_, x)) => x,
                Err(_) => return,
            };
            match d.optimizer.add_sample(key, value, &x) {
                Ok(Fit::Trained) => log_debug!("REGRESSION: POWER MODEL {} RETRAINED", key),
                Ok(Fit::Collected) => {}
                Err(e) => log_debug!("REGRESSION: POWER SAMPLE {}: {}", key, e),
            }
        }
    }

    // --- APPLICATIONS ---

    pub fn on_app_register(&self, pid: Pid, uid: u64) {
        self.registry.register_app(pid, uid);
        log_info!("APP {} REGISTERED (UID {})", pid, uid);

        let mut engine = self.engine.lock();
        match &mut *engine {
            Controller::Regression(d) => {
                let cores = self.config.num_cores.clamp(1, Disc::MAX as usize) as Disc;
                let knob = AppKnobDisc::app(pid, AFFINITY_KNOB_ID, AppKnobType::Aff, 1, cores, cores);
                if self.registry.register_app_knob_disc(knob) {
                    d.add_predictor(Predictor {
                        class: PredictorClass::AppDisc,
                        key: Key::app(pid, AFFINITY_KNOB_ID),
                        affinity: true,
                    });
                }
            }
            Controller::QLearning(d) => {
                d.reset();
                if let Some(id) = d.freq_knob {
                    self.push_dev_disc(id, self.level_value(id, DEFAULT_FREQ_LEVEL));
                }
            }
        }
    }

    pub fn on_app_deregister(&self, pid: Pid) {
        let removed = self.registry.deregister_app(pid);
        let mut engine = self.engine.lock();
        if let Controller::Regression(d) = &mut *engine {
            d.remove_predictors_where(|p| p.key.owner == Some(pid));
            for m in &removed.mons_disc {
                d.forget_monitor(Entry::key(m));
            }
            for m in &removed.mons_cont {
                d.forget_monitor(Entry::key(m));
            }
        }
        log_info!("APP {} DEREGISTERED ({} KNOBS, {} MONITORS)", pid,
            removed.knobs_disc.len() + removed.knobs_cont.len(),
            removed.mons_disc.len() + removed.mons_cont.len());
    }

    // --- KNOBS ---

    // RETURNS FALSE WHEN THE REGISTRY REJECTED THE KNOB
    pub fn on_knob_register(&self, pid: Pid, knob: AppKnob) -> bool {
        let predictor = match knob {
            AppKnob::Disc(mut k) => {
                k.owner = Some(pid);
                if !self.registry.register_app_knob_disc(k) {
                    return false;
                }
                if k.kind == AppKnobType::DevSel {
                    if let Err(e) = self.actuator.set_discrete_knob(Key::app(pid, k.id), k.min) {
                        log_warn!("ACTUATOR: DEVICE-SELECT KNOB {}:{} FAILED: {:#}", pid, k.id, e);
                    }
                }
                matches!(k.kind, AppKnobType::Par | AppKnobType::Aff).then(|| Predictor {
                    class: PredictorClass::AppDisc,
                    key: Key::app(pid, k.id),
                    affinity: k.kind == AppKnobType::Aff,
                })
            }
            AppKnob::Cont(mut k) => {
                k.owner = Some(pid);
                if !self.registry.register_app_knob_cont(k) {
                    return false;
                }
                (k.kind == AppKnobType::Par).then(|| Predictor {
                    class: PredictorClass::AppCont,
                    key: Key::app(pid, k.id),
                    affinity: false,
                })
            }
        };
        if let Some(p) = predictor {
            if let Controller::Regression(d) = &mut *self.engine.lock() {
                d.add_predictor(p);
            }
        }
        true
    }

    pub fn on_knob_deregister(&self, pid: Pid, domain: Domain, id: u32) -> bool {
        let key = Key::app(pid, id);
        let removed = self.registry.deregister_app_knob(domain, key);
        if removed {
            if let Controller::Regression(d) = &mut *self.engine.lock() {
                let class = match domain {
                    Domain::Disc => PredictorClass::AppDisc,
                    Domain::Cont => PredictorClass::AppCont,
                };
                d.remove_predictor(class, key);
            }
        }
        removed
    }

    // --- MONITORS ---

    pub fn on_monitor_register(&self, pid: Pid, mon: AppMon) -> bool {
        let key = match mon {
            AppMon::Disc(mut m) => {
                m.owner = Some(pid);
                if !self.registry.register_app_mon_disc(m) {
                    return false;
                }
                Entry::key(&m)
            }
            AppMon::Cont(mut m) => {
                m.owner = Some(pid);
                if !self.registry.register_app_mon_cont(m) {
                    return false;
                }
                Entry::key(&m)
            }
        };
        if let Controller::Regression(d) = &mut *self.engine.lock() {
            d.optimizer.add_model(key);
        }
        true
    }

    pub fn on_monitor_deregister(&self, pid: Pid, domain: Domain, id: u32) -> bool {
        let key = Key::app(pid, id);
        let removed = self.registry.deregister_app_mon(domain, key);
        if removed {
            if let Controller::Regression(d) = &mut *self.engine.lock() {
                d.forget_monitor(key);
            }
        }
        removed
    }

    // --- UPDATES ---

    // BOUND OR WEIGHT CHANGE. A MIN/MAX CHANGE ON THE BINDING PERFORMANCE
    // MONITOR RE-OPTIMISES UNDER THE REGRESSION ENGINE
    pub fn on_bound_change(&self, pid: Pid, target: Target, id: u32, field: Field, v: f64) -> bool {
        let key = Key::app(pid, id);
        if !self.registry.update_app(target, key, field, v) {
            return false;
        }
        let binding = matches!(target, Target::Monitor(_))
            && matches!(field, Field::Min | Field::Max)
            && self.registry.binding_perf().map_or(false, |b| b.key == key);
        if binding && self.strategy() == Strategy::Regression {
            if let Err(e) = self.optimise() {
                log_debug!("OPTIMISE: {}", e);
            }
        }
        true
    }

    // NEW MONITOR READING FROM AN APPLICATION
    pub fn on_value_change(&self, pid: Pid, domain: Domain, id: u32, v: f64) -> bool {
        let key = Key::app(pid, id);
        if !self.registry.update_app(Target::Monitor(domain), key, Field::Value, v) {
            return false;
        }
        let perf = self.registry.binding_perf().filter(|b| b.key == key);

        let followup = {
            let mut engine = self.engine.lock();
            match &mut *engine {
                Controller::QLearning(d) => {
                    if let Some(b) = perf {
                        if let Some(decision) = d.step(v, b.target, |id| self.read_cycles(id)) {
                            self.apply_decision(d, b, decision);
                        }
                    }
                    Followup::Nothing
                }
                Controller::Regression(d) => {
                    let snap = self.registry.snapshot();
                    match d.on_sample(key, v, perf.is_some(), &snap, self.config.sample_every) {
                        Followup::Randomise => {
                            self.randomise(d, &snap);
                            Followup::Nothing
                        }
                        other => other,
                    }
                }
            }
        };

        if let Followup::Optimise = followup {
            if let Err(e) = self.optimise() {
                log_debug!("OPTIMISE: {} (WILL RETRY ON NEXT SAMPLE)", e);
                if let Controller::Regression(d) = &mut *self.engine.lock() {
                    d.trained_once.remove(&key);
                }
            }
        }
        true
    }

    // --- ENGINE ACTIONS ---

    fn apply_decision(&self, d: &QLearnDriver, perf: BindingPerf, decision: Decision) {
        if let Some(id) = d.freq_knob {
            self.push_dev_disc(id, self.level_value(id, decision.level));
        }
        if let (Some(core), Some(pid)) = (decision.core, perf.key.owner) {
            self.pin(pid, &[core]);
        }
        log_debug!("QLEARN: LEVEL {} ({} KHZ){}", decision.level, decision.freq_khz,
            if decision.explored { " EXPLORED" } else { "" });
        self.log.lock().record(
            DecisionKind::QStep,
            1,
            decision.level as i32,
            decision.core.map_or(-1, |c| c as i32),
            f64::NAN,
        );
    }

    // PUSH ONE VALUE PER PREDICTOR, IN LAYOUT ORDER
    fn apply_vector(&self, layout: &PredictorLayout, x: &[f64]) {
        for (p, &v) in layout.entries().iter().zip(x) {
            match p.class {
                PredictorClass::AppDisc => {
                    let v = Disc::from_f64_ceil(v);
                    self.registry.update_app(Target::Knob(Domain::Disc), p.key, Field::Value, v as f64);
                    if p.affinity {
                        if let Some(pid) = p.key.owner {
                            self.pin(pid, &cores_to_affinity(v, self.config.num_cores));
                        }
                    } else if let Err(e) = self.actuator.set_discrete_knob(p.key, v) {
                        log_warn!("ACTUATOR: APP KNOB {} <- {} FAILED: {:#}", p.key, v, e);
                    }
                }
                PredictorClass::AppCont => {
                    self.registry.update_app(Target::Knob(Domain::Cont), p.key, Field::Value, v);
                    if let Err(e) = self.actuator.set_continuous_knob(p.key, v) {
                        log_warn!("ACTUATOR: APP KNOB {} <- {} FAILED: {:#}", p.key, v, e);
                    }
                }
                PredictorClass::DevDisc => self.push_dev_disc(p.key.id, Disc::from_f64_ceil(v)),
                PredictorClass::DevCont => self.push_dev_cont(p.key.id, v),
            }
        }
    }

    // UNIFORM DRAW OVER EVERY PREDICTOR'S RANGE SO TRAINING DATA COVERS THE SPACE
    fn randomise(&self, d: &mut RegressionDriver, snap: &Snapshot) {
        let mut x = Vec::with_capacity(d.layout.len());
        for p in d.layout.entries() {
            match p.read(snap) {
                Some((r, _)) => x.push(draw(&mut d.rng, p, r)),
                None => return,
            }
        }
        d.settled = false;
        self.apply_vector(&d.layout, &x);
        log_debug!("RANDOMISE: {:?}", x);
        self.log.lock().record(DecisionKind::Randomise, x.len() as u32, -1, -1, f64::NAN);
    }

    // MINIMISE THE FIRST DEVICE POWER MONITOR SUBJECT TO THE BINDING
    // PERFORMANCE MONITOR STAYING AT OR ABOVE ITS MINIMUM, AND PUSH THE
    // RESULT. THE SEARCH ITSELF RUNS WITHOUT HOLDING THE ENGINE LOCK
    pub fn optimise(&self) -> Result<Vec<f64>> {
        let perf = self.registry.binding_perf().ok_or(RtmError::NoTarget)?;
        let snap = self.registry.snapshot();

        let (target, bound, ranges, generation, cfg) = {
            let engine = self.engine.lock();
            let d = match &*engine {
                Controller::Regression(d) => d,
                Controller::QLearning(_) => return Err(RtmError::NoTarget),
            };
            let target = d.power_monitors.first().map(|&id| Key::device(id)).ok_or(RtmError::NoTarget)?;
            let (ranges, _) = d.layout.read(&snap)?;
            let t = d.optimizer.model(target).cloned().ok_or(RtmError::UnknownModel(target))?;
            let b = d.optimizer.model(perf.key).cloned().ok_or(RtmError::UnknownModel(perf.key))?;
            (t, b, ranges, d.layout.generation(), d.optimizer.config().clone())
        };

        let result = descend(&target, &bound, perf.min, &ranges, &cfg);

        let mut engine = self.engine.lock();
        let d = match &mut *engine {
            Controller::Regression(d) => d,
            Controller::QLearning(_) => return Err(RtmError::NoTarget),
        };
        // AN APP OR KNOB CAME OR WENT DURING THE SEARCH
        if d.layout.generation() != generation {
            return Err(RtmError::Superseded);
        }
        match result {
            Ok(x) => {
                let predicted = target.predict(&x).unwrap_or(f64::NAN);
                d.settled = false;
                self.apply_vector(&d.layout, &x);
                log_debug!("OPTIMISE: {:?} PREDICTED {:.3} UNDER BOUND {:.3}", x, predicted, perf.min);
                self.log.lock().record(DecisionKind::Optimise, x.len() as u32, -1, -1, predicted);
                Ok(x)
            }
            Err(e) => {
                if let RtmError::Infeasible { best, .. } = e {
                    self.log.lock().record(DecisionKind::Infeasible, 0, -1, -1, best);
                }
                Err(e)
            }
        }
    }

    // --- SESSION ---

    // START THE SESSION AND, UNDER THE REGRESSION ENGINE, THE POWER LOGGER
    pub fn start_session(self: &Arc<Self>) -> std::result::Result<(), SessionError> {
        self.session.start()?;
        let monitors: Vec<u32> = match &*self.engine.lock() {
            Controller::Regression(d) => d.power_monitors.clone(),
            Controller::QLearning(_) => Vec::new(),
        };
        if monitors.is_empty() {
            return Ok(());
        }

        let control = Arc::clone(self);
        let ticks = self.config.power_ticks_per_sample();
        let mut sums = vec![0.0; monitors.len()];
        let mut reads = vec![0u32; monitors.len()];
        let mut count = 0u32;
        self.session.spawn_periodic("rtm-power", self.config.power_poll, move || {
            for (i, &id) in monitors.iter().enumerate() {
                match control.actuator.get_continuous_monitor(Key::device(id)) {
                    Ok(v) if v.is_finite() => {
                        sums[i] += v;
                        reads[i] += 1;
                    }
                    Ok(_) => {}
                    Err(e) => log_warn!("ACTUATOR: POWER MONITOR {} READ FAILED: {:#}", id, e),
                }
            }
            count += 1;
            if count < ticks {
                return;
            }
            for (i, &id) in monitors.iter().enumerate() {
                if reads[i] > 0 {
                    control.on_device_sample(id, sums[i] / reads[i] as f64);
                }
                sums[i] = 0.0;
                reads[i] = 0;
            }
            count = 0;
        })
    }

    pub fn stop_session(&self) -> std::result::Result<(), SessionError> {
        self.session.stop()
    }
}

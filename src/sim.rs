// RTMCTL SIMULATED PLATFORM
// ONE CPU CLUSTER (FREQUENCY + GOVERNOR KNOBS, CYCLE + POWER MONITORS) AND
// ONE DECODER-STYLE APPLICATION. FULLY DETERMINISTIC.
//
// THROUGHPUT AND POWER ARE LINEAR IN FREQUENCY AND ACTIVE CORES:
//   FPS   = MHZ * CORES * 1E6 / CYCLES_PER_FRAME
//   WATTS = IDLE + DYNAMIC * GHZ * CORES

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::device::{compose_id, Actuator, DeviceArch};
use crate::tuning::{FREQ_LEVELS, FREQ_TABLE_MHZ, NUM_CORES};
use crate::types::*;

pub const UNIT: u32 = 1;
pub const FREQ_KNOB: u32 = 0x0100_0000;       // compose_id(1, 0, 0, 0)
pub const GOVERNOR_KNOB: u32 = 0x0100_0001;   // compose_id(1, 0, 0, 1)
pub const POWER_MON: u32 = 0x0101_0000;       // compose_id(1, 1, 0, 0)
pub const CYCLES_MON: u32 = 0x0101_0001;      // compose_id(1, 1, 0, 1)
pub const GOVERNOR_ONDEMAND: Disc = 3;

pub const ARCH_JSON: &str = r#"{
    "device": {
        "descriptor": "rtmctl-sim",
        "functional_units": {
            "cluster": {
                "id": 1,
                "knobs": { "id": 0,
                    "freq": { "id": 0, "type": "FREQ" },
                    "governor": { "id": 1, "type": "GOVERNOR" } },
                "mons": { "id": 1,
                    "power": { "id": 0, "type": "POW" },
                    "cycles": { "id": 1, "type": "CYCLES" } }
            }
        }
    }
}"#;

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub cycles_per_frame: u64,
    // PEAK-TO-PEAK WORKLOAD SWING AS A FRACTION OF THE BASE
    pub swing: f64,
    pub swing_period: u64,
    pub idle_watts: f64,
    pub watts_per_ghz_core: f64,
    pub num_cores: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cycles_per_frame: 20_000_000,
            swing: 0.4,
            swing_period: 400,
            idle_watts: 0.5,
            watts_per_ghz_core: 0.8,
            num_cores: NUM_CORES,
        }
    }
}

// ONE SIMULATED FRAME
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimFrame {
    pub index: u64,
    pub cycles: u64,
    pub time_ms: f64,
    pub fps: f64,
}

#[derive(Debug)]
struct SimState {
    freq_level: Disc,
    governor: Disc,
    cores: usize,
    frame: u64,
    cycle_counter: u64,
    app_knobs: Vec<(Key, f64)>,
}

pub struct SimPlatform {
    cfg: SimConfig,
    state: Mutex<SimState>,
}

impl SimPlatform {
    pub fn new(cfg: SimConfig) -> Self {
        let cores = cfg.num_cores.max(1);
        Self {
            cfg,
            state: Mutex::new(SimState {
                freq_level: (FREQ_LEVELS - 1) as Disc,
                governor: GOVERNOR_ONDEMAND,
                cores,
                frame: 0,
                cycle_counter: 0,
                app_knobs: Vec::new(),
            }),
        }
    }

    pub fn arch() -> Result<DeviceArch> {
        DeviceArch::from_json(ARCH_JSON)
    }

    // DEVICE ITEMS IN THE SHAPE `register_device` TAKES
    pub fn device_items(&self) -> (Vec<DevKnobDisc>, Vec<DevKnobCont>, Vec<DevMonDisc>, Vec<DevMonCont>) {
        let state = self.state.lock();
        (
            vec![
                DevKnobDisc::device(compose_id(UNIT, 0, 0, 0), DevKnobType::Freq, 0, (FREQ_LEVELS - 1) as Disc, state.freq_level),
                DevKnobDisc::device(compose_id(UNIT, 0, 0, 1), DevKnobType::Governor, 0, 3, state.governor),
            ],
            vec![],
            vec![DevMonDisc::device(compose_id(UNIT, 1, 0, 1), DevMonType::Cycles, 0, Disc::MAX)],
            vec![DevMonCont::device(compose_id(UNIT, 1, 0, 0), DevMonType::Pow, 0.0, 100.0)],
        )
    }

    fn mhz(level: Disc) -> f64 {
        let idx = (level.max(0) as usize).min(FREQ_LEVELS - 1);
        FREQ_TABLE_MHZ[idx] as f64
    }

    // TRIANGLE WAVE AROUND THE BASE WORKLOAD
    fn cycles_for(&self, frame: u64) -> u64 {
        let period = self.cfg.swing_period.max(2);
        let phase = (frame % period) as f64 / period as f64;
        let tri = if phase < 0.5 { phase * 2.0 } else { 2.0 - phase * 2.0 };
        let scale = 1.0 - self.cfg.swing / 2.0 + self.cfg.swing * tri;
        (self.cfg.cycles_per_frame as f64 * scale).max(1.0) as u64
    }

    // ADVANCE ONE FRAME AT THE CURRENT OPERATING POINT
    pub fn step(&self) -> SimFrame {
        let mut state = self.state.lock();
        state.frame += 1;
        let cycles = self.cycles_for(state.frame);
        state.cycle_counter = state.cycle_counter.saturating_add(cycles);
        let hz = Self::mhz(state.freq_level) * 1e6 * state.cores as f64;
        let time_s = cycles as f64 / hz;
        SimFrame { index: state.frame, cycles, time_ms: time_s * 1e3, fps: 1.0 / time_s }
    }

    pub fn power_watts(&self) -> f64 {
        let state = self.state.lock();
        self.cfg.idle_watts
            + self.cfg.watts_per_ghz_core * Self::mhz(state.freq_level) / 1000.0 * state.cores as f64
    }

    pub fn freq_level(&self) -> Disc {
        self.state.lock().freq_level
    }

    pub fn governor(&self) -> Disc {
        self.state.lock().governor
    }

    pub fn cores(&self) -> usize {
        self.state.lock().cores
    }

    pub fn app_knob(&self, key: Key) -> Option<f64> {
        self.state.lock().app_knobs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn set_app_knob(&self, key: Key, v: f64) {
        let mut state = self.state.lock();
        match state.app_knobs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = v,
            None => state.app_knobs.push((key, v)),
        }
    }
}

impl Actuator for SimPlatform {
    fn set_discrete_knob(&self, knob: Key, value: Disc) -> Result<()> {
        if knob.owner.is_some() {
            self.set_app_knob(knob, value as f64);
            return Ok(());
        }
        let mut state = self.state.lock();
        match knob.id {
            FREQ_KNOB => state.freq_level = value.clamp(0, (FREQ_LEVELS - 1) as Disc),
            GOVERNOR_KNOB => state.governor = value,
            id => bail!("no discrete knob 0x{:08x} on the simulated device", id),
        }
        Ok(())
    }

    fn set_continuous_knob(&self, knob: Key, value: Cont) -> Result<()> {
        if knob.owner.is_some() {
            self.set_app_knob(knob, value);
            return Ok(());
        }
        bail!("no continuous knob 0x{:08x} on the simulated device", knob.id)
    }

    // CYCLE COUNTER RESETS ON EVERY READ
    fn get_discrete_monitor(&self, mon: Key) -> Result<Disc> {
        if mon.id != CYCLES_MON || mon.owner.is_some() {
            bail!("no discrete monitor {} on the simulated device", mon);
        }
        let mut state = self.state.lock();
        let v = std::mem::take(&mut state.cycle_counter);
        Ok(v.min(Disc::MAX as u64) as Disc)
    }

    fn get_continuous_monitor(&self, mon: Key) -> Result<Cont> {
        if mon.id != POWER_MON || mon.owner.is_some() {
            bail!("no continuous monitor {} on the simulated device", mon);
        }
        Ok(self.power_watts())
    }

    fn set_process_affinity(&self, _pid: Pid, cores: &[usize]) -> Result<()> {
        if cores.is_empty() {
            bail!("empty core set");
        }
        self.state.lock().cores = cores.len().min(self.cfg.num_cores.max(1));
        Ok(())
    }
}

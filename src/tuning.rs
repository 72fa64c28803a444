// RTMCTL TUNING CONSTANTS
// PURE-RUST MODULE: NO I/O, NO THREADS
// EVERY EMPIRICALLY TUNED NUMBER LIVES HERE AND SEEDS RtmConfig::default()

use std::time::Duration;

// FREQUENCY LEVELS (MHZ)
// 19 STEPS OF 100MHZ. CONTROLLER RETURNS LEVEL * 1000 (KHZ, CPUFREQ UNITS).

pub const FREQ_LEVELS: usize = 19;
pub const FREQ_TABLE_MHZ: [u32; FREQ_LEVELS] = [
    200, 300, 400, 500, 600, 700, 800, 900, 1000, 1100,
    1200, 1300, 1400, 1500, 1600, 1700, 1800, 1900, 2000,
];
pub const INITIAL_FREQ_LEVEL: usize = 3;      // 500MHZ
pub const DEFAULT_FREQ_LEVEL: usize = 13;     // 1500MHZ: SET ON APP REGISTRATION

// Q-LEARNING RATES (PERCENT)

pub const LAMBDA_PCT: i64          = 60;   // WORKLOAD EWMA WEIGHT
pub const LEARNING_RATE_PCT: i64   = 40;   // ALPHA
pub const SIGMA_DEFAULT: u32       = 80;   // UNTRAINED MARKER: ALWAYS EXPLORE
pub const RANDOM_MAX: u32          = 255;  // EXPLORATION DRAW IS 0..RANDOM_MAX
pub const SIGMA_CAP: u32           = RANDOM_MAX;
pub const Q_INIT: i32              = 1;
pub const REWARD_MAX: i32          = 100;
pub const PENALTY_MAX: i32         = -100;
pub const PENALTY_SCALE: f64       = 3.0;  // OVERRUN PENALTY = OVERRUN / (3 * DEADLINE)

// STATIC TABLE GEOMETRY (TRAINING DISABLED)

pub const STATIC_ROWS: usize  = 60;
pub const STATIC_LENGTH: u64  = 2_056_664;
pub const MAPPING_CORES: usize = 4;

// TRAINING PHASE (FRAMES = BINDING PERF MONITOR UPDATES)

pub const WARMUP_FRAMES: u64     = 250;
pub const TRAINING_FRAMES: u64   = 2000;
pub const DECISION_PERIOD: u64   = 10;
pub const ROWS_PER_RANGE: u64    = 8;
pub const ROW_HEADROOM: u64      = 3;

// REGRESSION

pub const WINDOW_CAPACITY: usize = 256;
pub const EVICT_BATCH: usize     = 64;
pub const TRAIN_BATCH: usize     = 20;
pub const GD_ALPHA: f64          = 100.0;
pub const GD_BETA: f64           = 0.5;
pub const GD_DX_DIVISOR: f64     = 1000.0;
pub const GD_MAX_ITERATIONS: u32 = 10_000;

// SESSION WORKERS

pub const POWER_POLL_MS: u64   = 25;
pub const POWER_SAMPLE_MS: u64 = 200;

// AFFINITY

pub const NUM_CORES: usize = 8;
pub const AFFINITY_KNOB_ID: u32 = u32::MAX;   // RESERVED ID FOR THE SYNTHETIC AFFINITY KNOB
pub const GOVERNOR_USERSPACE: i32 = 0;

// --- CONFIG ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    QLearning,
    Regression,
}

#[derive(Clone, Debug)]
pub struct QLearnConfig {
    pub lambda_pct: i64,
    pub learning_rate_pct: i64,
    pub sigma_default: u32,
    pub sigma_cap: u32,
    pub rows: usize,
    pub length: u64,
    // SOME(N) ENABLES THE CORE-MAPPING VARIANT OVER N CORES
    pub mapping_cores: Option<usize>,
    pub initial_level: usize,
}

impl Default for QLearnConfig {
    fn default() -> Self {
        Self {
            lambda_pct: LAMBDA_PCT,
            learning_rate_pct: LEARNING_RATE_PCT,
            sigma_default: SIGMA_DEFAULT,
            sigma_cap: SIGMA_CAP,
            rows: STATIC_ROWS,
            length: STATIC_LENGTH,
            mapping_cores: None,
            initial_level: INITIAL_FREQ_LEVEL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrainingConfig {
    pub warmup_frames: u64,
    // ZERO DISABLES TRAINING: THE STATIC GEOMETRY IS USED
    pub training_frames: u64,
    pub decision_period: u64,
    pub rows_per_range: u64,
    pub row_headroom: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            warmup_frames: WARMUP_FRAMES,
            training_frames: TRAINING_FRAMES,
            decision_period: DECISION_PERIOD,
            rows_per_range: ROWS_PER_RANGE,
            row_headroom: ROW_HEADROOM,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegressionConfig {
    pub window_capacity: usize,
    pub evict_batch: usize,
    pub train_batch: usize,
    pub alpha: f64,
    pub beta: f64,
    pub dx_divisor: f64,
    pub max_iterations: u32,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            window_capacity: WINDOW_CAPACITY,
            evict_batch: EVICT_BATCH,
            train_batch: TRAIN_BATCH,
            alpha: GD_ALPHA,
            beta: GD_BETA,
            dx_divisor: GD_DX_DIVISOR,
            max_iterations: GD_MAX_ITERATIONS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RtmConfig {
    pub strategy: Strategy,
    pub qlearn: QLearnConfig,
    pub training: TrainingConfig,
    pub regression: RegressionConfig,
    pub num_cores: usize,
    pub power_poll: Duration,
    pub power_sample: Duration,
    // RECORD EVERY NTH VALUE UPDATE OF A MONITOR
    pub sample_every: u32,
    // NONE SEEDS THE ENGINES FROM OS ENTROPY
    pub seed: Option<u64>,
}

impl Default for RtmConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Regression,
            qlearn: QLearnConfig::default(),
            training: TrainingConfig::default(),
            regression: RegressionConfig::default(),
            num_cores: NUM_CORES,
            power_poll: Duration::from_millis(POWER_POLL_MS),
            power_sample: Duration::from_millis(POWER_SAMPLE_MS),
            sample_every: 1,
            seed: None,
        }
    }
}

impl RtmConfig {
    pub fn qlearning() -> Self {
        Self { strategy: Strategy::QLearning, ..Self::default() }
    }

    // POLL TICKS PER POWER SAMPLE, AT LEAST ONE
    pub fn power_ticks_per_sample(&self) -> u32 {
        let poll = self.power_poll.as_micros().max(1);
        (self.power_sample.as_micros() / poll).max(1) as u32
    }
}

// --- PURE HELPERS ---

pub fn level_khz(level: usize) -> u32 {
    FREQ_TABLE_MHZ[level.min(FREQ_LEVELS - 1)] * 1000
}

// SMALLEST LEVEL WHOSE UPPER BOUND IS >= FREQ. 0 AND ABOVE-TABLE ARE UNMAPPED.
pub fn freq_bucket(freq_mhz: u32) -> Option<usize> {
    if freq_mhz == 0 {
        return None;
    }
    FREQ_TABLE_MHZ.iter().position(|&edge| freq_mhz <= edge)
}

// REPRESENTATIVE SCALAR OF A PERFORMANCE BOUND:
// MAX WHEN MIN IS ZERO, MIN WHEN MAX IS ZERO, ELSE THE MIDPOINT
pub fn representative(min: f64, max: f64) -> f64 {
    if min == 0.0 {
        max
    } else if max == 0.0 {
        min
    } else {
        (min + max) / 2.0
    }
}

// CORES USED BY AN AFFINITY KNOB VALUE: THE HIGHEST `count` CORES
pub fn cores_to_affinity(count: i32, num_cores: usize) -> Vec<usize> {
    let count = (count.max(0) as usize).min(num_cores);
    (num_cores - count..num_cores).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries_belong_to_lower_level() {
        assert_eq!(freq_bucket(200), Some(0));
        assert_eq!(freq_bucket(201), Some(1));
        assert_eq!(freq_bucket(1), Some(0));
        assert_eq!(freq_bucket(2000), Some(18));
        assert_eq!(freq_bucket(0), None);
        assert_eq!(freq_bucket(2001), None);
    }

    #[test]
    fn representative_cases() {
        assert_eq!(representative(0.0, 30.0), 30.0);
        assert_eq!(representative(25.0, 0.0), 25.0);
        assert_eq!(representative(20.0, 30.0), 25.0);
    }

    #[test]
    fn affinity_takes_highest_cores() {
        assert_eq!(cores_to_affinity(3, 8), vec![5, 6, 7]);
        assert_eq!(cores_to_affinity(12, 4), vec![0, 1, 2, 3]);
        assert!(cores_to_affinity(0, 4).is_empty());
    }

    #[test]
    fn ticks_per_sample_default() {
        assert_eq!(RtmConfig::default().power_ticks_per_sample(), 8);
    }
}

// RTMCTL Q-LEARNING FREQUENCY CONTROLLER
// TABULAR REWARD ESTIMATES OVER (WORKLOAD BUCKET x FREQUENCY LEVEL).
// EACH STEP REWARDS THE PREVIOUS CHOICE, THEN PICKS THE NEXT LEVEL:
// RANDOM WHILE EXPLORING, TABLE ARGMAX ONCE SIGMA HAS GROWN.
//
// MAPPING VARIANT ALSO PICKS THE LEAST-UTILISED CORE.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tuning::{
    freq_bucket, level_khz, QLearnConfig, TrainingConfig, FREQ_LEVELS, FREQ_TABLE_MHZ,
    PENALTY_MAX, PENALTY_SCALE, Q_INIT, RANDOM_MAX, REWARD_MAX,
};

// --- TABLE ---

// BOUNDS-CHECKED `rows x cols` GRID OF INTEGER REWARD ESTIMATES
#[derive(Clone, Debug, PartialEq)]
pub struct QTable {
    rows: usize,
    cols: usize,
    cells: Vec<i32>,
}

impl QTable {
    pub fn new(rows: usize, cols: usize, init: i32) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self { rows, cols, cells: vec![init; rows * cols] }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.cells[row * self.cols + col])
    }

    pub fn row(&self, row: usize) -> Option<&[i32]> {
        if row >= self.rows {
            return None;
        }
        Some(&self.cells[row * self.cols..(row + 1) * self.cols])
    }

    // `q <- ((100 - a) * q + a * reward) / 100`, INTEGER ARITHMETIC
    pub fn reinforce(&mut self, row: usize, col: usize, reward: i32, rate_pct: i64) -> Option<i32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let cell = &mut self.cells[row * self.cols + col];
        let q = ((100 - rate_pct) * (*cell as i64) + rate_pct * reward as i64) / 100;
        *cell = q as i32;
        Some(*cell)
    }

    // FIRST INDEX WINS ON TIES; FLOOR MATCHES THE PENALTY FLOOR
    pub fn argmax(&self, row: usize) -> Option<usize> {
        let cells = self.row(row)?;
        let mut best = PENALTY_MAX;
        let mut idx = 0;
        for (i, &v) in cells.iter().enumerate() {
            if v > best {
                best = v;
                idx = i;
            }
        }
        Some(idx)
    }
}

// --- REWARD ---

// POSITIVE WHILE THE STEP FINISHED INSIDE THE DEADLINE (MORE FOR LESS
// SLACK), NEGATIVE AND SCALED BY THE OVERRUN OTHERWISE
pub fn reward(elapsed: f64, deadline: f64) -> i32 {
    if !(deadline > 0.0) || !elapsed.is_finite() {
        return 0;
    }
    if elapsed <= deadline {
        ((100.0 * elapsed / deadline) as i32).min(REWARD_MAX)
    } else {
        (-(100.0 * (elapsed - deadline)) / (PENALTY_SCALE * deadline)).max(PENALTY_MAX as f64) as i32
    }
}

// --- CONTROLLER ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub level: usize,
    pub freq_khz: u32,
    pub core: Option<usize>,
    pub explored: bool,
}

pub struct QLearningController {
    cfg: QLearnConfig,
    deadline: f64,
    table: QTable,
    avg_workload: i64,
    sigma: u32,
    level: usize,
    util: Vec<f64>,
    rng: StdRng,
}

impl QLearningController {
    pub fn new(cfg: QLearnConfig, deadline: f64) -> Self {
        Self::with_rng(cfg, deadline, StdRng::from_entropy())
    }

    pub fn with_rng(cfg: QLearnConfig, deadline: f64, rng: StdRng) -> Self {
        let table = QTable::new(cfg.rows, FREQ_LEVELS, Q_INIT);
        let util = vec![0.0; cfg.mapping_cores.unwrap_or(0)];
        Self {
            deadline,
            table,
            avg_workload: 0,
            sigma: cfg.sigma_default,
            level: cfg.initial_level.min(FREQ_LEVELS - 1),
            util,
            rng,
            cfg,
        }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn sigma(&self) -> u32 {
        self.sigma
    }

    pub fn average_workload(&self) -> i64 {
        self.avg_workload
    }

    pub fn deadline(&self) -> f64 {
        self.deadline
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn utilisation(&self) -> &[f64] {
        &self.util
    }

    fn untrained(&self) -> bool {
        self.sigma == self.cfg.sigma_default
    }

    fn row_for(&self, workload: i64) -> usize {
        let length = self.cfg.length.max(1) as i64;
        let last = self.table.rows() as i64 - 1;
        (workload / length - 1).clamp(0, last) as usize
    }

    // ONE CONTROL STEP. `workload` IS THE CYCLE COUNT OF THE LAST
    // ITERATION, `elapsed` ITS EXECUTION TIME IN DEADLINE UNITS
    pub fn run(&mut self, workload: u64, elapsed: f64) -> Decision {
        let workload = workload.min(i64::MAX as u64) as i64;

        // NOTHING TO REWARD ON THE VERY FIRST STEP
        if !self.untrained() {
            let lambda = self.cfg.lambda_pct;
            self.avg_workload = (lambda * workload + (100 - lambda) * self.avg_workload) / 100;

            let row = self.row_for(workload);
            if let Some(col) = freq_bucket(FREQ_TABLE_MHZ[self.level]) {
                let r = reward(elapsed, self.deadline);
                self.table.reinforce(row, col, r, self.cfg.learning_rate_pct);
            }
        }

        let row = self.row_for(self.avg_workload);
        let draw = self.rng.gen_range(0..RANDOM_MAX);
        let explored = draw > self.sigma || self.untrained();
        self.level = if explored {
            self.rng.gen_range(0..FREQ_LEVELS)
        } else {
            self.table.argmax(row).unwrap_or(self.level)
        };
        self.sigma = (self.sigma + 1).min(self.cfg.sigma_cap.max(self.cfg.sigma_default));

        let core = self.assign_core(elapsed);
        Decision { level: self.level, freq_khz: level_khz(self.level), core, explored }
    }

    // LEAST-UTILISED CORE, FIRST INDEX ON TIES
    fn assign_core(&mut self, elapsed: f64) -> Option<usize> {
        if self.util.is_empty() {
            return None;
        }
        let mut core = 0;
        for (i, &u) in self.util.iter().enumerate() {
            if u < self.util[core] {
                core = i;
            }
        }
        if self.deadline > 0.0 && elapsed.is_finite() {
            self.util[core] += elapsed / self.deadline;
        }
        Some(core)
    }
}

// --- TRAINING PHASE ---

// MEASURES THE OBSERVED CYCLE-COUNT RANGE TO SIZE THE TABLE
// SAMPLES BEFORE THE WARM-UP ARE IGNORED
#[derive(Clone, Debug)]
pub struct WorkloadCalibration {
    cfg: TrainingConfig,
    max_cycles: u64,
    min_cycles: u64,
}

impl WorkloadCalibration {
    pub fn new(cfg: TrainingConfig) -> Self {
        Self { cfg, max_cycles: 0, min_cycles: u64::MAX }
    }

    pub fn reset(&mut self) {
        self.max_cycles = 0;
        self.min_cycles = u64::MAX;
    }

    pub fn observe(&mut self, frame: u64, cycles: u64) {
        if frame <= self.cfg.warmup_frames {
            return;
        }
        self.max_cycles = self.max_cycles.max(cycles);
        self.min_cycles = self.min_cycles.min(cycles);
    }

    pub fn range(&self) -> Option<(u64, u64)> {
        if self.min_cycles > self.max_cycles {
            return None;
        }
        Some((self.min_cycles, self.max_cycles))
    }

    // `(rows, length)` FROM THE MEASURED RANGE, OR NONE IF THE RANGE IS
    // EMPTY OR TOO NARROW TO SPLIT
    pub fn geometry(&self) -> Option<(usize, u64)> {
        let (min, max) = self.range()?;
        let length = (max - min) / self.cfg.rows_per_range.max(1);
        if length == 0 {
            return None;
        }
        let rows = (max / length) * self.cfg.row_headroom;
        Some((rows.max(1) as usize, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rejects_out_of_range() {
        let mut t = QTable::new(3, 19, 1);
        assert_eq!(t.get(3, 0), None);
        assert_eq!(t.get(0, 19), None);
        assert_eq!(t.reinforce(5, 0, 100, 40), None);
        assert!(t.row(2).is_some());
        assert!(t.row(3).is_none());
    }

    #[test]
    fn reinforce_integer_rule() {
        let mut t = QTable::new(1, 19, 1);
        // (60 * 1 + 40 * 80) / 100 = 32
        assert_eq!(t.reinforce(0, 4, 80, 40), Some(32));
        // (60 * 32 + 40 * -50) / 100 = -0.8 -> 0
        assert_eq!(t.reinforce(0, 4, -50, 40), Some(0));
    }

    #[test]
    fn argmax_first_index_wins() {
        let mut t = QTable::new(1, 19, 1);
        t.reinforce(0, 7, 100, 100);
        t.reinforce(0, 3, 100, 100);
        assert_eq!(t.argmax(0), Some(3));
    }

    #[test]
    fn reward_shape() {
        assert_eq!(reward(50.0, 100.0), 50);
        assert_eq!(reward(100.0, 100.0), 100);
        assert_eq!(reward(160.0, 100.0), -20);
        assert_eq!(reward(10_000.0, 100.0), -100);
        assert_eq!(reward(1.0, 0.0), 0);
    }

    #[test]
    fn row_saturates() {
        let cfg = QLearnConfig { rows: 4, length: 100, ..QLearnConfig::default() };
        let c = QLearningController::with_rng(cfg, 10.0, StdRng::seed_from_u64(1));
        assert_eq!(c.row_for(0), 0);
        assert_eq!(c.row_for(250), 1);
        assert_eq!(c.row_for(10_000), 3);
    }

    #[test]
    fn calibration_geometry() {
        let mut cal = WorkloadCalibration::new(TrainingConfig::default());
        cal.observe(10, 1);           // WARM-UP, IGNORED
        cal.observe(300, 1_000_000);
        cal.observe(310, 1_800_000);
        assert_eq!(cal.range(), Some((1_000_000, 1_800_000)));
        // LENGTH = 800000 / 8 = 100000, ROWS = (1800000 / 100000) * 3 = 54
        assert_eq!(cal.geometry(), Some((54, 100_000)));
    }

    #[test]
    fn calibration_empty_range() {
        let cal = WorkloadCalibration::new(TrainingConfig::default());
        assert_eq!(cal.geometry(), None);
    }
}

// RTMCTL ONLINE LINEAR MODEL
// ONE MODEL PER MONITOR. SLIDING SAMPLE WINDOW, REFIT BY ORDINARY LEAST
// SQUARES EVERY `train_batch` SAMPLES.
//
// THE FIT CENTRES AND SCALES EACH PREDICTOR COLUMN BEFORE SOLVING THE
// NORMAL EQUATIONS: FREQUENCY KNOBS (1E6 RANGE) AND CORE COUNTS (1..8)
// SHARE ONE DESIGN MATRIX.

use std::collections::VecDeque;

use crate::error::{Result, RtmError};
use crate::tuning::RegressionConfig;
use crate::types::Key;

const PIVOT_EPS: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct LinearModel {
    id: Key,
    num_predictors: usize,
    window: VecDeque<(f64, Vec<f64>)>,
    // INTERCEPT FIRST, THEN ONE COEFFICIENT PER PREDICTOR
    coefficients: Vec<f64>,
    trained: bool,
    added: usize,
    capacity: usize,
    evict_batch: usize,
    train_batch: usize,
}

// WHAT HAPPENED TO A MODEL WHEN A SAMPLE WAS APPENDED
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fit {
    Collected,
    Trained,
}

impl LinearModel {
    pub fn new(id: Key, num_predictors: usize, cfg: &RegressionConfig) -> Self {
        Self {
            id,
            num_predictors,
            window: VecDeque::with_capacity(cfg.window_capacity),
            coefficients: Vec::new(),
            trained: false,
            added: 0,
            capacity: cfg.window_capacity.max(1),
            evict_batch: cfg.evict_batch.clamp(1, cfg.window_capacity.max(1)),
            train_batch: cfg.train_batch.max(1),
        }
    }

    pub fn id(&self) -> Key {
        self.id
    }

    pub fn num_predictors(&self) -> usize {
        self.num_predictors
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    // PREDICTOR LAYOUT CHANGED: EVERY OLD SAMPLE IS MEANINGLESS
    pub fn reset(&mut self, num_predictors: usize) {
        self.num_predictors = num_predictors;
        self.window.clear();
        self.coefficients.clear();
        self.trained = false;
        self.added = 0;
    }

    // APPEND ONE OBSERVATION. REFITS ON EVERY BATCH BOUNDARY; A DEGENERATE
    // REFIT LEAVES THE PREVIOUS COEFFICIENTS IN PLACE
    pub fn add_sample(&mut self, response: f64, predictors: &[f64]) -> Result<Fit> {
        if predictors.len() != self.num_predictors {
            return Err(RtmError::PredictorMismatch {
                expected: self.num_predictors,
                got: predictors.len(),
            });
        }
        if !response.is_finite() || predictors.iter().any(|p| !p.is_finite()) {
            return Ok(Fit::Collected);
        }
        if self.window.len() >= self.capacity {
            let evict = self.evict_batch.min(self.window.len());
            self.window.drain(..evict);
        }
        self.window.push_back((response, predictors.to_vec()));
        self.added += 1;

        if self.added % self.train_batch != 0 {
            return Ok(Fit::Collected);
        }
        self.train()?;
        Ok(Fit::Trained)
    }

    pub fn train(&mut self) -> Result<()> {
        let coefficients = ols(&self.window, self.num_predictors).ok_or(RtmError::DegenerateFit(self.id))?;
        self.coefficients = coefficients;
        self.trained = true;
        Ok(())
    }

    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        if !self.trained || x.len() != self.num_predictors || self.coefficients.len() != x.len() + 1 {
            return Err(RtmError::NotTrained(self.id));
        }
        Ok(self.coefficients[0]
            + self.coefficients[1..].iter().zip(x).map(|(c, v)| c * v).sum::<f64>())
    }
}

// LEAST SQUARES ON CENTRED, SCALED COLUMNS. CONSTANT COLUMNS CARRY NO
// INFORMATION AND GET A ZERO COEFFICIENT; IF EVERY COLUMN IS CONSTANT,
// OR THE REMAINING SYSTEM IS SINGULAR, THERE IS NO FIT.
fn ols(window: &VecDeque<(f64, Vec<f64>)>, p: usize) -> Option<Vec<f64>> {
    let n = window.len();
    if n < p + 1 {
        return None;
    }
    let nf = n as f64;
    let y_mean = window.iter().map(|(y, _)| y).sum::<f64>() / nf;

    let mut means = vec![0.0; p];
    for (_, x) in window {
        for (m, v) in means.iter_mut().zip(x) {
            *m += v / nf;
        }
    }
    let mut scales = vec![0.0; p];
    for (_, x) in window {
        for j in 0..p {
            let d = x[j] - means[j];
            scales[j] += d * d;
        }
    }
    for s in scales.iter_mut() {
        *s = (*s / nf).sqrt();
    }

    let active: Vec<usize> = (0..p).filter(|&j| scales[j] > f64::EPSILON * means[j].abs().max(1.0)).collect();
    if p > 0 && active.is_empty() {
        return None;
    }
    let q = active.len();

    // NORMAL EQUATIONS Z'Z g = Z'(y - ybar) OVER ACTIVE COLUMNS
    let mut a = vec![vec![0.0; q + 1]; q];
    for (y, x) in window {
        let z: Vec<f64> = active.iter().map(|&j| (x[j] - means[j]) / scales[j]).collect();
        let dy = y - y_mean;
        for r in 0..q {
            for c in 0..q {
                a[r][c] += z[r] * z[c];
            }
            a[r][q] += z[r] * dy;
        }
    }
    let g = solve(a, nf)?;

    let mut coefficients = vec![0.0; p + 1];
    let mut intercept = y_mean;
    for (k, &j) in active.iter().enumerate() {
        let beta = g[k] / scales[j];
        coefficients[j + 1] = beta;
        intercept -= beta * means[j];
    }
    coefficients[0] = intercept;
    if coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }
    Some(coefficients)
}

// GAUSSIAN ELIMINATION WITH PARTIAL PIVOTING ON AN AUGMENTED MATRIX.
// SCALED COLUMNS PUT THE DIAGONAL NEAR n, SO THE PIVOT FLOOR IS RELATIVE TO n.
fn solve(mut a: Vec<Vec<f64>>, n: f64) -> Option<Vec<f64>> {
    let q = a.len();
    for col in 0..q {
        let pivot = (col..q).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPS * n {
            return None;
        }
        a.swap(col, pivot);
        for row in col + 1..q {
            let f = a[row][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for c in col..=q {
                let v = a[col][c];
                a[row][c] -= f * v;
            }
        }
    }
    let mut x = vec![0.0; q];
    for row in (0..q).rev() {
        let tail: f64 = (row + 1..q).map(|c| a[row][c] * x[c]).sum();
        x[row] = (a[row][q] - tail) / a[row][row];
    }
    Some(x)
}

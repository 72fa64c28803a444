// RTMCTL REGRESSION OPTIMIZER
// ONE LinearModel PER MONITOR, ALL SHARING ONE PREDICTOR LAYOUT.
// optimise() SEARCHES THE KNOB SPACE BY DAMPED GRADIENT DESCENT ON THE
// TARGET MODEL WHILE THE BOUND MODEL STAYS ON THE FEASIBLE SIDE.

use std::collections::HashMap;

use crate::error::{Result, RtmError};
use crate::model::{Fit, LinearModel};
use crate::tuning::RegressionConfig;
use crate::types::Key;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KnobRange {
    pub min: f64,
    pub max: f64,
}

impl KnobRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

pub struct RegressionOptimizer {
    num_knobs: usize,
    models: HashMap<Key, LinearModel>,
    cfg: RegressionConfig,
}

impl RegressionOptimizer {
    pub fn new(cfg: RegressionConfig) -> Self {
        Self { num_knobs: 0, models: HashMap::new(), cfg }
    }

    pub fn num_knobs(&self) -> usize {
        self.num_knobs
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.cfg
    }

    pub fn add_model(&mut self, id: Key) {
        let model = LinearModel::new(id, self.num_knobs, &self.cfg);
        self.models.insert(id, model);
    }

    pub fn remove_model(&mut self, id: Key) -> bool {
        self.models.remove(&id).is_some()
    }

    pub fn has_model(&self, id: Key) -> bool {
        self.models.contains_key(&id)
    }

    pub fn model(&self, id: Key) -> Option<&LinearModel> {
        self.models.get(&id)
    }

    pub fn is_trained(&self, id: Key) -> bool {
        self.models.get(&id).map_or(false, |m| m.is_trained())
    }

    // A NEW PREDICTOR INVALIDATES EVERY SAMPLE OF EVERY MODEL
    pub fn add_knob(&mut self) {
        self.num_knobs += 1;
        self.reset_models();
    }

    pub fn remove_knob(&mut self) {
        self.num_knobs = self.num_knobs.saturating_sub(1);
        self.reset_models();
    }

    fn reset_models(&mut self) {
        let n = self.num_knobs;
        for m in self.models.values_mut() {
            m.reset(n);
        }
    }

    pub fn add_sample(&mut self, id: Key, value: f64, knobs: &[f64]) -> Result<Fit> {
        if knobs.len() != self.num_knobs {
            return Err(RtmError::PredictorMismatch { expected: self.num_knobs, got: knobs.len() });
        }
        let model = self.models.get_mut(&id).ok_or(RtmError::UnknownModel(id))?;
        model.add_sample(value, knobs)
    }

    pub fn predict(&self, id: Key, knobs: &[f64]) -> Result<f64> {
        self.models.get(&id).ok_or(RtmError::UnknownModel(id))?.predict(knobs)
    }

    pub fn optimise(&self, target: Key, bound: Key, bound_value: f64, ranges: &[KnobRange]) -> Result<Vec<f64>> {
        let t = self.models.get(&target).ok_or(RtmError::UnknownModel(target))?;
        let b = self.models.get(&bound).ok_or(RtmError::UnknownModel(bound))?;
        descend(t, b, bound_value, ranges, &self.cfg)
    }
}

// CONSTRAINED GRADIENT DESCENT. STARTS EVERY KNOB AT ITS MAXIMUM AND WALKS
// THE TARGET MODEL DOWNHILL; A STEP IS ACCEPTED ONLY WHILE THE BOUND MODEL
// STILL PREDICTS AT LEAST `bound_value`
// FAILS WITH `Infeasible` WHEN THE BOUND IS MISSED AT THE STARTING POINT,
// AND WITH `NotTrained` WHEN EITHER MODEL CANNOT EVALUATE `ranges.len()`
// PREDICTORS
pub fn descend(
    target: &LinearModel,
    bound: &LinearModel,
    bound_value: f64,
    ranges: &[KnobRange],
    cfg: &RegressionConfig,
) -> Result<Vec<f64>> {
    let n = ranges.len();
    let mut x: Vec<f64> = ranges.iter().map(|r| r.max).collect();

    // VALIDATES TRAINING STATE AND WIDTH FOR BOTH MODELS ONCE
    target.predict(&x)?;
    let start = bound.predict(&x)?;
    let f = |v: &[f64]| target.predict(v).unwrap_or(f64::NAN);
    let g = |v: &[f64]| bound.predict(v).unwrap_or(f64::NEG_INFINITY);

    let beta = cfg.beta;
    let mut alpha = vec![cfg.alpha; n];
    let dx: Vec<f64> = ranges.iter().map(|r| (r.max - r.min) / cfg.dx_divisor).collect();
    // ZERO-WIDTH KNOBS HAVE NOTHING TO SEARCH
    let mut done: Vec<bool> = dx.iter().map(|d| !(*d > 0.0)).collect();
    let mut prev_grad = vec![0.0; n];
    let mut iterations = 0;

    while !done.iter().all(|d| *d) {
        let at = g(&x);
        if at < bound_value {
            return Err(RtmError::Infeasible { bound: bound_value, best: start.max(at) });
        }
        iterations += 1;
        if iterations > cfg.max_iterations {
            break;
        }

        let fx = f(&x);
        let mut grad = vec![0.0; n];
        for k in 0..n {
            if done[k] {
                continue;
            }
            let mut back = x.clone();
            back[k] -= dx[k];
            grad[k] = (fx - f(&back)) / dx[k];
            if !grad[k].is_finite() {
                done[k] = true;
                grad[k] = 0.0;
            }
        }

        loop {
            let mut xn = x.clone();
            for k in 0..n {
                if done[k] {
                    continue;
                }
                // SHRINK UNTIL THE PROPOSAL LANDS INSIDE THE RANGE
                let mut cand = x[k] - grad[k] * alpha[k];
                while !ranges[k].contains(cand) {
                    alpha[k] *= beta;
                    cand = x[k] - grad[k] * alpha[k];
                }
                xn[k] = cand;
                if xn[k] == x[k] {
                    done[k] = true;
                }
            }

            if g(&xn) >= bound_value {
                x = xn;
                break;
            }
            if done.iter().all(|d| *d) {
                break;
            }
            for k in 0..n {
                if !done[k] {
                    alpha[k] *= beta;
                }
            }
        }

        // OSCILLATION DAMPING
        for k in 0..n {
            if prev_grad[k] * grad[k] < 0.0 {
                alpha[k] *= beta;
            }
        }
        prev_grad = grad;
    }

    if g(&x) < bound_value {
        return Err(RtmError::Infeasible { bound: bound_value, best: start });
    }
    Ok(x)
}

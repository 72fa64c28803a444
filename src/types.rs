// RTMCTL KNOB AND MONITOR TYPES
// SHARED BY THE REGISTRY, BOTH ENGINES, AND THE CONTROL LOOP

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Disc = i32;
pub type Cont = f64;
pub type Pid = i32;

// --- IDENTITY ---

// COMPOSITE IDENTITY OF A KNOB OR MONITOR. DEVICE ITEMS HAVE NO OWNER
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub owner: Option<Pid>,
    pub id: u32,
}

impl Key {
    pub fn app(owner: Pid, id: u32) -> Self {
        Self { owner: Some(owner), id }
    }

    pub fn device(id: u32) -> Self {
        Self { owner: None, id }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(pid) => write!(f, "{}:{}", pid, self.id),
            None => write!(f, "dev:{}", self.id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Disc,
    Cont,
}

// WHICH COLLECTION AN INBOUND EVENT ADDRESSES
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Knob(Domain),
    Monitor(Domain),
}

// FIELD TOUCHED BY A BOUND-CHANGE EVENT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Min,
    Max,
    Weight,
    Value,
}

// --- TYPE TAGS ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppKnobType {
    Par,
    Prec,
    DevSel,
    Itr,
    Aff,
    Gen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppMonType {
    Perf,
    Acc,
    Err,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevKnobType {
    Volt,
    Freq,
    En,
    PmcCnt,
    Governor,
    FreqEn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevMonType {
    Pow,
    Temp,
    Cycles,
    Pmc,
}

// --- SCALARS ---

// VALUE DOMAIN OF A KNOB OR MONITOR
pub trait Scalar: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    // DISCRETE KNOBS TAKE THE CEILING OF A CONTINUOUS PROPOSAL
    fn from_f64_ceil(v: f64) -> Self;
    fn sentinel_max() -> Self;

    fn clamp_to(self, min: Self, max: Self) -> Self {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }
}

impl Scalar for Disc {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v.round() as Disc
    }

    fn from_f64_ceil(v: f64) -> Self {
        v.ceil() as Disc
    }

    fn sentinel_max() -> Self {
        Disc::MAX
    }
}

impl Scalar for Cont {
    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }

    fn from_f64_ceil(v: f64) -> Self {
        v
    }

    fn sentinel_max() -> Self {
        Cont::MAX
    }
}

// --- RECORDS ---

// ADJUSTABLE PARAMETER. `min <= val <= max` HOLDS AFTER EVERY APPLIED UPDATE
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Knob<K, V> {
    pub owner: Option<Pid>,
    pub id: u32,
    pub kind: K,
    pub min: V,
    pub max: V,
    pub val: V,
}

// OBSERVABLE SIGNAL. `weight` RANKS MONITORS OF THE SAME TYPE
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Monitor<K, V> {
    pub owner: Option<Pid>,
    pub id: u32,
    pub kind: K,
    pub min: V,
    pub max: V,
    pub val: V,
    pub weight: f64,
}

pub type AppKnobDisc = Knob<AppKnobType, Disc>;
pub type AppKnobCont = Knob<AppKnobType, Cont>;
pub type AppMonDisc = Monitor<AppMonType, Disc>;
pub type AppMonCont = Monitor<AppMonType, Cont>;
pub type DevKnobDisc = Knob<DevKnobType, Disc>;
pub type DevKnobCont = Knob<DevKnobType, Cont>;
pub type DevMonDisc = Monitor<DevMonType, Disc>;
pub type DevMonCont = Monitor<DevMonType, Cont>;

impl<K, V: Scalar> Knob<K, V> {
    pub fn app(owner: Pid, id: u32, kind: K, min: V, max: V, val: V) -> Self {
        Self { owner: Some(owner), id, kind, min, max, val }
    }

    pub fn device(id: u32, kind: K, min: V, max: V, val: V) -> Self {
        Self { owner: None, id, kind, min, max, val }
    }
}

impl<K, V: Scalar> Monitor<K, V> {
    pub fn app(owner: Pid, id: u32, kind: K, min: V, max: V, weight: f64) -> Self {
        Self { owner: Some(owner), id, kind, min, max, val: min, weight }
    }

    pub fn device(id: u32, kind: K, min: V, max: V) -> Self {
        Self { owner: None, id, kind, min, max, val: min, weight: 1.0 }
    }
}

// COMMON SURFACE THE REGISTRY USES TO KEY, VALIDATE, AND MUTATE RECORDS
pub trait Entry: Clone + Send + 'static {
    type Value: Scalar;

    fn key(&self) -> Key;
    fn bounds(&self) -> (Self::Value, Self::Value);
    fn value(&self) -> Self::Value;

    // APPLY ONE FIELD UPDATE. RETURNS FALSE WHEN THE UPDATE IS REJECTED
    fn apply(&mut self, field: Field, v: f64) -> bool;
}

// BOUND CHANGES THAT WOULD INVERT THE RANGE ARE REJECTED.
// ACCEPTED BOUND CHANGES PULL THE VALUE BACK INSIDE THE RANGE.
fn apply_bounds<V: Scalar>(min: &mut V, max: &mut V, val: &mut V, field: Field, v: f64) -> bool {
    if !v.is_finite() {
        return false;
    }
    let v = V::from_f64(v);
    match field {
        Field::Min => {
            if v > *max {
                return false;
            }
            *min = v;
        }
        Field::Max => {
            if v < *min {
                return false;
            }
            *max = v;
        }
        Field::Value => {
            *val = v;
        }
        Field::Weight => return false,
    }
    *val = val.clamp_to(*min, *max);
    true
}

impl<K: Clone + Send + 'static, V: Scalar> Entry for Knob<K, V> {
    type Value = V;

    fn key(&self) -> Key {
        Key { owner: self.owner, id: self.id }
    }

    fn bounds(&self) -> (V, V) {
        (self.min, self.max)
    }

    fn value(&self) -> V {
        self.val
    }

    fn apply(&mut self, field: Field, v: f64) -> bool {
        apply_bounds(&mut self.min, &mut self.max, &mut self.val, field, v)
    }
}

impl<K: Clone + Send + 'static, V: Scalar> Entry for Monitor<K, V> {
    type Value = V;

    fn key(&self) -> Key {
        Key { owner: self.owner, id: self.id }
    }

    fn bounds(&self) -> (V, V) {
        (self.min, self.max)
    }

    fn value(&self) -> V {
        self.val
    }

    fn apply(&mut self, field: Field, v: f64) -> bool {
        if field == Field::Weight {
            if !v.is_finite() {
                return false;
            }
            self.weight = v;
            return true;
        }
        apply_bounds(&mut self.min, &mut self.max, &mut self.val, field, v)
    }
}

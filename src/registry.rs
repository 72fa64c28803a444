// RTMCTL KNOB/MONITOR REGISTRY
// NINE COLLECTIONS, EACH BEHIND ITS OWN LOCK. DIFFERENT COLLECTIONS
// MUTATE CONCURRENTLY; ONE COLLECTION NEVER EXPOSES A HALF-APPLIED UPDATE.
//
// LOOKUPS THAT MISS ARE NOT ERRORS: A PEER MAY DEREGISTER WHILE ITS
// UPDATES ARE STILL IN FLIGHT. MISSES ARE DROPPED SILENTLY.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::tuning::representative;
use crate::types::*;

// --- COLLECTION ---

#[derive(Clone, Debug, PartialEq)]
pub enum Update<T> {
    Miss,
    Rejected,
    Applied(T),
}

pub struct Collection<T: Entry> {
    items: Mutex<Vec<T>>,
}

impl<T: Entry> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }
}

impl<T: Entry> Collection<T> {
    // RE-REGISTERING A LIVE KEY REPLACES IT IN PLACE
    pub(crate) fn insert(&self, item: T) {
        let mut items = self.items.lock();
        let key = item.key();
        match items.iter_mut().find(|i| i.key() == key) {
            Some(slot) => *slot = item,
            None => items.push(item),
        }
    }

    pub(crate) fn remove(&self, key: Key) -> Option<T> {
        let mut items = self.items.lock();
        let idx = items.iter().position(|i| i.key() == key)?;
        Some(items.remove(idx))
    }

    pub(crate) fn remove_owner(&self, pid: Pid) -> Vec<T> {
        let mut items = self.items.lock();
        let mut removed = Vec::new();
        items.retain(|i| {
            if i.key().owner == Some(pid) {
                removed.push(i.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub(crate) fn update(&self, key: Key, field: Field, v: f64) -> Update<T> {
        let mut items = self.items.lock();
        match items.iter_mut().find(|i| i.key() == key) {
            None => Update::Miss,
            Some(item) => {
                if item.apply(field, v) {
                    Update::Applied(item.clone())
                } else {
                    Update::Rejected
                }
            }
        }
    }

    pub fn get(&self, key: Key) -> Option<T> {
        self.items.lock().iter().find(|i| i.key() == key).cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

// --- REGISTRY TYPES ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct App {
    pub pid: Pid,
    pub uid: u64,
}

// HIGHEST-WEIGHT PERFORMANCE MONITOR: THE DEFAULT BOUND FOR BOTH ENGINES
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BindingPerf {
    pub key: Key,
    pub domain: Domain,
    pub weight: f64,
    pub min: f64,
    pub max: f64,
    pub target: f64,
}

impl BindingPerf {
    fn new(key: Key, domain: Domain, weight: f64, min: f64, max: f64) -> Self {
        Self { key, domain, weight, min, max, target: representative(min, max) }
    }
}

// EVERYTHING AN APP OWNED AT THE MOMENT IT DEREGISTERED
#[derive(Clone, Debug, Default)]
pub struct Removed {
    pub knobs_disc: Vec<AppKnobDisc>,
    pub knobs_cont: Vec<AppKnobCont>,
    pub mons_disc: Vec<AppMonDisc>,
    pub mons_cont: Vec<AppMonCont>,
}

#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub apps: Vec<App>,
    pub app_knobs_disc: Vec<AppKnobDisc>,
    pub app_knobs_cont: Vec<AppKnobCont>,
    pub app_mons_disc: Vec<AppMonDisc>,
    pub app_mons_cont: Vec<AppMonCont>,
    pub dev_knobs_disc: Vec<DevKnobDisc>,
    pub dev_knobs_cont: Vec<DevKnobCont>,
    pub dev_mons_disc: Vec<DevMonDisc>,
    pub dev_mons_cont: Vec<DevMonCont>,
    pub perf: Option<BindingPerf>,
}

// --- REGISTRY ---

#[derive(Default)]
pub struct Registry {
    apps: Mutex<Vec<App>>,
    app_knobs_disc: Collection<AppKnobDisc>,
    app_knobs_cont: Collection<AppKnobCont>,
    app_mons_disc: Collection<AppMonDisc>,
    app_mons_cont: Collection<AppMonCont>,
    dev_knobs_disc: Collection<DevKnobDisc>,
    dev_knobs_cont: Collection<DevKnobCont>,
    dev_mons_disc: Collection<DevMonDisc>,
    dev_mons_cont: Collection<DevMonCont>,
    perf: Mutex<Option<BindingPerf>>,
    // REGISTRATION ORDER OF LIVE PERF MONITORS, THE RE-ELECTION TIE-BREAK
    perf_seq: Mutex<HashMap<(Key, Domain), u64>>,
    next_seq: AtomicU64,
}

fn valid_range<V: Scalar>(min: V, max: V) -> bool {
    min <= max
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- READ-ONLY VIEWS ---

    pub fn app_knobs_disc(&self) -> &Collection<AppKnobDisc> {
        &self.app_knobs_disc
    }

    pub fn app_knobs_cont(&self) -> &Collection<AppKnobCont> {
        &self.app_knobs_cont
    }

    pub fn app_mons_disc(&self) -> &Collection<AppMonDisc> {
        &self.app_mons_disc
    }

    pub fn app_mons_cont(&self) -> &Collection<AppMonCont> {
        &self.app_mons_cont
    }

    pub fn dev_knobs_disc(&self) -> &Collection<DevKnobDisc> {
        &self.dev_knobs_disc
    }

    pub fn dev_knobs_cont(&self) -> &Collection<DevKnobCont> {
        &self.dev_knobs_cont
    }

    pub fn dev_mons_disc(&self) -> &Collection<DevMonDisc> {
        &self.dev_mons_disc
    }

    pub fn dev_mons_cont(&self) -> &Collection<DevMonCont> {
        &self.dev_mons_cont
    }

    // --- APPLICATIONS ---

    pub fn register_app(&self, pid: Pid, uid: u64) {
        let mut apps = self.apps.lock();
        if !apps.iter().any(|a| a.pid == pid) {
            apps.push(App { pid, uid });
        }
    }

    // REMOVE AN APP AND EVERYTHING IT OWNS. UNKNOWN PIDS RETURN AN EMPTY SET
    pub fn deregister_app(&self, pid: Pid) -> Removed {
        self.apps.lock().retain(|a| a.pid != pid);
        let removed = Removed {
            knobs_disc: self.app_knobs_disc.remove_owner(pid),
            knobs_cont: self.app_knobs_cont.remove_owner(pid),
            mons_disc: self.app_mons_disc.remove_owner(pid),
            mons_cont: self.app_mons_cont.remove_owner(pid),
        };
        self.perf_seq.lock().retain(|(k, _), _| k.owner != Some(pid));
        let owned = self.perf.lock().map_or(false, |b| b.key.owner == Some(pid));
        if owned {
            self.reelect_perf();
        }
        removed
    }

    pub fn apps(&self) -> Vec<App> {
        self.apps.lock().clone()
    }

    pub fn has_app(&self, pid: Pid) -> bool {
        self.apps.lock().iter().any(|a| a.pid == pid)
    }

    // --- APPLICATION KNOBS ---

    // RETURNS FALSE WHEN THE KNOB'S RANGE IS INVERTED
    pub fn register_app_knob_disc(&self, mut knob: AppKnobDisc) -> bool {
        if knob.max == Disc::sentinel_max() {
            knob.max = knob.val;
        }
        if !valid_range(knob.min, knob.max) {
            return false;
        }
        knob.val = if knob.kind == AppKnobType::DevSel {
            knob.min
        } else {
            knob.val.clamp_to(knob.min, knob.max)
        };
        self.app_knobs_disc.insert(knob);
        true
    }

    pub fn register_app_knob_cont(&self, mut knob: AppKnobCont) -> bool {
        if !valid_range(knob.min, knob.max) {
            return false;
        }
        knob.val = if knob.kind == AppKnobType::DevSel {
            knob.min
        } else {
            knob.val.clamp_to(knob.min, knob.max)
        };
        self.app_knobs_cont.insert(knob);
        true
    }

    pub fn deregister_app_knob(&self, domain: Domain, key: Key) -> bool {
        match domain {
            Domain::Disc => self.app_knobs_disc.remove(key).is_some(),
            Domain::Cont => self.app_knobs_cont.remove(key).is_some(),
        }
    }

    // --- APPLICATION MONITORS ---

    pub fn register_app_mon_disc(&self, mut mon: AppMonDisc) -> bool {
        if !valid_range(mon.min, mon.max) {
            return false;
        }
        mon.val = mon.val.clamp_to(mon.min, mon.max);
        let key = Entry::key(&mon);
        self.app_mons_disc.insert(mon);
        if mon.kind == AppMonType::Perf {
            self.stamp_perf(key, Domain::Disc);
            self.offer_perf(BindingPerf::new(key, Domain::Disc, mon.weight, mon.min as f64, mon.max as f64));
        }
        true
    }

    pub fn register_app_mon_cont(&self, mut mon: AppMonCont) -> bool {
        if !valid_range(mon.min, mon.max) {
            return false;
        }
        mon.val = mon.val.clamp_to(mon.min, mon.max);
        let key = Entry::key(&mon);
        self.app_mons_cont.insert(mon);
        if mon.kind == AppMonType::Perf {
            self.stamp_perf(key, Domain::Cont);
            self.offer_perf(BindingPerf::new(key, Domain::Cont, mon.weight, mon.min, mon.max));
        }
        true
    }

    pub fn deregister_app_mon(&self, domain: Domain, key: Key) -> bool {
        let removed = match domain {
            Domain::Disc => self.app_mons_disc.remove(key).is_some(),
            Domain::Cont => self.app_mons_cont.remove(key).is_some(),
        };
        self.perf_seq.lock().remove(&(key, domain));
        let was_binding = self.perf.lock().map_or(false, |b| b.key == key && b.domain == domain);
        if removed && was_binding {
            self.reelect_perf();
        }
        removed
    }

    // --- BOUND / WEIGHT / VALUE UPDATES ---

    // APPLY ONE FIELD UPDATE TO AN APP ITEM. MISSES AND REJECTED UPDATES
    // RETURN FALSE; NEITHER IS AN ERROR
    pub fn update_app(&self, target: Target, key: Key, field: Field, v: f64) -> bool {
        match target {
            Target::Knob(Domain::Disc) => matches!(self.app_knobs_disc.update(key, field, v), Update::Applied(_)),
            Target::Knob(Domain::Cont) => matches!(self.app_knobs_cont.update(key, field, v), Update::Applied(_)),
            Target::Monitor(Domain::Disc) => match self.app_mons_disc.update(key, field, v) {
                Update::Applied(m) => {
                    self.refresh_perf(key, Domain::Disc, m.min as f64, m.max as f64, m.weight);
                    true
                }
                _ => false,
            },
            Target::Monitor(Domain::Cont) => match self.app_mons_cont.update(key, field, v) {
                Update::Applied(m) => {
                    self.refresh_perf(key, Domain::Cont, m.min, m.max, m.weight);
                    true
                }
                _ => false,
            },
        }
    }

    pub fn update_device(&self, target: Target, id: u32, field: Field, v: f64) -> bool {
        let key = Key::device(id);
        match target {
            Target::Knob(Domain::Disc) => matches!(self.dev_knobs_disc.update(key, field, v), Update::Applied(_)),
            Target::Knob(Domain::Cont) => matches!(self.dev_knobs_cont.update(key, field, v), Update::Applied(_)),
            Target::Monitor(Domain::Disc) => matches!(self.dev_mons_disc.update(key, field, v), Update::Applied(_)),
            Target::Monitor(Domain::Cont) => matches!(self.dev_mons_cont.update(key, field, v), Update::Applied(_)),
        }
    }

    // --- DEVICE ---

    pub fn register_device(
        &self,
        knobs_disc: Vec<DevKnobDisc>,
        knobs_cont: Vec<DevKnobCont>,
        mons_disc: Vec<DevMonDisc>,
        mons_cont: Vec<DevMonCont>,
    ) {
        for k in knobs_disc.into_iter().filter(|k| valid_range(k.min, k.max)) {
            self.dev_knobs_disc.insert(Knob { val: k.val.clamp_to(k.min, k.max), ..k });
        }
        for k in knobs_cont.into_iter().filter(|k| valid_range(k.min, k.max)) {
            self.dev_knobs_cont.insert(Knob { val: k.val.clamp_to(k.min, k.max), ..k });
        }
        for m in mons_disc.into_iter().filter(|m| valid_range(m.min, m.max)) {
            self.dev_mons_disc.insert(Monitor { val: m.val.clamp_to(m.min, m.max), ..m });
        }
        for m in mons_cont.into_iter().filter(|m| valid_range(m.min, m.max)) {
            self.dev_mons_cont.insert(Monitor { val: m.val.clamp_to(m.min, m.max), ..m });
        }
    }

    pub fn deregister_device(&self) {
        self.dev_knobs_disc.drain();
        self.dev_knobs_cont.drain();
        self.dev_mons_disc.drain();
        self.dev_mons_cont.drain();
    }

    // --- BINDING PERFORMANCE MONITOR ---

    pub fn binding_perf(&self) -> Option<BindingPerf> {
        *self.perf.lock()
    }

    fn stamp_perf(&self, key: Key, domain: Domain) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.perf_seq.lock().insert((key, domain), seq);
    }

    fn offer_perf(&self, candidate: BindingPerf) {
        let mut perf = self.perf.lock();
        let take = match *perf {
            None => true,
            Some(current) => current.key == candidate.key || candidate.weight >= current.weight,
        };
        if take {
            *perf = Some(candidate);
        }
    }

    fn refresh_perf(&self, key: Key, domain: Domain, min: f64, max: f64, weight: f64) {
        let mut perf = self.perf.lock();
        if let Some(b) = perf.as_mut() {
            if b.key == key && b.domain == domain {
                *b = BindingPerf::new(key, domain, weight, min, max);
            }
        }
    }

    // HIGHEST WEIGHT WINS, TIES GO TO THE LATEST REGISTRATION.
    // SAME ORDER offer_perf PRODUCES, SO REGISTER + DEREGISTER IS A NO-OP.
    fn reelect_perf(&self) {
        let mut candidates: Vec<BindingPerf> = Vec::new();
        for m in self.app_mons_disc.snapshot().into_iter().filter(|m| m.kind == AppMonType::Perf) {
            candidates.push(BindingPerf::new(Entry::key(&m), Domain::Disc, m.weight, m.min as f64, m.max as f64));
        }
        for m in self.app_mons_cont.snapshot().into_iter().filter(|m| m.kind == AppMonType::Perf) {
            candidates.push(BindingPerf::new(Entry::key(&m), Domain::Cont, m.weight, m.min, m.max));
        }
        let order = self.perf_seq.lock();
        let seq = |c: &BindingPerf| order.get(&(c.key, c.domain)).copied().unwrap_or(0);
        let mut best: Option<(BindingPerf, u64)> = None;
        for c in candidates {
            let s = seq(&c);
            let take = match best {
                None => true,
                Some((b, bs)) => c.weight > b.weight || (c.weight == b.weight && s > bs),
            };
            if take {
                best = Some((c, s));
            }
        }
        drop(order);
        *self.perf.lock() = best.map(|(b, _)| b);
    }

    // --- SNAPSHOT ---

    // POINT-IN-TIME COPY. EACH COLLECTION IS COPIED UNDER ITS OWN LOCK
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            apps: self.apps(),
            app_knobs_disc: self.app_knobs_disc.snapshot(),
            app_knobs_cont: self.app_knobs_cont.snapshot(),
            app_mons_disc: self.app_mons_disc.snapshot(),
            app_mons_cont: self.app_mons_cont.snapshot(),
            dev_knobs_disc: self.dev_knobs_disc.snapshot(),
            dev_knobs_cont: self.dev_knobs_cont.snapshot(),
            dev_mons_disc: self.dev_mons_disc.snapshot(),
            dev_mons_cont: self.dev_mons_cont.snapshot(),
            perf: self.binding_perf(),
        }
    }
}

impl Snapshot {
    pub fn app_knob_disc(&self, key: Key) -> Option<&AppKnobDisc> {
        self.app_knobs_disc.iter().find(|k| Entry::key(*k) == key)
    }

    pub fn app_knob_cont(&self, key: Key) -> Option<&AppKnobCont> {
        self.app_knobs_cont.iter().find(|k| Entry::key(*k) == key)
    }

    pub fn dev_knob_disc(&self, id: u32) -> Option<&DevKnobDisc> {
        self.dev_knobs_disc.iter().find(|k| k.id == id)
    }

    pub fn dev_knob_cont(&self, id: u32) -> Option<&DevKnobCont> {
        self.dev_knobs_cont.iter().find(|k| k.id == id)
    }
}

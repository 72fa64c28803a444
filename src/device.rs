// RTMCTL DEVICE BOUNDARY
// ARCHITECTURE DESCRIPTION (JSON), FUNCTIONAL-UNIT CLASSIFICATION,
// AND THE OUTBOUND Actuator INTERFACE THE CONTROL LOOP DRIVES.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::Snapshot;
use crate::types::*;

// --- OUTBOUND COMMANDS ---

// EVERYTHING THE DECISION ENGINE ASKS OF THE OUTSIDE WORLD
// IMPLEMENTATIONS FORWARD TO THE APP/DEVICE TRANSPORT
pub trait Actuator: Send + Sync {
    fn set_discrete_knob(&self, knob: Key, value: Disc) -> Result<()>;
    fn set_continuous_knob(&self, knob: Key, value: Cont) -> Result<()>;
    fn get_discrete_monitor(&self, mon: Key) -> Result<Disc>;
    fn get_continuous_monitor(&self, mon: Key) -> Result<Cont>;
    fn set_process_affinity(&self, pid: Pid, cores: &[usize]) -> Result<()>;
}

// --- IDS ---

// FULL ID = UNIT(8) | LEVEL1(8) | LEVEL2(8) | ITEM(8)
pub fn compose_id(unit: u32, level1: u32, level2: u32, item: u32) -> u32 {
    ((unit & 0xFF) << 24) | ((level1 & 0xFF) << 16) | ((level2 & 0xFF) << 8) | (item & 0xFF)
}

pub fn split_id(id: u32) -> (u32, u32, u32, u32) {
    (id >> 24, (id >> 16) & 0xFF, (id >> 8) & 0xFF, id & 0xFF)
}

// --- ARCHITECTURE DESCRIPTION ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: u32,
    #[serde(flatten)]
    pub items: BTreeMap<String, Item>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubUnit {
    pub id: u32,
    #[serde(default)]
    pub knobs: Option<Group>,
    #[serde(default)]
    pub mons: Option<Group>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionalUnit {
    pub id: u32,
    #[serde(default)]
    pub knobs: Option<Group>,
    #[serde(default)]
    pub mons: Option<Group>,
    #[serde(flatten)]
    pub sub_units: BTreeMap<String, SubUnit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub descriptor: String,
    #[serde(default)]
    pub functional_units: BTreeMap<String, FunctionalUnit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceArch {
    pub device: Device,
}

// DEVICE ITEMS GROUPED BY THE FUNCTIONAL UNIT THEY BELONG TO
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitControls {
    pub unit: u32,
    pub name: String,
    pub freq_knobs: Vec<DevKnobDisc>,
    pub freq_knobs_cont: Vec<DevKnobCont>,
    pub governors: Vec<DevKnobDisc>,
    pub cycle_monitors: Vec<DevMonDisc>,
    pub power_monitors: Vec<DevMonCont>,
}

impl UnitControls {
    pub fn has_governor(&self) -> bool {
        !self.governors.is_empty()
    }
}

fn group_ids(group: &Option<Group>, unit: u32, level1: Option<u32>, out: &mut Vec<u32>) {
    if let Some(g) = group {
        for item in g.items.values() {
            let id = match level1 {
                None => compose_id(unit, g.id, 0, item.id),
                Some(l1) => compose_id(unit, l1, g.id, item.id),
            };
            out.push(id);
        }
    }
}

impl DeviceArch {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing device architecture")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn descriptor(&self) -> &str {
        &self.device.descriptor
    }

    // FUNCTIONAL UNIT IDS IN ASCENDING ORDER
    pub fn unit_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.device.functional_units.values().map(|u| u.id).collect();
        ids.sort_unstable();
        ids
    }

    fn unit(&self, unit_id: u32) -> Option<(&String, &FunctionalUnit)> {
        self.device.functional_units.iter().find(|(_, u)| u.id == unit_id)
    }

    // EVERY KNOB AND MONITOR ID BELONGING TO A UNIT, SUB-UNITS INCLUDED
    pub fn ids_of_unit(&self, unit_id: u32) -> Vec<u32> {
        let mut ids = Vec::new();
        if let Some((_, u)) = self.unit(unit_id) {
            group_ids(&u.mons, u.id, None, &mut ids);
            group_ids(&u.knobs, u.id, None, &mut ids);
            for sub in u.sub_units.values() {
                group_ids(&sub.mons, u.id, Some(sub.id), &mut ids);
                group_ids(&sub.knobs, u.id, Some(sub.id), &mut ids);
            }
        }
        ids
    }

    pub fn unit_of(&self, id: u32) -> Option<u32> {
        self.unit_ids().into_iter().find(|&u| self.ids_of_unit(u).contains(&id))
    }

    // ONE-SHOT CLASSIFICATION OF THE REGISTERED DEVICE ITEMS BY UNIT
    pub fn classify(&self, snap: &Snapshot) -> Vec<UnitControls> {
        let mut units = Vec::new();
        for unit_id in self.unit_ids() {
            let ids = self.ids_of_unit(unit_id);
            let name = self.unit(unit_id).map(|(n, _)| n.clone()).unwrap_or_default();
            let owns = |id: u32| ids.contains(&id);
            units.push(UnitControls {
                unit: unit_id,
                name,
                freq_knobs: snap.dev_knobs_disc.iter()
                    .filter(|k| k.kind == DevKnobType::Freq && owns(k.id)).copied().collect(),
                freq_knobs_cont: snap.dev_knobs_cont.iter()
                    .filter(|k| k.kind == DevKnobType::Freq && owns(k.id)).copied().collect(),
                governors: snap.dev_knobs_disc.iter()
                    .filter(|k| k.kind == DevKnobType::Governor && owns(k.id)).copied().collect(),
                cycle_monitors: snap.dev_mons_disc.iter()
                    .filter(|m| m.kind == DevMonType::Cycles && owns(m.id)).copied().collect(),
                power_monitors: snap.dev_mons_cont.iter()
                    .filter(|m| m.kind == DevMonType::Pow && owns(m.id)).copied().collect(),
            });
        }
        units
    }

    pub fn print(&self) {
        println!("DEVICE: {}", self.device.descriptor);
        if self.device.functional_units.is_empty() {
            println!("  (NO FUNCTIONAL UNITS)");
            return;
        }
        for (name, u) in &self.device.functional_units {
            println!("  {} (unit {})", name, u.id);
            print_group("    knob", &u.knobs, u.id, None);
            print_group("    mon ", &u.mons, u.id, None);
            for (sub_name, sub) in &u.sub_units {
                println!("    {} (sub-unit {})", sub_name, sub.id);
                print_group("      knob", &sub.knobs, u.id, Some(sub.id));
                print_group("      mon ", &sub.mons, u.id, Some(sub.id));
            }
        }
    }
}

fn print_group(prefix: &str, group: &Option<Group>, unit: u32, level1: Option<u32>) {
    if let Some(g) = group {
        for (name, item) in &g.items {
            let id = match level1 {
                None => compose_id(unit, g.id, 0, item.id),
                Some(l1) => compose_id(unit, l1, g.id, item.id),
            };
            println!("{} {:<16} id=0x{:08x} type={}", prefix, name, id, item.kind);
        }
    }
}

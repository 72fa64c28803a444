use std::path::Path;

use anyhow::Result;

use rtmctl::device::{split_id, DeviceArch};
use rtmctl::sim::SimPlatform;

pub fn run_arch(path: Option<&Path>) -> Result<()> {
    let arch = match path {
        Some(p) => DeviceArch::from_path(p)?,
        None => SimPlatform::arch()?,
    };

    println!("RTMCTL ARCHITECTURE");
    println!();
    arch.print();
    println!();

    println!("{:<8} {:<8} {}", "UNIT", "ITEMS", "IDS");
    println!("{}", "-".repeat(40));
    for unit in arch.unit_ids() {
        let ids = arch.ids_of_unit(unit);
        let shown: Vec<String> = ids.iter()
            .map(|&id| {
                let (_, l1, l2, item) = split_id(id);
                format!("{}.{}.{}", l1, l2, item)
            })
            .collect();
        println!("{:<8} {:<8} {}", unit, ids.len(), shown.join(" "));
    }
    Ok(())
}

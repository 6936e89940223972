use std::fs;

/// Hosts below 1 GiB of physical memory get the constrained treatment.
const MEMORY_CONSTRAINED_THRESHOLD: u64 = 1024 * 1024 * 1024;

pub trait MemoryProbe: Send + Sync {
    /// Total physical memory in bytes, `None` when it cannot be determined.
    fn total_physical_memory(&self) -> Option<u64>;
}

/// Reads `MemTotal` from `/proc/meminfo`.
#[derive(Debug, Default)]
pub struct ProcMeminfoProbe;

impl MemoryProbe for ProcMeminfoProbe {
    fn total_physical_memory(&self) -> Option<u64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let line = meminfo.lines().find(|line| line.starts_with("MemTotal:"))?;
        let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kib * 1024)
    }
}

/// The constrained-host rule: the configuration flag forces it, otherwise any
/// host with less than 1 GiB of physical memory qualifies. An unreadable
/// probe is treated as unconstrained.
pub fn is_memory_constrained(forced: bool, probe: &dyn MemoryProbe) -> bool {
    if forced {
        return true;
    }
    probe
        .total_physical_memory()
        .map(|total| total < MEMORY_CONSTRAINED_THRESHOLD)
        .unwrap_or(false)
}

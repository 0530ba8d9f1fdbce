use once_cell::sync::Lazy;
use std::sync::Mutex;
use sysinfo::System;

static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| Mutex::new(System::new()));

/// Total physical memory in megabytes, or `None` when the probe is unavailable.
pub fn total_memory_mb() -> Option<u64> {
    let mut sys = SYSTEM.lock().ok()?;
    sys.refresh_memory();
    match sys.total_memory() / 1024 / 1024 {
        0 => None,
        mb => Some(mb),
    }
}

/// Default heap ceiling for a fresh installation: a quarter of system memory,
/// clamped to 2-4 GB, in megabytes.
pub fn default_max_ram_mb() -> u64 {
    total_memory_mb()
        .map(|total| (total / 4).clamp(2048, 4096))
        .unwrap_or(2048)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_ram_is_clamped() {
        let ram = default_max_ram_mb();
        assert!((2048..=4096).contains(&ram));
    }
}

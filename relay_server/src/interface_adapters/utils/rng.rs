use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

fn boot_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Returns a process-unique, monotonically increasing connection id.
///
/// Seeding the counter with the boot time keeps ids from repeating across
/// room hibernation cycles inside one process, and the increment keeps two
/// upgrades in the same instant from colliding.
pub fn next_conn_id() -> u64 {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| AtomicU64::new(boot_nanos()));
    counter.fetch_add(1, Ordering::Relaxed)
}

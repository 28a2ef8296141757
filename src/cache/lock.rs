use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Guarded cache state is rebuildable from the database, so a poisoned lock
/// is logged and reused instead of propagating the panic.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                target: "atrium::cache",
                op,
                source,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn poisoned_lock_keeps_its_value() {
        let slot = Arc::new(Mutex::new(Some(7_u32)));
        let poisoner = Arc::clone(&slot);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(slot.is_poisoned());

        assert_eq!(mutex_lock(&slot, "test", "take").take(), Some(7));
        assert_eq!(mutex_lock(&slot, "test", "take").take(), None);
    }
}

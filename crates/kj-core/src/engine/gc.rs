//! Deferred deallocation for values released on the audio thread
//!
//! Mode snapshots and source lanes are wrapped in `basedrop::Shared` /
//! `basedrop::Owned`. When the audio thread drops one (a superseded snapshot,
//! an unregistered source's ring), the pointer is only enqueued; the memory is
//! freed later by the collector thread started here.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let snapshot = Shared::new(&gc_handle(), ModeSnapshot::new(config, coefficients, 1));
//! cell.set(snapshot); // previous snapshot is reclaimed off the audio thread
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Collection interval; snapshot and lane churn is low so this only bounds memory lag
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("kj-audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread for the process lifetime
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::debug!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `Shared<T>` / `Owned<T>` values
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::{Owned, Shared};

    #[test]
    fn test_handles_come_from_one_collector() {
        let a = Shared::new(&gc_handle(), vec![1.0f32; 16]);
        let b = Owned::new(&gc_handle(), vec![0u8; 16]);
        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 16);
        drop(a);
        drop(b);
    }
}

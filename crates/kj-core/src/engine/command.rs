//! Control messages from API threads to the audio thread
//!
//! Source installation and removal change what the processor owns, so they go
//! through an `rtrb` SPSC queue and are applied at the start of the next period.
//! Mode changes do not use this queue; they are published as snapshots.
//!
//! ```ignore
//! let (mut tx, mut rx) = command_channel(32);
//!
//! // API thread
//! tx.push(EngineCommand::RemoveSource { slot: 0 })?;
//!
//! // Audio thread, once per period
//! while let Ok(cmd) = rx.pop() { processor.apply(cmd); }
//! ```

use basedrop::Owned;

use super::source::SourceLane;

pub enum EngineCommand {
    /// Start mixing a freshly registered source in `slot`
    ///
    /// The lane is `Owned` so that whatever the audio thread drops (this lane
    /// later, or a stale one it replaces) is freed on the GC thread.
    InstallSource { slot: usize, lane: Owned<SourceLane> },
    /// Stop mixing `slot` and discard anything still queued for it
    RemoveSource { slot: usize },
}

/// Queue depth for a given source limit
///
/// Every source needs at most one install and one remove in flight; the rest is slack.
pub fn command_capacity(max_sources: usize) -> usize {
    max_sources * 4 + 16
}

/// Create a bounded command channel `(API side, audio side)`
pub fn command_channel(
    capacity: usize,
) -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_is_fifo() {
        let (mut tx, mut rx) = command_channel(command_capacity(2));

        assert!(tx.push(EngineCommand::RemoveSource { slot: 1 }).is_ok());
        assert!(tx.push(EngineCommand::RemoveSource { slot: 0 }).is_ok());

        assert!(matches!(rx.pop(), Ok(EngineCommand::RemoveSource { slot: 1 })));
        assert!(matches!(rx.pop(), Ok(EngineCommand::RemoveSource { slot: 0 })));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Owned<T> is a single pointer; keep the enum small for the ring
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 24, "EngineCommand is {} bytes, expected <= 24", size);
    }
}

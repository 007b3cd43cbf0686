//! Lock-free engine counters
//!
//! Written by the audio thread (and the transport's error/xrun callbacks) with
//! relaxed atomics; read by `Engine::stats()`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineStats {
    underruns: AtomicU64,
    overruns: AtomicU64,
    analysis_drops: AtomicU64,
    periods: AtomicU64,
    /// f32 bits of the largest |sample| captured since the last read
    peak_input: AtomicU32,
    clip_active: Arc<AtomicBool>,
}

impl EngineStats {
    pub fn new(clip_indicator: Arc<AtomicBool>) -> Self {
        Self {
            clip_active: clip_indicator,
            ..Default::default()
        }
    }

    #[inline]
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analysis_drops(&self, count: u64) {
        if count > 0 {
            self.analysis_drops.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_period(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a period's peak into the running maximum
    #[inline]
    pub fn record_peak(&self, peak: f32) {
        // Bit patterns of non-negative floats order the same as their values
        let peak = if peak.is_finite() { peak.abs() } else { 0.0 };
        self.peak_input.fetch_max(peak.to_bits(), Ordering::Relaxed);
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn analysis_drop_count(&self) -> u64 {
        self.analysis_drops.load(Ordering::Relaxed)
    }

    pub fn periods_processed(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    /// Read all counters; the input peak and clip flag restart from zero
    pub fn take_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            underrun_count: self.underrun_count(),
            overrun_count: self.overrun_count(),
            analysis_drop_count: self.analysis_drop_count(),
            peak_input_level: f32::from_bits(self.peak_input.swap(0, Ordering::Relaxed)),
            periods_processed: self.periods_processed(),
            clip_active: self.clip_active.swap(false, Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub underrun_count: u64,
    pub overrun_count: u64,
    pub analysis_drop_count: u64,
    /// Largest absolute mic sample since the previous `stats()` call (linear, 0..1)
    pub peak_input_level: f32,
    pub periods_processed: u64,
    /// The soft clipper engaged since the previous `stats()` call
    pub clip_active: bool,
}

impl StatsSnapshot {
    /// Peak input in dBFS (-inf for silence)
    pub fn peak_input_dbfs(&self) -> f32 {
        20.0 * self.peak_input_level.log10()
    }
}

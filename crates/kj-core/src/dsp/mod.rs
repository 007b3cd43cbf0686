//! Real-time DSP blocks
//!
//! Both processors allocate everything in `new` and run in O(block length).

mod decimator;
mod reverb;

pub use decimator::Decimator;
pub use reverb::{Reverb, ReverbCoefficients, ReverbParams, ALLPASS_DELAYS_MS, COMB_DELAYS_MS};

/// Water quality analysis.
///
/// Turns raw multi-parameter readings into a single index and health status.
/// Everything here is pure: no state, no I/O, no clock.
///
/// Submodules:
/// - `score`: per-parameter sub-scores, weighted index, coliform override.

pub mod score;

pub use score::score_reading;

//! Water quality index thresholds.
//!
//! Maps an index value onto GREEN / AMBER / RED. The boundaries are
//! compiled-in constants, not configuration.

use crate::model::Status;

/// Lowest index still considered healthy.
pub const GREEN_MIN_INDEX: f64 = 80.0;

/// Lowest index that is degraded but not critical.
pub const AMBER_MIN_INDEX: f64 = 50.0;

/// Classifies an index value.
///
///   index >= 80        → GREEN
///   50 <= index < 80   → AMBER
///   index < 50         → RED
pub fn classify_index(index: f64) -> Status {
    if index >= GREEN_MIN_INDEX {
        Status::Green
    } else if index >= AMBER_MIN_INDEX {
        Status::Amber
    } else {
        Status::Red
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_are_inclusive_on_the_healthy_side() {
        assert_eq!(classify_index(80.0), Status::Green);
        assert_eq!(classify_index(79.99), Status::Amber);
        assert_eq!(classify_index(50.0), Status::Amber);
        assert_eq!(classify_index(49.99), Status::Red);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(classify_index(100.0), Status::Green);
        assert_eq!(classify_index(0.0), Status::Red);
    }

    #[test]
    fn test_thresholds_are_ordered() {
        assert!(AMBER_MIN_INDEX < GREEN_MIN_INDEX);
    }
}

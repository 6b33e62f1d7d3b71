/// Latest-reading staleness detection.
///
/// The simulator and field sensors report every few seconds. A node whose
/// newest reading is old keeps its last status on the dashboard, which can
/// hide a sensor outage. The analyzer still scores the latest reading, but
/// uses this check to flag the gap.
///
/// # Clock injection
/// The check takes `now` as a parameter rather than calling `Utc::now()`,
/// so it is fully deterministic in tests.

use chrono::{DateTime, Duration, Utc};

use crate::model::Reading;

/// Returns `true` if the reading is older than `max_age` relative to `now`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age  →  stale
///   age == max_age →  not stale
///
/// Readings timestamped in the future (clock skew between the sensor
/// source and the analyzer) are never stale.
pub fn is_stale_at(reading: &Reading, max_age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(reading.recorded_at) > max_age
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

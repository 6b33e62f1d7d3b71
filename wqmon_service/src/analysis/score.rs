//! Water quality index (WQI) scoring.
//!
//! Each present parameter is mapped onto a 0–100 sub-score by a fixed
//! breakpoint function. The index is the weighted mean of the present
//! sub-scores, renormalised over the weights of the parameters that were
//! actually reported: a missing sensor is "not applicable", never zero.
//!
//! Coliform is a hard safety override. Any count above 10 forces the index
//! to 0 and the status to RED regardless of every other parameter.

use crate::alert::thresholds::classify_index;
use crate::model::{Parameter, ParameterValues, ScoreResult, Status};

/// Reason reported when the coliform override fires.
pub const COLIFORM_OVERRIDE_REASON: &str = "Critical coliform contamination";

/// Reason reported when no present parameter is degraded.
pub const ALL_NORMAL_REASON: &str = "All parameters normal";

/// Sub-scores below this value are listed as degraded in the reason.
pub const DEGRADED_SUB_SCORE: f64 = 50.0;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Fixed aggregation weight of a parameter. The eight weights sum to 1.0.
pub fn weight(param: Parameter) -> f64 {
    match param {
        Parameter::Coliform => 0.25,
        Parameter::Turbidity => 0.15,
        Parameter::Ph => 0.15,
        Parameter::Fluoride => 0.10,
        Parameter::Conductivity => 0.10,
        Parameter::DissolvedOxygen => 0.10,
        Parameter::Pressure => 0.10,
        Parameter::Temperature => 0.05,
    }
}

// ---------------------------------------------------------------------------
// Sub-score functions
// ---------------------------------------------------------------------------

/// Turbidity (NTU): 100 up to 1, 20 points lost per NTU to 5, 0 beyond.
pub fn turbidity_score(ntu: f64) -> f64 {
    if ntu <= 1.0 {
        100.0
    } else if ntu <= 5.0 {
        (100.0 - 20.0 * (ntu - 1.0)).max(0.0)
    } else {
        0.0
    }
}

/// pH: 100 inside [6.5, 8.5], otherwise 50 points lost per unit from 7.0.
pub fn ph_score(ph: f64) -> f64 {
    if (6.5..=8.5).contains(&ph) {
        100.0
    } else {
        (100.0 - 50.0 * (ph - 7.0).abs()).max(0.0)
    }
}

/// Fluoride (mg/L): 100 up to 1.0, 50 at 1.5, 0 beyond.
pub fn fluoride_score(mg_l: f64) -> f64 {
    if mg_l <= 1.0 {
        100.0
    } else if mg_l <= 1.5 {
        (100.0 - (mg_l - 1.0) * 100.0).max(0.0)
    } else {
        0.0
    }
}

/// Coliform count: 100 only at exactly zero, 50 up to 10, 0 above.
pub fn coliform_score(count: f64) -> f64 {
    if count == 0.0 {
        100.0
    } else if count <= 10.0 {
        50.0
    } else {
        0.0
    }
}

/// Conductivity (µS/cm): 100 up to 500, one point per 10 µS/cm to 1500.
pub fn conductivity_score(us_cm: f64) -> f64 {
    if us_cm <= 500.0 {
        100.0
    } else if us_cm <= 1500.0 {
        (100.0 - (us_cm - 500.0) / 10.0).max(0.0)
    } else {
        0.0
    }
}

/// Temperature (°C): 100 inside [20, 30], 10 points per degree to 35.
///
/// Readings below 20 °C fall through to the linear branch and score 100;
/// cold water is not penalised.
pub fn temperature_score(celsius: f64) -> f64 {
    if (20.0..=30.0).contains(&celsius) {
        100.0
    } else if celsius <= 35.0 {
        (100.0 - (celsius - 30.0) * 10.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Dissolved oxygen (mg/L): 0 below 4, linear ramp to 100 at 6.
pub fn dissolved_oxygen_score(mg_l: f64) -> f64 {
    if mg_l >= 6.0 {
        100.0
    } else if mg_l >= 4.0 {
        (mg_l - 4.0) / 2.0 * 100.0
    } else {
        0.0
    }
}

/// Line pressure (bar): 100 inside [2, 5], 50 within one bar outside, else 0.
pub fn pressure_score(bar: f64) -> f64 {
    if (2.0..=5.0).contains(&bar) {
        100.0
    } else if (1.0..2.0).contains(&bar) || (bar > 5.0 && bar <= 6.0) {
        50.0
    } else {
        0.0
    }
}

/// Sub-score of one parameter, `None` when the reading does not carry it.
pub fn sub_score(param: Parameter, values: &ParameterValues) -> Option<f64> {
    let raw = values.get(param)?;
    let score = match param {
        Parameter::Turbidity => turbidity_score(raw),
        Parameter::Ph => ph_score(raw),
        Parameter::Fluoride => fluoride_score(raw),
        Parameter::Coliform => coliform_score(raw),
        Parameter::Conductivity => conductivity_score(raw),
        Parameter::Temperature => temperature_score(raw),
        Parameter::DissolvedOxygen => dissolved_oxygen_score(raw),
        Parameter::Pressure => pressure_score(raw),
    };
    Some(score)
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Scores one reading.
///
/// Status is classified on the unrounded index; the reported index is
/// rounded to 2 decimals. A reading with no parameters at all scores
/// 0 / RED with the "All parameters normal" reason, since nothing present
/// was degraded.
pub fn score_reading(values: &ParameterValues) -> ScoreResult {
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    let mut degraded = Vec::new();

    for param in Parameter::ALL {
        if let Some(score) = sub_score(param, values) {
            total += score * weight(param);
            weight_sum += weight(param);
            if score < DEGRADED_SUB_SCORE {
                degraded.push(format!("{} degraded", param.key()));
            }
        }
    }

    if sub_score(Parameter::Coliform, values) == Some(0.0) {
        return ScoreResult {
            index: 0.0,
            status: Status::Red,
            reason: COLIFORM_OVERRIDE_REASON.to_string(),
        };
    }

    let index = if weight_sum > 0.0 { total / weight_sum } else { 0.0 };

    let reason = if degraded.is_empty() {
        ALL_NORMAL_REASON.to_string()
    } else {
        degraded.join(", ")
    };

    ScoreResult {
        index: round2(index),
        status: classify_index(index),
        reason,
    }
}

/// Rounds to 2 decimals from the exact binary value, ties to even.
///
/// `{:.2}` formats the exact decimal expansion of the float, so 1.115 (stored
/// as 1.11499...) gives 1.11 and an exact tie like 99.625 gives 99.62.
fn round2(value: f64) -> f64 {
    format!("{:.2}", value).parse().unwrap_or(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn healthy() -> ParameterValues {
        ParameterValues {
            turbidity: Some(0.5),
            ph: Some(7.0),
            fluoride: Some(0.5),
            coliform: Some(0.0),
            conductivity: Some(300.0),
            temperature: Some(25.0),
            dissolved_oxygen: Some(7.0),
            pressure: Some(3.0),
            flow_rate: Some(12.0),
        }
    }

    // --- Breakpoints ----------------------------------------------------------

    #[test]
    fn test_turbidity_breakpoints() {
        assert_eq!(turbidity_score(1.0), 100.0);
        assert!(close(turbidity_score(3.0), 60.0));
        assert!(close(turbidity_score(5.0), 20.0), "linear decay is 20 points per NTU");
        assert_eq!(turbidity_score(5.01), 0.0);
    }

    #[test]
    fn test_ph_breakpoints() {
        assert_eq!(ph_score(6.5), 100.0);
        assert_eq!(ph_score(8.5), 100.0);
        assert!(close(ph_score(6.0), 50.0));
        assert!(close(ph_score(9.0), 0.0));
        assert_eq!(ph_score(4.0), 0.0, "floored at zero");
    }

    #[test]
    fn test_fluoride_breakpoints() {
        assert_eq!(fluoride_score(1.0), 100.0);
        assert!(close(fluoride_score(1.25), 75.0));
        assert!(close(fluoride_score(1.5), 50.0));
        assert_eq!(fluoride_score(1.51), 0.0);
    }

    #[test]
    fn test_coliform_breakpoints() {
        assert_eq!(coliform_score(0.0), 100.0);
        assert_eq!(coliform_score(0.5), 50.0);
        assert_eq!(coliform_score(10.0), 50.0);
        assert_eq!(coliform_score(10.5), 0.0);
    }

    #[test]
    fn test_conductivity_breakpoints() {
        assert_eq!(conductivity_score(500.0), 100.0);
        assert!(close(conductivity_score(800.0), 70.0));
        assert!(close(conductivity_score(1500.0), 0.0));
        assert_eq!(conductivity_score(2000.0), 0.0);
    }

    #[test]
    fn test_temperature_breakpoints() {
        assert_eq!(temperature_score(20.0), 100.0);
        assert_eq!(temperature_score(30.0), 100.0);
        assert!(close(temperature_score(31.0), 90.0));
        assert!(close(temperature_score(35.0), 50.0));
        assert_eq!(temperature_score(35.5), 0.0);
        assert_eq!(temperature_score(12.0), 100.0, "cold water is not penalised");
    }

    #[test]
    fn test_dissolved_oxygen_breakpoints() {
        assert_eq!(dissolved_oxygen_score(6.0), 100.0);
        assert!(close(dissolved_oxygen_score(5.0), 50.0));
        assert_eq!(dissolved_oxygen_score(4.0), 0.0);
        assert_eq!(dissolved_oxygen_score(3.9), 0.0);
    }

    #[test]
    fn test_pressure_breakpoints() {
        assert_eq!(pressure_score(2.0), 100.0);
        assert_eq!(pressure_score(5.0), 100.0);
        assert_eq!(pressure_score(1.0), 50.0);
        assert_eq!(pressure_score(1.99), 50.0);
        assert_eq!(pressure_score(6.0), 50.0);
        assert_eq!(pressure_score(0.99), 0.0);
        assert_eq!(pressure_score(6.01), 0.0);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let sum: f64 = Parameter::ALL.iter().map(|p| weight(*p)).sum();
        assert!(close(sum, 1.0), "weights sum to {}", sum);
    }

    // --- Aggregate ------------------------------------------------------------

    #[test]
    fn test_mixed_reading_matches_weighted_formula() {
        // Sub-scores: turbidity 60, ph 100, fluoride 100, coliform 100,
        // conductivity 70, temperature 90, do 50, pressure 50.
        // 0.15*60 + 0.15*100 + 0.10*100 + 0.25*100 + 0.10*70
        //   + 0.05*90 + 0.10*50 + 0.10*50 = 80.5
        let values = ParameterValues {
            turbidity: Some(3.0),
            ph: Some(7.2),
            fluoride: Some(0.9),
            coliform: Some(0.0),
            conductivity: Some(800.0),
            temperature: Some(31.0),
            dissolved_oxygen: Some(5.0),
            pressure: Some(1.5),
            flow_rate: None,
        };
        let result = score_reading(&values);
        assert!(close(result.index, 80.5), "index was {}", result.index);
        assert_eq!(result.status, Status::Green);
        assert_eq!(
            result.reason, ALL_NORMAL_REASON,
            "no sub-score is below 50, so nothing is listed as degraded"
        );
    }

    #[test]
    fn test_coliform_override_beats_every_other_parameter() {
        let values = ParameterValues {
            turbidity: Some(10.0),
            ph: Some(4.0),
            fluoride: Some(2.0),
            coliform: Some(100.0),
            conductivity: Some(2000.0),
            temperature: Some(40.0),
            dissolved_oxygen: Some(1.0),
            pressure: Some(0.5),
            flow_rate: None,
        };
        let result = score_reading(&values);
        assert_eq!(result.index, 0.0);
        assert_eq!(result.status, Status::Red);
        assert_eq!(result.reason, COLIFORM_OVERRIDE_REASON);
    }

    #[test]
    fn test_coliform_override_fires_on_otherwise_perfect_water() {
        let mut values = healthy();
        values.coliform = Some(11.0);
        let result = score_reading(&values);
        assert_eq!(result.index, 0.0);
        assert_eq!(result.status, Status::Red);
        assert_eq!(result.reason, COLIFORM_OVERRIDE_REASON);
    }

    #[test]
    fn test_all_parameters_absent_scores_red_with_benign_reason() {
        let result = score_reading(&ParameterValues::default());
        assert_eq!(result.index, 0.0);
        assert_eq!(result.status, Status::Red);
        assert_eq!(result.reason, ALL_NORMAL_REASON);
    }

    #[test]
    fn test_flow_rate_alone_counts_as_no_parameters() {
        let values = ParameterValues { flow_rate: Some(20.0), ..Default::default() };
        assert_eq!(score_reading(&values).status, Status::Red);
    }

    #[test]
    fn test_absent_parameters_are_renormalised_not_zeroed() {
        // Only pH present and perfect: the index is 100, not 15.
        let values = ParameterValues { ph: Some(7.0), ..Default::default() };
        let result = score_reading(&values);
        assert_eq!(result.index, 100.0);
        assert_eq!(result.status, Status::Green);
    }

    #[test]
    fn test_reason_lists_degraded_parameters_in_fixed_order() {
        let mut values = healthy();
        values.pressure = Some(0.5);
        values.turbidity = Some(8.0);
        values.dissolved_oxygen = Some(3.0);
        let result = score_reading(&values);
        assert_eq!(result.reason, "turbidity degraded, do degraded, pressure degraded");
        // 100 - 0.15*100 - 0.10*100 - 0.10*100 = 65
        assert!(close(result.index, 65.0), "index was {}", result.index);
        assert_eq!(result.status, Status::Amber);
    }

    #[test]
    fn test_partial_reading_status_follows_present_weights() {
        let values = ParameterValues {
            turbidity: Some(9.0),
            ph: Some(7.0),
            fluoride: Some(0.5),
            ..Default::default()
        };
        // (0.15*0 + 0.15*100 + 0.10*100) / 0.40 = 62.5
        let result = score_reading(&values);
        assert!(close(result.index, 62.5), "index was {}", result.index);
        assert_eq!(result.status, Status::Amber);
        let values = ParameterValues { turbidity: Some(9.0), ph: Some(9.5), ..Default::default() };
        assert_eq!(score_reading(&values).status, Status::Red);
    }

    #[test]
    fn test_index_is_rounded_to_two_decimals() {
        // conductivity 1/3 of the way: (100 - 33.3333) with only one parameter
        let values = ParameterValues { conductivity: Some(833.3333), ..Default::default() };
        let result = score_reading(&values);
        assert!(close(result.index, 66.67), "index was {}", result.index);
    }

    #[test]
    fn test_exact_tie_rounds_to_even() {
        // 100 - 3.75 / 10 = 99.625 is exactly representable.
        let values = ParameterValues { conductivity: Some(503.75), ..Default::default() };
        let result = score_reading(&values);
        assert_eq!(result.index, 99.62);

        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
    }

    #[test]
    fn test_rounding_uses_the_stored_binary_value() {
        // Both are stored slightly below the written decimal.
        assert_eq!(round2(1.115), 1.11);
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(80.5), 80.5);
        assert_eq!(round2(0.0), 0.0);
    }

    // --- Properties -------------------------------------------------------------

    fn random_values(rng: &mut StdRng) -> ParameterValues {
        let mut values = ParameterValues::default();
        for param in Parameter::ALL {
            if rng.random_bool(0.8) {
                let raw = match param {
                    Parameter::Turbidity => rng.random_range(0.0..20.0),
                    Parameter::Ph => rng.random_range(0.0..14.0),
                    Parameter::Fluoride => rng.random_range(0.0..3.0),
                    Parameter::Coliform => {
                        if rng.random_bool(0.5) { 0.0 } else { rng.random_range(0.0..50.0) }
                    }
                    Parameter::Conductivity => rng.random_range(0.0..2500.0),
                    Parameter::Temperature => rng.random_range(0.0..45.0),
                    Parameter::DissolvedOxygen => rng.random_range(0.0..10.0),
                    Parameter::Pressure => rng.random_range(0.0..8.0),
                };
                values.set(param, Some(raw));
            }
        }
        values
    }

    #[test]
    fn test_index_always_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5_000 {
            let result = score_reading(&random_values(&mut rng));
            assert!(
                (0.0..=100.0).contains(&result.index),
                "index {} out of range",
                result.index
            );
        }
    }

    #[test]
    fn test_healthy_ranges_are_always_green() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..2_000 {
            let values = ParameterValues {
                turbidity: Some(rng.random_range(0.0..=1.0)),
                ph: Some(rng.random_range(6.5..=8.5)),
                fluoride: Some(rng.random_range(0.0..=1.0)),
                coliform: Some(0.0),
                conductivity: Some(rng.random_range(0.0..=500.0)),
                temperature: Some(rng.random_range(20.0..=30.0)),
                dissolved_oxygen: Some(rng.random_range(6.0..=10.0)),
                pressure: Some(rng.random_range(2.0..=5.0)),
                flow_rate: None,
            };
            let result = score_reading(&values);
            assert_eq!(result.status, Status::Green, "{:?} scored {:?}", values, result);
            assert!(result.index >= 80.0);
        }
    }

    #[test]
    fn test_coliform_above_ten_is_always_red_zero() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..2_000 {
            let mut values = random_values(&mut rng);
            values.coliform = Some(rng.random_range(10.001..500.0));
            let result = score_reading(&values);
            assert_eq!(result.status, Status::Red);
            assert_eq!(result.index, 0.0);
        }
    }

    #[test]
    fn test_dropping_a_parameter_at_or_below_the_index_never_lowers_it() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..2_000 {
            let mut values = random_values(&mut rng);
            values.coliform = Some(0.0);
            let full = score_reading(&values);
            for param in Parameter::ALL {
                if param == Parameter::Coliform {
                    continue;
                }
                let Some(sub) = sub_score(param, &values) else { continue };
                if sub > full.index {
                    continue;
                }
                let mut reduced = values.clone();
                reduced.set(param, None);
                let partial = score_reading(&reduced);
                assert!(
                    partial.index + 0.01 >= full.index,
                    "removing {} ({}) lowered index {} -> {}",
                    param,
                    sub,
                    full.index,
                    partial.index
                );
            }
        }
    }
}

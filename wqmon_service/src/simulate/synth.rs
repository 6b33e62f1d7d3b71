/// Synthetic sensor readings.
///
/// Baseline values are drawn from ranges a healthy network actually shows.
/// Contamination biases a handful of parameters: moderately for AMBER
/// (turbidity up, a few coliform colonies) and severely for RED (turbidity
/// well past 5 NTU, heavy coliform, pH knocked out of range). Independently
/// of any event, a rare glitch spikes turbidity on a single node.

use rand::Rng;

use crate::model::{HierarchyLevel, ParameterValues, Severity};

/// Nominal line pressure (bar) by position in the tree. Pressure drops
/// further from the pump.
pub fn base_pressure(level: HierarchyLevel) -> f64 {
    match level {
        HierarchyLevel::Pump => 3.5,
        HierarchyLevel::Zone => 2.5,
        HierarchyLevel::Colony => 1.8,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64, decimals: i32) -> f64 {
    round_to(rng.random_range(low..=high), decimals)
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A healthy reading for a node at `level`.
pub fn baseline<R: Rng + ?Sized>(level: HierarchyLevel, rng: &mut R) -> ParameterValues {
    let pressure = base_pressure(level);
    ParameterValues {
        turbidity: Some(uniform(rng, 0.3, 2.5, 2)),
        ph: Some(uniform(rng, 6.8, 7.6, 2)),
        fluoride: Some(uniform(rng, 0.4, 1.0, 2)),
        coliform: Some(0.0),
        conductivity: Some(uniform(rng, 400.0, 900.0, 1)),
        temperature: Some(uniform(rng, 24.0, 32.0, 1)),
        dissolved_oxygen: Some(uniform(rng, 4.5, 7.5, 1)),
        pressure: Some(uniform(rng, pressure - 0.5, pressure + 0.5, 2)),
        flow_rate: Some(uniform(rng, 8.0, 25.0, 1)),
    }
}

/// Biases `values` for a node polluted at `severity`.
pub fn contaminate<R: Rng + ?Sized>(values: &mut ParameterValues, severity: Severity, rng: &mut R) {
    match severity {
        Severity::Amber => {
            let turbidity = values.turbidity.unwrap_or(1.0);
            values.turbidity = Some(round_to(turbidity + rng.random_range(1.5..=3.0), 2));
            values.coliform = Some(f64::from(rng.random_range(1..=10)));
        }
        Severity::Red => {
            values.turbidity = Some(uniform(rng, 6.0, 15.0, 2));
            values.coliform = Some(f64::from(rng.random_range(20..=200)));
            values.ph = Some(if rng.random_bool(0.5) {
                uniform(rng, 4.5, 6.0, 2)
            } else {
                uniform(rng, 9.0, 10.0, 2)
            });
        }
    }
}

/// Isolated turbidity spike, unrelated to any contamination event.
pub fn glitch<R: Rng + ?Sized>(values: &mut ParameterValues, rng: &mut R) {
    values.turbidity = Some(uniform(rng, 6.0, 15.0, 2));
}

/// One reading's values for a node at `level`, polluted at `severity` if
/// any, with an independent glitch chance.
pub fn synthesize<R: Rng + ?Sized>(
    level: HierarchyLevel,
    severity: Option<Severity>,
    glitch_probability: f64,
    rng: &mut R,
) -> (ParameterValues, bool) {
    let mut values = baseline(level, rng);
    if let Some(severity) = severity {
        contaminate(&mut values, severity, rng);
    }
    let glitched = rng.random_bool(glitch_probability);
    if glitched {
        glitch(&mut values, rng);
    }
    (values, glitched)
}

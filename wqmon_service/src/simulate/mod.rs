//! Workload generator.
//!
//! `Simulator` owns the propagation engine and the node network. Each tick
//! advances the engine, synthesises one reading per node from its current
//! contamination, and writes the batch to a reading sink.

pub mod propagation;
pub mod synth;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::logging::{self, Component};
use crate::model::{Reading, StoreError};
use crate::network::Network;
use crate::store::ReadingSink;

pub use propagation::{
    ContaminationEvent, EventPhase, PropagationEngine, PropagationSettings, StepOutcome,
};

/// Summary of one generator tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub readings: usize,
    pub polluted: usize,
    pub glitches: usize,
    pub triggered: bool,
}

pub struct Simulator {
    network: Network,
    engine: PropagationEngine,
    glitch_probability: f64,
    rng: StdRng,
}

impl Simulator {
    /// A seeded simulator replays the same scenario on every run.
    pub fn new(
        network: Network,
        settings: PropagationSettings,
        glitch_probability: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { network, engine: PropagationEngine::new(settings), glitch_probability, rng }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn engine(&self) -> &PropagationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PropagationEngine {
        &mut self.engine
    }

    /// Advances the engine to `now` and returns one reading per node.
    pub fn generate(&mut self, now: DateTime<Utc>) -> (Vec<Reading>, SimulationReport) {
        let outcome = self.engine.step(&self.network, now, &mut self.rng);
        self.log_outcome(&outcome);

        let mut report = SimulationReport {
            triggered: outcome.triggered.is_some(),
            ..SimulationReport::default()
        };

        let mut readings = Vec::with_capacity(self.network.len());
        for (idx, node) in self.network.iter() {
            let severity = self.engine.contamination(idx);
            let (values, glitched) = synth::synthesize(
                node.record.hierarchy_level,
                severity,
                self.glitch_probability,
                &mut self.rng,
            );

            if severity.is_some() {
                report.polluted += 1;
            }
            if glitched {
                report.glitches += 1;
                logging::debug(
                    Component::Simulator,
                    Some(&node.record.node_id),
                    "sensor glitch injected",
                );
            }

            readings.push(Reading {
                node_id: node.record.node_id.clone(),
                recorded_at: now,
                values,
            });
        }

        report.readings = readings.len();
        (readings, report)
    }

    /// One generator tick: generate and write to `sink`.
    pub fn tick<S: ReadingSink + ?Sized>(
        &mut self,
        sink: &mut S,
        now: DateTime<Utc>,
    ) -> Result<SimulationReport, StoreError> {
        let (readings, report) = self.generate(now);
        if let Err(e) = sink.insert_readings(&readings) {
            logging::log_store_failure(Component::Simulator, "insert readings", &e);
            return Err(e);
        }

        logging::info(
            Component::Simulator,
            None,
            &format!(
                "Inserted {} readings ({} polluted, {} glitches)",
                report.readings, report.polluted, report.glitches
            ),
        );
        Ok(report)
    }

    fn log_outcome(&self, outcome: &StepOutcome) {
        if let Some(event) = &outcome.triggered {
            logging::warn(
                Component::Simulator,
                Some(self.network.node_id(event.node)),
                &format!("{} contamination event triggered", event.severity),
            );
        }
        for event in &outcome.propagated {
            let children = self.network.children(event.node).len();
            if children > 0 {
                logging::debug(
                    Component::Simulator,
                    Some(self.network.node_id(event.node)),
                    &format!("{} contamination spreading to {} children", event.severity, children),
                );
            }
        }
        for event in &outcome.expired {
            logging::debug(
                Component::Simulator,
                Some(self.network.node_id(event.node)),
                &format!("{} contamination cleared", event.severity),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HierarchyLevel, NodeRecord, Severity};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn settings() -> PropagationSettings {
        PropagationSettings {
            trigger_probability: 0.0,
            transit_delay: Duration::seconds(10),
            active_window: Duration::seconds(30),
        }
    }

    fn network() -> Network {
        Network::build(vec![
            NodeRecord {
                node_id: "PUMP_A".into(),
                hierarchy_level: HierarchyLevel::Pump,
                pump: "A".into(),
                zone: None,
                colony: None,
            },
            NodeRecord {
                node_id: "ZONE_A1".into(),
                hierarchy_level: HierarchyLevel::Zone,
                pump: "A".into(),
                zone: Some("1".into()),
                colony: None,
            },
        ])
        .expect("valid network")
    }

    #[test]
    fn test_tick_writes_one_reading_per_node() {
        let mut sim = Simulator::new(network(), settings(), 0.0, Some(3));
        let mut store = MemoryStore::new();

        let report = sim.tick(&mut store, t0()).unwrap();
        assert_eq!(report.readings, 2);
        assert_eq!(report.polluted, 0);
        assert!(store.readings().iter().all(|r| r.recorded_at == t0()));
    }

    #[test]
    fn test_polluted_nodes_are_counted() {
        let mut sim = Simulator::new(network(), settings(), 0.0, Some(3));
        let pump = sim.network().index_of("PUMP_A").expect("pump exists");
        sim.engine_mut().schedule(pump, Severity::Red, t0());

        let (readings, report) = sim.generate(t0());
        assert_eq!(report.polluted, 1);
        let pump_reading = readings.iter().find(|r| r.node_id == "PUMP_A").expect("pump reading");
        assert!(pump_reading.values.coliform.unwrap() >= 20.0);
    }

    #[test]
    fn test_sink_failure_is_returned() {
        let mut sim = Simulator::new(network(), settings(), 0.0, Some(3));
        let mut store = MemoryStore::new();
        store.fail_next(StoreError::Unavailable("connection refused".into()));

        assert!(sim.tick(&mut store, t0()).is_err());
        assert!(store.readings().is_empty());
    }

    #[test]
    fn test_same_seed_same_readings() {
        let mut a = Simulator::new(network(), settings(), 0.1, Some(42));
        let mut b = Simulator::new(network(), settings(), 0.1, Some(42));
        for step in 0..10 {
            let now = t0() + Duration::seconds(step * 5);
            assert_eq!(a.generate(now).0, b.generate(now).0, "diverged at step {}", step);
        }
    }
}

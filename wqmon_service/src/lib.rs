//! Water quality monitoring for a pump → zone → colony distribution network.
//!
//! - `analysis` scores a reading into a 0–100 index and a GREEN/AMBER/RED
//!   status.
//! - `alert` turns successive statuses into an alert history with at most
//!   one active alert per node.
//! - `simulate` generates correlated readings by spreading contamination
//!   events down the tree with a transit delay.
//! - `cycle` ties scoring and alerting into one store-backed polling tick.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod cycle;
pub mod db;
pub mod logging;
pub mod model;
pub mod network;
pub mod schedule;
pub mod simulate;
pub mod store;

//! Entry-guard selection for anonymity network clients, and an adversarial
//! relay network simulation to exercise it.

/// The guard selection state machine.
pub mod client;

/// Client parameters, command-line configuration and logging setup.
pub mod config;

/// Simulated relay network and adversary layers.
pub mod network;

/// Clocks, seeded randomness and the simulation driver.
pub mod simulation;

#[cfg(feature = "trace")]
mod tracer;

pub mod util;

//! Deterministic simulation harness.
//!
//! - [`TimeSource`]: explicit clock threaded through the client;
//!   [`VirtualTime`] only moves when the driver advances it
//! - [`SimulationRng`]: seeded randomness, so a run replays exactly from its seed
//! - [`run_simulation`]: the period / sub-period / attempt loop producing a
//!   [`SimulationReport`]
//!
//! ```
//! use guardsim::{
//!     client::Client,
//!     config::{ClientParams, Proposal},
//!     network::{NetworkConfig, SimNetwork},
//!     simulation::{run_simulation, DriverConfig, SimulationRng, VirtualTime},
//! };
//!
//! let rng = SimulationRng::new(7);
//! let network = SimNetwork::new(NetworkConfig::default(), rng.child_with_index(0));
//! let mut client = Client::new(
//!     network,
//!     VirtualTime::new(),
//!     ClientParams::new(Proposal::Prop241),
//!     rng.child_with_index(1),
//! );
//! let report = run_simulation(&mut client, &DriverConfig::default());
//! assert!(report.attempts > 0);
//! ```

mod driver;
mod rng;
mod time;

pub use driver::{
    run_simulation, DriverConfig, SimulationReport, DEFAULT_ATTEMPTS_PER_SUBPERIOD,
    DEFAULT_ATTEMPT_INTERVAL_SECS, DEFAULT_CHURN_EVERY, DEFAULT_PERIODS, DEFAULT_SUBPERIODS,
};
pub use rng::SimulationRng;
pub use time::{RealTime, TimeSource, VirtualTime};

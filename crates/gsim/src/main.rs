use std::borrow::Cow;

use clap::Parser;
use guardsim::{
    client::Client,
    network::{adversary::Adversary, SimNetwork, SimulatedNetwork},
    simulation::{run_simulation, SimulationRng, VirtualTime},
};

mod config;

use crate::config::Config;

const CLIENT_RNG_STREAM: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Configuration error: {0}")]
    MissConfiguration(Cow<'static, str>),
}

fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();
    guardsim::config::set_logger(config.log_level);

    let params = config.client.clone().build()?;
    let seed = config.seed.unwrap_or_else(rand::random);
    let rng = SimulationRng::new(seed);
    let network_config = config.simulation.network_config(&rng)?;
    let adversaries = config.simulation.adversaries()?;
    tracing::info!(
        seed,
        total_relays = network_config.total_relays,
        proposal = ?params.proposal,
        ?adversaries,
        "Starting simulation"
    );

    let total_relays = network_config.total_relays;
    let base: Box<dyn SimulatedNetwork> =
        Box::new(SimNetwork::new(network_config, rng.child_with_index(0)));
    let network = Adversary::wrap_all(&adversaries, base, &rng);
    let mut client = Client::new(
        network,
        VirtualTime::new(),
        params,
        rng.child_with_index(CLIENT_RNG_STREAM),
    );
    let report = run_simulation(&mut client, &config.driver);

    if config.json {
        let output = serde_json::json!({
            "seed": seed,
            "total_relays": total_relays,
            "adversaries": adversaries,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

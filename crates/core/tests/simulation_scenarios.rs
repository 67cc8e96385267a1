//! Whole runs of the simulation against adversarial networks.

use guardsim::{
    client::{Client, NetworkBelief, Pool},
    config::{ClientParams, Proposal},
    network::{adversary::Adversary, GroundTruth, NetworkConfig, SimNetwork, SimulatedNetwork},
    simulation::{run_simulation, DriverConfig, SimulationRng, VirtualTime},
};
use testresult::TestResult;

type SimClient = Client<Box<dyn SimulatedNetwork>, VirtualTime>;

/// Relays that never flap or leave, so outcomes only reflect the adversaries.
fn stable_network(total_relays: usize) -> NetworkConfig {
    NetworkConfig {
        total_relays,
        relay_reliability: 1.0,
        mean_removals: 0.0,
        ..Default::default()
    }
}

fn client(
    seed: u64,
    network: NetworkConfig,
    stack: &[Adversary],
    params: ClientParams,
) -> SimClient {
    let rng = SimulationRng::new(seed);
    let base: Box<dyn SimulatedNetwork> =
        Box::new(SimNetwork::new(network, rng.child_with_index(0)));
    let network = Adversary::wrap_all(stack, base, &rng);
    Client::new(network, VirtualTime::new(), params, rng.child_with_index(100))
}

#[test_log::test]
fn healthy_network_always_connects() -> TestResult {
    let mut client = client(
        1,
        stable_network(500),
        &[],
        ClientParams::new(Proposal::Prop241),
    );
    let report = run_simulation(&mut client, &DriverConfig::default());

    assert!(!report.gave_up());
    assert_eq!(report.attempts, DriverConfig::default().total_attempts());
    assert_eq!(report.successes, report.attempts);
    assert_eq!(report.final_belief, NetworkBelief::Reachable);
    assert_eq!(report.stats.utopic_guards_added, 1);
    assert_eq!(report.stats.dystopic_guards_added, 0);
    Ok(())
}

#[test]
fn prop241_behind_firewall_settles_on_dystopic_guards() -> TestResult {
    let mut client = client(
        2,
        stable_network(300),
        &[Adversary::RestrictiveFirewall],
        ClientParams::new(Proposal::Prop241),
    );
    let report = run_simulation(&mut client, &DriverConfig::default());

    assert!(!report.gave_up());
    assert_eq!(report.final_belief, NetworkBelief::PossiblyCensored);
    assert_eq!(report.stats.utopic_guards_added, 3);
    assert!(report.stats.dystopic_guards_added >= 1);
    assert!(report.success_ratio > 0.9, "ratio {}", report.success_ratio);
    for guard in client.guards(Pool::Dystopic).iter() {
        assert!(guard.relay().seems_dystopic());
    }
    Ok(())
}

#[test]
fn prop259_behind_firewall_fails_over() -> TestResult {
    let params = ClientParams {
        guard_fraction_utopic: 0.01,
        guard_fraction_dystopic: 0.01,
        ..ClientParams::new(Proposal::Prop259)
    };
    let mut client = client(3, stable_network(300), &[Adversary::RestrictiveFirewall], params);
    assert_eq!(client.guards_threshold(Pool::Utopic), 3);

    let report = run_simulation(&mut client, &DriverConfig::default());
    assert!(!report.gave_up());
    assert_eq!(report.final_belief, NetworkBelief::PossiblyCensored);
    assert_eq!(report.stats.utopic_guards_added, 3);
    assert!(report.stats.recovery_probes > 0);
    assert!(report.success_ratio > 0.9, "ratio {}", report.success_ratio);
    Ok(())
}

#[test]
fn prop259_defaults_fail_over_on_large_firewalled_network() -> TestResult {
    let params = ClientParams::new(Proposal::Prop259);
    let too_many = params.too_many_guards;
    let mut client = client(8, stable_network(1_000), &[Adversary::RestrictiveFirewall], params);
    assert!(client.guards_threshold(Pool::Utopic) >= too_many);

    let report = run_simulation(&mut client, &DriverConfig::default());
    assert!(!report.gave_up());
    assert_eq!(report.final_belief, NetworkBelief::PossiblyCensored);
    assert_eq!(report.stats.utopic_guards_added, too_many - 1);
    assert!(report.success_ratio > 0.9, "ratio {}", report.success_ratio);
    Ok(())
}

#[test]
fn prop259_concludes_network_down_when_nothing_connects() -> TestResult {
    let params = ClientParams {
        guard_fraction_utopic: 0.01,
        guard_fraction_dystopic: 0.01,
        ..ClientParams::new(Proposal::Prop259)
    };
    let mut client = client(
        4,
        stable_network(300),
        &[Adversary::Flaky { reliability: 0.0 }],
        params,
    );
    let report = run_simulation(&mut client, &DriverConfig::default());

    assert!(!report.gave_up());
    assert_eq!(report.successes, 0);
    assert_eq!(report.final_belief, NetworkBelief::Down);
    // recovery probes back off, so most attempts never reach the network
    assert!(report.stats.probes < report.attempts / 10);
    Ok(())
}

#[test]
fn targeted_denial_only_spares_hostile_guards() -> TestResult {
    let mut client = client(
        5,
        stable_network(400),
        &[Adversary::TargetedDenial {
            kill_probability: 1.0,
        }],
        ClientParams::new(Proposal::Prop241),
    );
    let report = run_simulation(&mut client, &DriverConfig::default());

    let network = client.network();
    for pool in [Pool::Utopic, Pool::Dystopic] {
        for guard in client.guards(pool).iter() {
            if network.is_hostile(guard.id()) {
                assert!(network.is_truly_up(guard.id()));
            } else if guard.marked_up() {
                assert!(!network.is_truly_up(guard.id()));
            }
        }
    }
    if !report.gave_up() {
        let settled = [Pool::Utopic, Pool::Dystopic].into_iter().any(|pool| {
            client
                .guards(pool)
                .iter()
                .any(|g| g.marked_up() && network.is_hostile(g.id()))
        });
        assert!(settled, "client kept running without a hostile guard");
    }
    Ok(())
}

#[test]
fn stacked_adversaries_degrade_but_do_not_break_runs() -> TestResult {
    let mut client = client(
        6,
        NetworkConfig {
            total_relays: 1_000,
            ..Default::default()
        },
        &[
            Adversary::RestrictiveFirewall,
            Adversary::Flaky { reliability: 0.7 },
        ],
        ClientParams::new(Proposal::Prop241),
    );
    let report = run_simulation(&mut client, &DriverConfig::default());

    assert!(report.attempts > 0);
    assert!(report.success_ratio < 1.0);
    assert!(report.stats.successful_probes < report.stats.probes);
    for pool in [Pool::Utopic, Pool::Dystopic] {
        let list = client.guards(pool);
        let mut ids: Vec<_> = list.iter().map(|g| g.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), list.len());
    }
    Ok(())
}

#[test]
fn same_seed_replays_identically() -> TestResult {
    let stack = [
        Adversary::SelectiveFiltering {
            block_probability: 0.5,
        },
        Adversary::TargetedDenial {
            kill_probability: 0.3,
        },
    ];
    let config = DriverConfig {
        periods: 5,
        ..Default::default()
    };
    let run = |seed| {
        let mut client = client(
            seed,
            NetworkConfig {
                total_relays: 250,
                ..Default::default()
            },
            &stack,
            ClientParams::new(Proposal::Prop259),
        );
        run_simulation(&mut client, &config)
    };

    let first = run(77);
    let again = run(77);
    assert_eq!(first, again);
    assert_eq!(serde_json::to_string(&first)?, serde_json::to_string(&again)?);
    Ok(())
}

//! End-to-end scenarios: the harness against the reference subject and echo
//! peer.
//!
//! Every trial gets its own port block so trials can run in parallel.

use std::future::Future;
use std::time::Instant;

use funcheck::{
    Action, AddressFamily, BadTarget, Encoding, FailureKind, HarnessConfig, Ports, RandomWalk,
    Scenario, ScenarioError, StateMachine, run_scenario,
};
use funcheck_mpipe::Launch;
use libtest_mimic::{Arguments, Failed, Trial};
use owo_colors::OwoColorize;

const SUBJECT: &str = env!("CARGO_BIN_EXE_funcheck-subject");
const ECHO: &str = env!("CARGO_BIN_EXE_funcheck-echo");

/// First main port; trial `n` uses `BASE_PORT + 10 * n` and the three below it.
const BASE_PORT: u16 = 24010;

fn config(slot: u16) -> HarnessConfig {
    let mut config = HarnessConfig::new(SUBJECT, ECHO)
        .with_ports(Ports::descending_from(BASE_PORT + 10 * slot))
        .with_families(vec![AddressFamily::V4]);
    config.launch = Launch::Direct;
    config
}

fn init_main() -> Action {
    Action::InitMain {
        encoding: Encoding::Plain,
        shutdown_mode: false,
    }
}

fn send_to_peer(config: &HarnessConfig) -> Action {
    Action::SendMessage {
        family: AddressFamily::V4,
        port: config.ports.peer,
    }
}

/// Run `steps` on a fresh scenario, then tear it down; the first error wins.
async fn run_steps(
    config: HarnessConfig,
    steps: impl FnOnce(&HarnessConfig) -> Vec<Action>,
) -> Result<Scenario, ScenarioError> {
    let actions = steps(&config);
    let mut scenario = Scenario::initial_state(config);
    let mut result = Ok(());
    for action in &actions {
        if let Err(e) = scenario.execute(action).await {
            result = Err(e);
            break;
        }
    }
    let teardown = scenario.teardown().await;
    result.and(teardown).map(|()| scenario)
}

async fn ping_42(slot: u16) -> Result<(), Failed> {
    run_steps(config(slot), |_| vec![init_main(), Action::Ping42]).await?;
    Ok(())
}

async fn ping_is_idempotent(slot: u16) -> Result<(), Failed> {
    run_steps(config(slot), |config| {
        let mut steps = vec![init_main(), Action::Ping42];
        steps.push(send_to_peer(config));
        steps.extend([Action::Ping42, Action::CheckMessages, Action::Ping42, Action::Ping42]);
        steps
    })
    .await?;
    Ok(())
}

async fn send_without_peer_then_check(slot: u16) -> Result<(), Failed> {
    let config = config(slot);
    let mut scenario = Scenario::initial_state(config.clone());
    scenario.execute(&init_main()).await?;
    scenario.execute(&send_to_peer(&config)).await?;
    if !scenario.state().timeout_pending() {
        return Err("sending without a peer must leave a timeout pending".into());
    }
    if scenario.state().open_messages().len() != 1 {
        return Err("the dispatched message must be open".into());
    }

    scenario.execute(&Action::CheckMessages).await?;
    if scenario.state().timeout_pending() || !scenario.state().open_messages().is_empty() {
        return Err(format!("check left state behind: {:?}", scenario.state()).into());
    }
    scenario.teardown().await?;
    Ok(())
}

async fn empty_fuzz_then_ping(slot: u16) -> Result<(), Failed> {
    run_steps(config(slot), |_| {
        vec![
            init_main(),
            Action::FuzzMainPort { chunks: Vec::new() },
            Action::Ping42,
        ]
    })
    .await?;
    Ok(())
}

async fn garbage_fuzz_then_ping(slot: u16) -> Result<(), Failed> {
    run_steps(config(slot), |_| {
        vec![
            init_main(),
            Action::FuzzMainPort {
                chunks: vec![vec![0xff; 64], b"\x00\x00\x00\x10garbage".to_vec(), Vec::new()],
            },
            Action::Ping42,
        ]
    })
    .await?;
    Ok(())
}

async fn peer_send_check_teardown(slot: u16) -> Result<(), Failed> {
    let scenario = run_steps(config(slot), |config| {
        vec![
            init_main(),
            Action::InitPeer {
                encoding: Encoding::Plain,
            },
            send_to_peer(config),
            send_to_peer(config),
            Action::CheckMessages,
        ]
    })
    .await?;
    if !scenario.state().peer_ready() {
        return Err("peer must be ready".into());
    }
    Ok(())
}

async fn bad_targets_time_out(slot: u16) -> Result<(), Failed> {
    run_steps(config(slot), |config| {
        vec![
            init_main(),
            Action::SendMessageBadTarget {
                family: AddressFamily::V4,
                port: config.ports.dead,
                target: BadTarget::DeadListener,
            },
            Action::CheckMessages,
            Action::InitPeer {
                encoding: Encoding::Plain,
            },
            Action::SendMessageBadTarget {
                family: AddressFamily::V4,
                port: config.ports.unbound,
                target: BadTarget::Unbound,
            },
            send_to_peer(config),
            Action::CheckMessages,
        ]
    })
    .await?;
    Ok(())
}

async fn shutdown_mode(slot: u16) -> Result<(), Failed> {
    let config = config(slot).with_shutdown_mode(true);
    run_steps(config, |config| {
        vec![
            Action::InitMain {
                encoding: Encoding::Encrypted,
                shutdown_mode: true,
            },
            Action::FuzzMainPort {
                chunks: vec![b"idle".to_vec()],
            },
            Action::ShutdownConnections {
                only_connections: true,
            },
            send_to_peer(config),
            Action::ShutdownConnections {
                only_connections: false,
            },
            Action::CheckMessages,
            Action::Ping42,
        ]
    })
    .await?;
    Ok(())
}

async fn illegal_actions_are_misuse(slot: u16) -> Result<(), Failed> {
    let config = config(slot);
    let mut scenario = Scenario::initial_state(config.clone());

    let early = scenario.execute(&Action::Ping42).await;
    expect_kind(early, FailureKind::ProtocolMisuse)?;

    scenario.execute(&init_main()).await?;
    let twice = scenario.execute(&init_main()).await;
    expect_kind(twice, FailureKind::ProtocolMisuse)?;

    let shutdown = scenario
        .execute(&Action::ShutdownConnections {
            only_connections: false,
        })
        .await;
    expect_kind(shutdown, FailureKind::ProtocolMisuse)?;

    scenario.execute(&Action::Ping42).await?;
    scenario.teardown().await?;
    Ok(())
}

async fn missing_subject_is_environment(slot: u16) -> Result<(), Failed> {
    let mut config = config(slot);
    config.subject = "/nonexistent/funcheck-subject".into();
    let mut scenario = Scenario::initial_state(config);

    let result = scenario.execute(&init_main()).await;
    expect_kind(result, FailureKind::Environment)?;
    scenario.teardown().await?;
    Ok(())
}

async fn init_main_fixes_shutdown_mode(slot: u16) -> Result<(), Failed> {
    let config = config(slot).with_shutdown_mode(true);
    let mut scenario = Scenario::initial_state(config);
    scenario.execute(&init_main()).await?;
    if scenario.state().shutdown_mode() {
        return Err("subject started without shutdown support".into());
    }

    let shutdown = scenario
        .execute(&Action::ShutdownConnections {
            only_connections: true,
        })
        .await;
    expect_kind(shutdown, FailureKind::ProtocolMisuse)?;

    scenario.execute(&Action::Ping42).await?;
    scenario.teardown().await?;
    Ok(())
}

async fn teardown_twice(slot: u16) -> Result<(), Failed> {
    let mut scenario = Scenario::initial_state(config(slot));
    scenario.execute(&init_main()).await?;
    scenario.execute(&Action::Ping42).await?;
    scenario.teardown().await?;
    let offered = scenario.legal_actions();
    if !offered.is_empty() {
        return Err(format!("actions offered after teardown: {offered:?}").into());
    }

    scenario.teardown().await?;
    expect_kind(scenario.execute(&Action::Ping42).await, FailureKind::ProtocolMisuse)?;
    Ok(())
}

/// No process in group `pgid` is left, zombies included.
fn group_is_gone(pgid: u32) -> bool {
    let Ok(pgid) = i32::try_from(pgid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence.
    let rc = unsafe { libc::kill(-pgid, 0) };
    rc == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

async fn subject_crash_still_releases_everything(slot: u16) -> Result<(), Failed> {
    let config = config(slot);
    let mut scenario = Scenario::initial_state(config.clone());
    scenario.execute(&init_main()).await?;
    scenario
        .execute(&Action::InitPeer {
            encoding: Encoding::Plain,
        })
        .await?;

    let subject = scenario.subject_pid().ok_or("subject has no pid")?;
    let peer = scenario.peer_pid().ok_or("peer has no pid")?;
    let subject = i32::try_from(subject).map_err(|e| format!("subject pid: {e}"))?;
    // SAFETY: plain kill(2) on a child we spawned and have not reaped.
    if unsafe { libc::kill(subject, libc::SIGKILL) } != 0 {
        return Err(format!("kill subject: {}", std::io::Error::last_os_error()).into());
    }

    expect_kind(scenario.teardown().await, FailureKind::ProcessExited)?;
    if !group_is_gone(peer) {
        return Err(format!("peer group {peer} survived teardown").into());
    }
    if let Err(e) = tokio::net::TcpListener::bind(("127.0.0.1", config.ports.dead)).await {
        return Err(format!("dead listener port {} still taken: {e}", config.ports.dead).into());
    }

    scenario.teardown().await?;
    Ok(())
}

async fn random_walk(slot: u16, seed: u64) -> Result<(), Failed> {
    let config = config(slot);
    let walk = RandomWalk::new(seed, 30).with_limits(&config.fuzz);
    let mut scenario = Scenario::initial_state(config);
    let trace = run_scenario(&mut scenario, walk).await;
    match trace.failure {
        None => Ok(()),
        Some(failure) => Err(format!(
            "seed {seed} failed at {:?} ({}): {}\nactions: {:?}",
            failure.step,
            failure.error.kind(),
            failure.error,
            trace.actions
        )
        .into()),
    }
}

fn expect_kind(result: Result<(), ScenarioError>, kind: FailureKind) -> Result<(), Failed> {
    match result {
        Err(e) if e.kind() == kind => Ok(()),
        Err(e) => Err(format!("expected {kind}, got {} ({e})", e.kind()).into()),
        Ok(()) => Err(format!("expected {kind}, got success").into()),
    }
}

fn trial<F, Fut>(name: &'static str, slot: u16, scenario: F) -> Trial
where
    F: FnOnce(u16) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Failed>>,
{
    Trial::test(name, move || {
        let start = Instant::now();
        eprintln!("{} {name} (ports from {})", "[harn]".cyan(), BASE_PORT + 10 * slot);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to create runtime: {e}"))?;
        let result = rt.block_on(scenario(slot));

        eprintln!(
            "{} {name} finished in {:.3}s",
            "[harn]".cyan(),
            start.elapsed().as_secs_f64()
        );
        result
    })
}

fn main() {
    let args = Arguments::from_args();

    let mut trials = vec![
        trial("ping_42", 0, ping_42),
        trial("ping_is_idempotent", 1, ping_is_idempotent),
        trial("send_without_peer_then_check", 2, send_without_peer_then_check),
        trial("empty_fuzz_then_ping", 3, empty_fuzz_then_ping),
        trial("garbage_fuzz_then_ping", 4, garbage_fuzz_then_ping),
        trial("peer_send_check_teardown", 5, peer_send_check_teardown),
        trial("bad_targets_time_out", 6, bad_targets_time_out),
        trial("shutdown_mode", 7, shutdown_mode),
        trial("illegal_actions_are_misuse", 8, illegal_actions_are_misuse),
        trial("missing_subject_is_environment", 9, missing_subject_is_environment),
        trial("init_main_fixes_shutdown_mode", 14, init_main_fixes_shutdown_mode),
        trial("teardown_twice", 15, teardown_twice),
        trial(
            "subject_crash_still_releases_everything",
            16,
            subject_crash_still_releases_everything,
        ),
    ];
    for (i, seed) in [1u64, 2, 3, 42].into_iter().enumerate() {
        let slot = 10 + i as u16;
        let name: &'static str = match i {
            0 => "random_walk_seed_1",
            1 => "random_walk_seed_2",
            2 => "random_walk_seed_3",
            _ => "random_walk_seed_42",
        };
        trials.push(trial(name, slot, move |slot| random_walk(slot, seed)));
    }

    libtest_mimic::run(&args, trials).exit();
}

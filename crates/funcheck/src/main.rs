//! funcheck: run random-walk scenarios against a subject binary.
//!
//! # Usage
//!
//! ```bash
//! funcheck --subject ./funcheck-subject --peer ./funcheck-echo --scenarios 20 --steps 40
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, ValueEnum};
use funcheck::{
    AddressFamily, HarnessConfig, Ports, RandomWalk, Scenario, ScenarioReport, StateMachine,
    run_scenario,
};
use funcheck_mpipe::Launch;

#[derive(Parser, Debug)]
#[command(name = "funcheck")]
#[command(about = "Model-based conformance and fuzz harness")]
struct Args {
    /// Subject binary: `<main_port> <encoding> <shutdown_flag> <synchronous_flag>`
    #[arg(long, env = "FUNCHECK_SUBJECT", default_value = "funcheck-subject")]
    subject: PathBuf,

    /// Echo peer binary: `<peer_port> <encoding>`
    #[arg(long, env = "FUNCHECK_PEER", default_value = "funcheck-echo")]
    peer: PathBuf,

    /// Number of scenarios to run
    #[arg(long, default_value_t = 10)]
    scenarios: u64,

    /// Steps per scenario, before teardown
    #[arg(long, default_value_t = 50)]
    steps: usize,

    /// Seed of the first scenario; scenario `i` uses `seed + i`
    #[arg(long, env = "FUNCHECK_SEED")]
    seed: Option<u64>,

    /// Subject port; peer, dead listener and unbound ports count down from it
    #[arg(long, default_value_t = 2998)]
    port: u16,

    /// Require the subject to support dropping idle connections
    #[arg(long)]
    shutdown_mode: bool,

    /// Tell the subject not to check delivery results itself
    #[arg(long)]
    asynchronous: bool,

    /// Launch mode (direct, memcheck, replay); defaults to MPP_MC / MPP_RR
    #[arg(long)]
    launch: Option<Launch>,

    /// Address families to dispatch to (repeatable)
    #[arg(long = "family", value_delimiter = ',')]
    families: Vec<AddressFamily>,

    /// Stop after the first failing scenario
    #[arg(long)]
    fail_fast: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = HarnessConfig::new(&args.subject, &args.peer)
        .with_ports(Ports::descending_from(args.port))
        .with_shutdown_mode(args.shutdown_mode);
    config.synchronous = !args.asynchronous;
    if let Some(launch) = args.launch {
        config.launch = launch;
    }
    if !args.families.is_empty() {
        config.families = args.families.clone();
    }

    let seed = args.seed.unwrap_or_else(seed_from_clock);
    tracing::info!(seed, scenarios = args.scenarios, steps = args.steps, "starting");

    let mut all_passed = true;
    for i in 0..args.scenarios {
        let seed = seed.wrapping_add(i);
        let report = run_one(&config, seed, args.steps)?;
        all_passed &= report.passed;

        match args.format {
            Format::Text => print!("{}", report.render_text()),
            Format::Json => println!("{}", report.render_json()?),
        }

        if !report.passed && args.fail_fast {
            break;
        }
    }
    Ok(all_passed)
}

fn run_one(
    config: &HarnessConfig,
    seed: u64,
    steps: usize,
) -> Result<ScenarioReport, std::io::Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let walk = RandomWalk::new(seed, steps).with_limits(&config.fuzz);
    let mut scenario = Scenario::initial_state(config.clone());
    let trace = rt.block_on(run_scenario(&mut scenario, walk));
    Ok(ScenarioReport::from_trace(seed, trace))
}

fn seed_from_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

//! xtask: Development tasks for funcheck
//!
//! Run with: `cargo xtask <command>`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for funcheck")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (unit, shadow-state properties, end-to-end scenarios)
    Test,
    /// Fuzz the shadow state with bolero
    Fuzz {
        /// Target to fuzz; without one the harness runs once in test mode
        target: Option<String>,
    },
    /// Run random scenarios against the reference subject
    Check {
        #[arg(long, default_value_t = 20)]
        scenarios: u32,
        #[arg(long)]
        seed: Option<u64>,
        /// Launch mode for subject and peer (direct, memcheck, replay)
        #[arg(long, default_value = "direct")]
        launch: String,
    },
    /// Run clippy on all code
    Clippy,
    /// Check formatting
    Fmt {
        /// Fix formatting issues instead of just checking
        #[arg(long)]
        fix: bool,
    },
}

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn workspace_root() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let manifest_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?.join("xtask"),
    };
    manifest_dir
        .parent()
        .map(PathBuf::from)
        .ok_or_else(|| "xtask has no parent directory".into())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    let root = workspace_root()?;
    sh.change_dir(&root);

    match cli.command {
        Commands::Test => {
            println!("=== Running workspace tests ===");

            if cmd!(sh, "cargo nextest --version").quiet().run().is_ok() {
                println!("Using cargo-nextest");
                cmd!(sh, "cargo nextest run --workspace").run()?;
                // nextest skips doctests
                cmd!(sh, "cargo test --workspace --doc").run()?;
            } else {
                println!("cargo-nextest not found, using cargo test");
                cmd!(sh, "cargo test --workspace").run()?;
            }

            println!("\n=== All tests passed ===");
        }
        Commands::Fuzz { target } => {
            if let Some(t) = target {
                println!("=== Fuzzing target: {t} ===");
                println!("Press Ctrl+C to stop.\n");

                if cmd!(sh, "cargo bolero --version").quiet().run().is_err() {
                    eprintln!("cargo-bolero not found. Install with:");
                    eprintln!("  cargo install cargo-bolero");
                    return Err("cargo-bolero not installed".into());
                }

                cmd!(sh, "cargo bolero test {t} --package funcheck").run()?;
            } else {
                println!("=== Running the shadow-state harness in test mode ===");
                println!("(For real fuzzing: cargo xtask fuzz shadow_state_walks)\n");
                cmd!(sh, "cargo test --package funcheck --test shadow_state").run()?;
            }
        }
        Commands::Check {
            scenarios,
            seed,
            launch,
        } => {
            println!("=== Building the reference subject ===");
            cmd!(sh, "cargo build --package funcheck-subject --package funcheck").run()?;

            let bin = root.join("target").join("debug");
            let subject = bin.join("funcheck-subject");
            let peer = bin.join("funcheck-echo");
            let funcheck = bin.join("funcheck");
            let scenarios = scenarios.to_string();
            let seed: Vec<String> = seed
                .map(|s| vec!["--seed".to_string(), s.to_string()])
                .unwrap_or_default();

            println!("\n=== Running {scenarios} scenarios ({launch}) ===");
            cmd!(
                sh,
                "{funcheck} --subject {subject} --peer {peer} --scenarios {scenarios} --launch {launch} {seed...}"
            )
            .run()?;
        }
        Commands::Clippy => {
            println!("=== Running clippy ===");
            cmd!(
                sh,
                "cargo clippy --workspace --all-targets --all-features -- -D warnings"
            )
            .run()?;
        }
        Commands::Fmt { fix } => {
            if fix {
                println!("=== Fixing formatting ===");
                cmd!(sh, "cargo fmt --all").run()?;
            } else {
                println!("=== Checking formatting ===");
                cmd!(sh, "cargo fmt --all -- --check").run()?;
            }
        }
    }

    Ok(())
}

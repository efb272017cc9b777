//! funcheck-echo: the cooperating peer; echoes every byte back.

use std::process::ExitCode;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "funcheck-echo")]
#[command(about = "Echo peer for the funcheck harness")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Encoding selector (0/1), accepted for compatibility
    #[arg(default_value = "0")]
    encoding: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    tracing::debug!(encoding = %args.encoding, "echo peer starting");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(funcheck_subject::echo::run(args.port)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "echo peer failed");
            ExitCode::FAILURE
        }
    }
}

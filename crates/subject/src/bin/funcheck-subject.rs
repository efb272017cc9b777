//! funcheck-subject: reference subject for the funcheck harness.
//!
//! # Usage
//!
//! ```bash
//! funcheck-subject 2998 0 0 1
//! ```
//!
//! Control commands arrive on stdin, replies go to stdout; logs go to stderr.

use std::process::ExitCode;

use clap::Parser;
use funcheck_subject::SubjectConfig;

#[derive(Parser, Debug)]
#[command(name = "funcheck-subject")]
#[command(about = "Reference subject for the funcheck harness")]
struct Args {
    /// Port to listen on (1025..=65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1025..))]
    listen_port: u16,

    /// Always encrypt (0/1)
    #[arg(value_parser = parse_flag, action = clap::ArgAction::Set)]
    encrypt: bool,

    /// Expect shutdown-connections commands (0/1)
    #[arg(value_parser = parse_flag, action = clap::ArgAction::Set)]
    expect_shutdown: bool,

    /// Check delivery results to a ready peer (0/1)
    #[arg(value_parser = parse_flag, action = clap::ArgAction::Set)]
    synchronous: bool,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("`{other}` must be boolean (0/1)")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = SubjectConfig::new(
        args.listen_port,
        args.encrypt,
        args.expect_shutdown,
        args.synchronous,
    );

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

    match rt.block_on(funcheck_subject::subject::run(config)) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "subject failed");
            ExitCode::FAILURE
        }
    }
}

mod app;
mod cli;
mod commands;
mod exit_codes;
mod output;
mod prompt;

use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    app::run()
}

//! Top-level CLI driver (spec §4.10 ambient concern): parses argv, builds
//! an [`AppContext`], and hands off to [`commands::dispatch`]. Mirrors the
//! corpus's `app::run`, minus the dev-seed / TUI / color-detection concerns
//! that don't apply to a headless vault CLI.

use std::process::ExitCode;

use clap::Parser;

use crate::{cli, commands, output};

pub struct AppContext {
    pub output_mode: output::OutputMode,
}

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();
    let ctx = AppContext { output_mode: output::OutputMode { json: cli.json } };

    let Some(command) = cli.command else {
        let mut cmd = <cli::Cli as clap::CommandFactory>::command();
        cmd.print_help().expect("help to be printed");
        println!();
        return ExitCode::SUCCESS;
    };

    commands::dispatch(command, &ctx)
}

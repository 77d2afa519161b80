mod account;
mod init;
mod migrate;
mod user;

use std::process::ExitCode;

use towervault::vault::Vault;

use crate::app::AppContext;
use crate::{cli, exit_codes, prompt};

/// Resolve the vault path, prompt for a password, and open it — v2 if
/// `--user` was given, legacy v1 otherwise. Every account/user subcommand
/// shares this since each CLI invocation opens, mutates, saves, and exits
/// (no persistent session across invocations).
fn open(open_args: &cli::OpenArgs) -> Result<Vault, ExitCode> {
    let path = towervault::config::vault_path(open_args.path.path.as_deref()).map_err(|error| {
        eprintln!("Error: {error}");
        exit_codes::exit_code_for_vault_error(&error)
    })?;

    let password = prompt::prompt_password("Password: ").map_err(|error| {
        eprintln!("Error: {error}");
        ExitCode::from(exit_codes::EXIT_USAGE)
    })?;

    match &open_args.user {
        Some(username) => Vault::open_v2(&path, username, &password, None).map_err(|error| {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }),
        None => Vault::open_v1(&path, &password).map_err(|error| {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }),
    }
}

pub fn dispatch(command: cli::Commands, ctx: &AppContext) -> ExitCode {
    match command {
        cli::Commands::Path(args) => init::path(args, ctx),
        cli::Commands::Init(args) => init::init(args, ctx),
        cli::Commands::Account(cmd) => account::run(cmd, ctx),
        cli::Commands::User(cmd) => user::run(cmd, ctx),
        cli::Commands::Migrate(args) => migrate::run(args, ctx),
    }
}

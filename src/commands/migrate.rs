use std::process::ExitCode;

use serde_json::json;
use towervault::policy::VaultSecurityPolicy;
use towervault::vault::Vault;

use crate::app::AppContext;
use crate::{cli, exit_codes, output, prompt};

pub fn run(args: cli::MigrateArgs, ctx: &AppContext) -> ExitCode {
    let vault_path = match towervault::config::vault_path(args.path.path.as_deref()) {
        Ok(path) => path,
        Err(error) => {
            eprintln!("Error: {error}");
            return exit_codes::exit_code_for_vault_error(&error);
        }
    };

    let old_password = match prompt::prompt_password("Current vault password: ") {
        Ok(pw) => pw,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(exit_codes::EXIT_USAGE);
        }
    };

    let vault = match Vault::open_v1(&vault_path, &old_password) {
        Ok(v) => v,
        Err(error) => {
            eprintln!("Error: {error}");
            return exit_codes::exit_code_for_vault_error(&error);
        }
    };

    let admin_password = match prompt::prompt_new_password("New administrator password: ") {
        Ok(pw) => pw,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(exit_codes::EXIT_USAGE);
        }
    };

    let mut vault = match vault.migrate_v1_to_v2(&args.admin, &admin_password, VaultSecurityPolicy::default(), None) {
        Ok(v) => v,
        Err(error) => {
            eprintln!("Error: {error}");
            return exit_codes::exit_code_for_vault_error(&error);
        }
    };

    match vault.save() {
        Ok(()) => output::print_value(
            vault_path.display().to_string(),
            json!({ "kind": "vault-migrate", "path": vault_path.display().to_string(), "admin": args.admin }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

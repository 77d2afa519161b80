use std::process::ExitCode;

use serde_json::json;
use towervault::policy::VaultSecurityPolicy;
use towervault::vault::{FecOptions, Vault};

use crate::app::AppContext;
use crate::{cli, exit_codes, output, prompt};

pub fn path(args: cli::PathArgs, ctx: &AppContext) -> ExitCode {
    match towervault::config::vault_path(args.path.as_deref()) {
        Ok(path) => output::print_value(
            path.display().to_string(),
            json!({ "kind": "vault-path", "path": path.display().to_string() }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

pub fn init(args: cli::InitArgs, ctx: &AppContext) -> ExitCode {
    let vault_path = match towervault::config::vault_path(args.path.path.as_deref()) {
        Ok(path) => path,
        Err(error) => {
            eprintln!("Error: {error}");
            return exit_codes::exit_code_for_vault_error(&error);
        }
    };

    if vault_path.exists() {
        eprintln!("Error: a vault already exists at {}", vault_path.display());
        return ExitCode::from(exit_codes::EXIT_USAGE);
    }

    if args.v2 {
        let Some(admin) = args.admin else {
            eprintln!("Error: --admin is required with --v2");
            return ExitCode::from(exit_codes::EXIT_USAGE);
        };

        let password = match prompt::prompt_new_password("Administrator password: ") {
            Ok(pw) => pw,
            Err(error) => {
                eprintln!("Error: {error}");
                return ExitCode::from(exit_codes::EXIT_USAGE);
            }
        };

        match Vault::create_v2(&vault_path, &admin, &password, VaultSecurityPolicy::default(), None, FecOptions::default()) {
            Ok(_vault) => output::print_value(
                vault_path.display().to_string(),
                json!({ "kind": "vault-init", "version": 2, "path": vault_path.display().to_string(), "admin": admin }),
                &ctx.output_mode,
            ),
            Err(error) => {
                eprintln!("Error: {error}");
                exit_codes::exit_code_for_vault_error(&error)
            }
        }
    } else {
        let password = match prompt::prompt_new_password("Vault password: ") {
            Ok(pw) => pw,
            Err(error) => {
                eprintln!("Error: {error}");
                return ExitCode::from(exit_codes::EXIT_USAGE);
            }
        };

        match Vault::create_v1(&vault_path, &password) {
            Ok(_vault) => output::print_value(
                vault_path.display().to_string(),
                json!({ "kind": "vault-init", "version": 1, "path": vault_path.display().to_string() }),
                &ctx.output_mode,
            ),
            Err(error) => {
                eprintln!("Error: {error}");
                exit_codes::exit_code_for_vault_error(&error)
            }
        }
    }
}

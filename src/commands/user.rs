use std::process::ExitCode;

use serde_json::json;
use towervault::format::v2::Role;

use crate::app::AppContext;
use crate::{cli, exit_codes, output, prompt};

pub fn run(cmd: cli::UserCommands, ctx: &AppContext) -> ExitCode {
    match cmd {
        cli::UserCommands::List(args) => list(args, ctx),
        cli::UserCommands::Add(args) => add(args, ctx),
        cli::UserCommands::Rm(args) => rm(args, ctx),
        cli::UserCommands::Passwd(args) => passwd(args, ctx),
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Administrator => "administrator",
        Role::Standard => "standard",
    }
}

fn list(args: cli::OpenArgs, ctx: &AppContext) -> ExitCode {
    if args.user.is_none() {
        eprintln!("Error: user management requires --user (a v2 session)");
        return ExitCode::from(exit_codes::EXIT_USAGE);
    }

    let vault = match super::open(&args) {
        Ok(v) => v,
        Err(code) => return code,
    };

    match vault.list_users() {
        Ok(users) => {
            let value = users
                .iter()
                .map(|u| format!("{}  {}{}", u.username, role_str(u.role), if u.must_change_password { "  (must change password)" } else { "" }))
                .collect::<Vec<_>>()
                .join("\n");
            let meta = json!({
                "kind": "user-list",
                "users": users.iter().map(|u| json!({
                    "username": u.username,
                    "role": role_str(u.role),
                    "must_change_password": u.must_change_password,
                })).collect::<Vec<_>>(),
            });
            output::print_value(value, meta, &ctx.output_mode)
        }
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn add(args: cli::AddUserArgs, ctx: &AppContext) -> ExitCode {
    let mut vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let temp_password = match prompt::prompt_new_password("Temporary password for the new user: ") {
        Ok(pw) => pw,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(exit_codes::EXIT_USAGE);
        }
    };

    let role = match args.role {
        cli::RoleArg::Administrator => Role::Administrator,
        cli::RoleArg::Standard => Role::Standard,
    };

    if let Err(error) = vault.add_user(&args.new_username, &temp_password, role, None) {
        eprintln!("Error: {error}");
        return exit_codes::exit_code_for_vault_error(&error);
    }

    match vault.save() {
        Ok(()) => output::print_value(
            args.new_username.clone(),
            json!({ "kind": "user-add", "username": args.new_username }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn rm(args: cli::RemoveUserArgs, ctx: &AppContext) -> ExitCode {
    let mut vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    if let Err(error) = vault.remove_user(&args.target_username) {
        eprintln!("Error: {error}");
        return exit_codes::exit_code_for_vault_error(&error);
    }

    match vault.save() {
        Ok(()) => output::print_value(
            args.target_username.clone(),
            json!({ "kind": "user-rm", "username": args.target_username }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn passwd(args: cli::PasswdArgs, ctx: &AppContext) -> ExitCode {
    let mut vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let caller = args.open.user.clone();
    let target = args.target.clone().or_else(|| caller.clone()).unwrap_or_default();
    let is_self = caller.as_deref() == Some(target.as_str());

    let old_password = if is_self {
        match prompt::prompt_password("Current password: ") {
            Ok(pw) => Some(pw),
            Err(error) => {
                eprintln!("Error: {error}");
                return ExitCode::from(exit_codes::EXIT_USAGE);
            }
        }
    } else {
        None
    };

    let new_password = match prompt::prompt_new_password("New password: ") {
        Ok(pw) => pw,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(exit_codes::EXIT_USAGE);
        }
    };

    if let Err(error) = vault.change_password(&target, old_password.as_deref(), &new_password, None) {
        eprintln!("Error: {error}");
        return exit_codes::exit_code_for_vault_error(&error);
    }

    match vault.save() {
        Ok(()) => output::print_value(target.clone(), json!({ "kind": "user-passwd", "username": target }), &ctx.output_mode),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

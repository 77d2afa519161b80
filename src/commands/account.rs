use std::process::ExitCode;

use serde_json::json;
use towervault::record::AccountRecord;

use crate::app::AppContext;
use crate::{cli, exit_codes, output, prompt};

pub fn run(cmd: cli::AccountCommands, ctx: &AppContext) -> ExitCode {
    match cmd {
        cli::AccountCommands::List(args) => list(args, ctx),
        cli::AccountCommands::Get(args) => get(args, ctx),
        cli::AccountCommands::Add(args) => add(args, ctx),
        cli::AccountCommands::Rm(args) => rm(args, ctx),
    }
}

fn record_json(record: &AccountRecord) -> serde_json::Value {
    json!({
        "id": record.id.to_string(),
        "name": record.name,
        "username": record.username,
        "email": record.email,
        "url": record.url,
        "tags": record.tags,
        "favorite": record.favorite,
    })
}

fn list(args: cli::OpenArgs, ctx: &AppContext) -> ExitCode {
    let vault = match super::open(&args) {
        Ok(v) => v,
        Err(code) => return code,
    };

    match vault.list_accounts() {
        Ok(records) => {
            let value = records.iter().map(|r| format!("{}  {}", r.id, r.name)).collect::<Vec<_>>().join("\n");
            let meta = json!({ "kind": "account-list", "count": records.len(), "accounts": records.iter().map(|r| record_json(r)).collect::<Vec<_>>() });
            output::print_value(value, meta, &ctx.output_mode)
        }
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn get(args: cli::GetArgs, ctx: &AppContext) -> ExitCode {
    let vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    match vault.get_account(args.id) {
        Ok(record) => output::print_value(
            format!("{}: {} <{}> {}", record.name, record.username, record.email, record.url),
            json!({ "kind": "account-get", "account": record_json(record) }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn add(args: cli::AddArgs, ctx: &AppContext) -> ExitCode {
    let mut vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let secret = match args.secret {
        Some(s) => s,
        None => match prompt::prompt_password("Account password: ") {
            Ok(s) => s,
            Err(error) => {
                eprintln!("Error: {error}");
                return ExitCode::from(exit_codes::EXIT_USAGE);
            }
        },
    };

    let mut record = AccountRecord::new(args.name, 0);
    record.username = args.username.unwrap_or_default();
    record.email = args.email.unwrap_or_default();
    record.url = args.url.unwrap_or_default();
    record.password = secret;
    record.notes = args.notes.unwrap_or_default();
    record.set_tags(args.tags);
    let id = record.id;

    if let Err(error) = vault.upsert_account(record) {
        eprintln!("Error: {error}");
        return exit_codes::exit_code_for_vault_error(&error);
    }

    match vault.save() {
        Ok(()) => output::print_value(id.to_string(), json!({ "kind": "account-add", "id": id.to_string() }), &ctx.output_mode),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

fn rm(args: cli::GetArgs, ctx: &AppContext) -> ExitCode {
    let mut vault = match super::open(&args.open) {
        Ok(v) => v,
        Err(code) => return code,
    };

    if let Err(error) = vault.delete_account(args.id) {
        eprintln!("Error: {error}");
        return exit_codes::exit_code_for_vault_error(&error);
    }

    match vault.save() {
        Ok(()) => output::print_value(
            args.id.to_string(),
            json!({ "kind": "account-rm", "id": args.id.to_string() }),
            &ctx.output_mode,
        ),
        Err(error) => {
            eprintln!("Error: {error}");
            exit_codes::exit_code_for_vault_error(&error)
        }
    }
}

//! Output formatting (spec §4.10 ambient concern): plain text by default,
//! `{"value": ..., "meta": ...}` JSON when `--json` is passed. Mirrors the
//! corpus's `output::print_value`, minus its clipboard integration — nothing
//! in this vault's surface produces a value worth copying out of band.

use std::process::ExitCode;

use serde_json::json;

pub struct OutputMode {
    pub json: bool,
}

pub fn print_value(value: String, meta: serde_json::Value, mode: &OutputMode) -> ExitCode {
    if mode.json {
        println!("{}", json!({ "value": value, "meta": meta }));
    } else {
        println!("{value}");
    }
    ExitCode::SUCCESS
}

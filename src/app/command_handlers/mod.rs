use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::load_settings;
use crate::config::Settings;

pub mod audit;
pub mod requests;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }
    let settings = load_settings()?;
    run_cli_with_settings(&args, &settings)
}

pub fn run_cli_with_settings(args: &[String], settings: &Settings) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Requests => requests::cmd_requests(&args[1..], settings),
        CliVerb::Status => requests::cmd_status(&args[1..], settings),
        CliVerb::Counts => requests::cmd_counts(&args[1..], settings),
        CliVerb::Facets => requests::cmd_facets(&args[1..], settings),
        CliVerb::Items => requests::cmd_items(&args[1..], settings),
        CliVerb::Job => requests::cmd_job(&args[1..], settings),
        CliVerb::History => audit::cmd_history(&args[1..], settings),
        CliVerb::VerifyAudit => audit::cmd_verify_audit(&args[1..], settings),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

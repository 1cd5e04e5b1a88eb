#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Requests,
    Status,
    Counts,
    Facets,
    Items,
    Job,
    History,
    VerifyAudit,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "requests" => CliVerb::Requests,
        "status" => CliVerb::Status,
        "counts" => CliVerb::Counts,
        "facets" => CliVerb::Facets,
        "items" => CliVerb::Items,
        "job" => CliVerb::Job,
        "history" => CliVerb::History,
        "verify-audit" => CliVerb::VerifyAudit,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  requests                             List remediation requests".to_string(),
        "  status <request_id>                  Show request status and role assignment"
            .to_string(),
        "  counts <request_id>                  Show not reviewed/accepted/declined totals"
            .to_string(),
        "  facets <request_id> <dimension>      Group counts by size, extension or age"
            .to_string(),
        "  items <request_id> [review_status]   List review items".to_string(),
        "  job <request_id>                     Show the execution job".to_string(),
        "  history <request_id>                 Print the audit trail".to_string(),
        "  verify-audit <request_id>            Recompute the audit digest chain".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}

use crate::app::command_support::{
    encode_json, open_engine, render_timestamps, require_args, to_value,
};
use crate::config::Settings;
use crate::governance::{FacetDimension, ReviewStatus};
use crate::shared::time::now_secs;
use serde_json::{Map, Value};

const REQUEST_TIME_FIELDS: &[&str] = &["createdAt", "updatedAt"];

pub fn cmd_requests(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 0, "requests")?;
    let engine = open_engine(settings)?;
    let mut rows = Vec::new();
    for request in engine.requests().map_err(|e| e.to_string())? {
        let mut value = to_value(&request, "request")?;
        render_timestamps(&mut value, REQUEST_TIME_FIELDS);
        rows.push(value);
    }
    encode_json(&rows, "requests")
}

pub fn cmd_status(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 1, "status <request_id>")?;
    let engine = open_engine(settings)?;
    let request = engine.request(&args[0]).map_err(|e| e.to_string())?;
    let assignment = engine
        .role_assignment(&args[0])
        .map_err(|e| e.to_string())?;

    let mut value = to_value(&request, "request")?;
    render_timestamps(&mut value, REQUEST_TIME_FIELDS);
    if let Value::Object(map) = &mut value {
        map.insert(
            "roleAssignment".to_string(),
            to_value(&assignment, "role assignment")?,
        );
    }
    encode_json(&value, "request status")
}

pub fn cmd_counts(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 1, "counts <request_id>")?;
    let engine = open_engine(settings)?;
    let counts = engine.counts(&args[0]).map_err(|e| e.to_string())?;
    encode_json(&counts, "counts")
}

pub fn cmd_facets(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(
        args,
        2,
        "facets <request_id> <size|extension|modified_time|access_time|created_time>",
    )?;
    let dimension = FacetDimension::parse(&args[1])?;
    let engine = open_engine(settings)?;
    let facets = engine
        .facets(&args[0], dimension, now_secs())
        .map_err(|e| e.to_string())?;
    encode_json(&facets, "facets")
}

pub fn cmd_items(args: &[String], settings: &Settings) -> Result<String, String> {
    if args.is_empty() || args.len() > 2 {
        return Err("usage: items <request_id> [not_reviewed|accepted|declined]".to_string());
    }
    let status = args.get(1).map(|raw| ReviewStatus::parse(raw)).transpose()?;
    let engine = open_engine(settings)?;
    let mut rows = Vec::new();
    for item in engine.items(&args[0], status).map_err(|e| e.to_string())? {
        let mut value = to_value(&item, "review item")?;
        render_timestamps(&mut value, &["decidedAt"]);
        rows.push(value);
    }
    encode_json(&rows, "review items")
}

pub fn cmd_job(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 1, "job <request_id>")?;
    let engine = open_engine(settings)?;
    match engine.job(&args[0]).map_err(|e| e.to_string())? {
        Some(job) => {
            let mut value = to_value(&job, "execution job")?;
            render_timestamps(&mut value, &["submittedAt", "completedAt"]);
            encode_json(&value, "execution job")
        }
        None => {
            let mut value = Map::new();
            value.insert("requestId".to_string(), Value::String(args[0].clone()));
            value.insert("job".to_string(), Value::Null);
            encode_json(&value, "execution job")
        }
    }
}

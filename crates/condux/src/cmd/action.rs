use serde_json::Value;
use tracing::info;

use crate::cmd::{connect, one_shot_client, parse_duration, parse_json, shutdown, ActionArgs};
use crate::exit::{client_error, CliResult, SUCCESS};

pub async fn run(args: ActionArgs) -> CliResult<i32> {
    let limit = parse_duration(&args.timeout)?;
    let payload = match &args.json {
        Some(json) => parse_json("--json", json)?,
        None => Value::Null,
    };

    let client = one_shot_client(&args.url, limit);
    connect(&client, limit).await?;

    client
        .action(args.name.as_str())
        .dispatch(payload)
        .map_err(|err| client_error("dispatch failed", err))?;
    info!(action = %args.name, url = %args.url, "action dispatched");

    shutdown(&client).await;
    Ok(SUCCESS)
}

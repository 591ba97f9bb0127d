use condux_client::ClientError;

use crate::cmd::{connect, one_shot_client, parse_duration, parse_json, shutdown, RequestArgs};
use crate::exit::{client_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, EventRecord, OutputFormat};

pub async fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = parse_duration(&args.timeout)?;
    let constraints = parse_json("--json", &args.json)?;

    let client = one_shot_client(&args.url, limit);
    let channel = client
        .register_topic(&args.topic)
        .map_err(|err| client_error("register failed", err))?;
    connect(&client, limit).await?;

    let outcome = channel.request(constraints).await;
    shutdown(&client).await;

    match outcome {
        Ok(response) => {
            print_event(&EventRecord::new(&args.topic, "response").with_payload(response), format);
            Ok(SUCCESS)
        }
        // The server's error body is the useful output here.
        Err(ClientError::Remote { topic, payload }) => {
            print_event(&EventRecord::new(topic, "error").with_payload(payload), format);
            Ok(FAILURE)
        }
        Err(err) => Err(client_error("request failed", err)),
    }
}

use condux_client::{Client, ClientConfig, Handlers, LifecycleHooks, Persistence};
use condux_transport::WebSocketTransport;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::{connect, parse_duration, shutdown, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_event, EventRecord, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let (exhausted_tx, mut exhausted) = mpsc::unbounded_channel();
    let hooks = LifecycleHooks::new()
        .on_disconnect(|| warn!("connection lost; reconnecting"))
        .on_reconnect(|| info!("reconnected"))
        .on_timeout(move || {
            let _ = exhausted_tx.send(());
        });
    let config = ClientConfig::default().with_persistence(Persistence::default().with_hooks(hooks));
    let client = Client::with_config(WebSocketTransport::new(args.url.as_str()), config);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    for topic in &args.topics {
        let channel = client
            .register_topic(topic)
            .map_err(|err| client_error("register failed", err))?;
        channel.add_listener(record_events(topic, events_tx.clone()));
    }
    drop(events_tx);

    connect(&client, connect_timeout).await?;
    info!(url = %args.url, topics = args.topics.len(), "listening");

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            Some(()) = exhausted.recv() => {
                shutdown(&client).await;
                return Err(CliError::new(TRANSPORT_ERROR, "reconnection attempts exhausted"));
            }
            record = events.recv() => {
                let Some(record) = record else { break };
                print_event(&record, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    shutdown(&client).await;
    Ok(SUCCESS)
}

/// Listener callbacks that forward every channel event as an output record.
fn record_events(topic: &str, tx: mpsc::UnboundedSender<EventRecord>) -> Handlers {
    let (connection_tx, message_tx, close_tx, error_tx) = (tx.clone(), tx.clone(), tx.clone(), tx);
    let (t1, t2, t3, t4) = (
        topic.to_string(),
        topic.to_string(),
        topic.to_string(),
        topic.to_string(),
    );
    Handlers::new()
        .on_connection(move |data| {
            let _ = connection_tx.send(EventRecord::new(&t1, "connection").with_data(data.clone()));
        })
        .on_message(move |message, data| {
            let record = EventRecord::new(&t2, "message")
                .with_payload(message.clone())
                .with_data(data.clone());
            let _ = message_tx.send(record);
        })
        .on_close(move || {
            let _ = close_tx.send(EventRecord::new(&t3, "close"));
        })
        .on_error(move |payload| {
            let _ = error_tx.send(EventRecord::new(&t4, "error").with_payload(payload.clone()));
        })
}

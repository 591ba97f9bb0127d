use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One line of `listen` or `request` output.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub topic: String,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: String,
}

impl EventRecord {
    pub fn new(topic: impl Into<String>, event: &'static str) -> Self {
        Self {
            topic: topic.into(),
            event,
            payload: None,
            data: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub fn print_event(record: &EventRecord, format: OutputFormat) {
    println!("{}", render_event(record, format));
}

pub fn render_event(record: &EventRecord, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TOPIC", "EVENT", "PAYLOAD", "DATA"])
                .add_row(vec![
                    record.topic.clone(),
                    record.event.to_string(),
                    preview(record.payload.as_ref()),
                    preview(record.data.as_ref()),
                ]);
            table.to_string()
        }
        OutputFormat::Pretty => {
            let mut line = format!("[{}] {}", record.topic, record.event);
            if let Some(payload) = &record.payload {
                line.push_str(&format!(" payload={payload}"));
            }
            if let Some(data) = &record.data {
                line.push_str(&format!(" data={data}"));
            }
            line
        }
    }
}

fn preview(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

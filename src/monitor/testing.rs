//! Test helpers: a scripted log source and event fixtures

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::instance::MonitoredInstance;
use super::log_source::{FilterRequest, LogEventsPage, LogSource, RawLogEvent, SourceError};

const MYSQL57: &str = include_str!("../utils/testdata/mysql57.json");

type Responder =
    Box<dyn Fn(&FilterRequest) -> Option<Result<LogEventsPage, SourceError>> + Send + Sync>;

/// In-memory source; a `None` response never completes
pub struct ScriptedSource {
    responder: Responder,
    requests: Mutex<Vec<FilterRequest>>,
}

impl ScriptedSource {
    pub fn new(
        responder: impl Fn(&FilterRequest) -> Option<Result<LogEventsPage, SourceError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        ScriptedSource {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FilterRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LogSource for Arc<ScriptedSource> {
    fn filter_log_events(
        &self,
        request: &FilterRequest,
    ) -> impl Future<Output = Result<LogEventsPage, SourceError>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let response = (self.responder)(request);
        async move {
            match response {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::seconds(secs)
}

pub fn instance(name: &str) -> MonitoredInstance {
    MonitoredInstance {
        region: "us-east-1".to_string(),
        instance: name.to_string(),
        resource_id: format!("db-{name}"),
        logs_endpoint: "http://127.0.0.1:8080".to_string(),
        ..Default::default()
    }
}

/// mysql57 document rewritten for instance `name` at `at(secs)`
pub fn message(name: &str, secs: i64) -> String {
    let mut doc: Value = serde_json::from_str(MYSQL57).unwrap();
    doc["instanceID"] = Value::from(name);
    doc["instanceResourceID"] = Value::from(format!("db-{name}"));
    doc["timestamp"] = Value::from(at(secs).to_rfc3339());
    doc.to_string()
}

pub fn event(name: &str, secs: i64) -> RawLogEvent {
    RawLogEvent {
        log_stream_name: format!("db-{name}"),
        timestamp: at(secs).timestamp_millis(),
        ingestion_time: at(secs + 2).timestamp_millis(),
        message: message(name, secs),
        event_id: format!("{name}-{secs}"),
    }
}

pub fn page(events: Vec<RawLogEvent>, next_token: Option<&str>) -> LogEventsPage {
    LogEventsPage {
        events,
        next_token: next_token.map(str::to_string),
    }
}

use super::{LogSource, SourceError};
use crate::domain::{LogEvent, Severity};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

// Journal fields folded into the canonical event keys
const MESSAGE: &str = "MESSAGE";
const PRIORITY: &str = "PRIORITY";
const REALTIME_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";
const CURSOR: &str = "__CURSOR";

// Tried in order to name the emitting program
const SOURCE_FIELDS: [&str; 3] = ["SYSLOG_IDENTIFIER", "_COMM", "_SYSTEMD_UNIT"];

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub journalctl_path: PathBuf,
    pub unit: Option<String>,
    pub identifier: Option<String>,
    pub since: Option<String>,
    /// Backlog entries shown on the first open; 0 means only new entries
    pub lines: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journalctl_path: PathBuf::from("journalctl"),
            unit: None,
            identifier: None,
            since: None,
            lines: 0,
        }
    }
}

/// One parsed line of `journalctl --output=json`.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub event: LogEvent,
    pub cursor: Option<String>,
}

/// Decodes a journal field value.
///
/// journald emits plain strings, byte arrays for non-UTF-8 data, arrays for
/// repeated fields and `null` for oversized ones.
fn field_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) if items.iter().all(Value::is_u64) => {
            let bytes: Vec<u8> = items
                .iter()
                .filter_map(Value::as_u64)
                .map(|b| b as u8)
                .collect();
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(field_to_string).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

fn parse_timestamp(fields: &Map<String, Value>) -> DateTime<Utc> {
    fields
        .get(REALTIME_TIMESTAMP)
        .and_then(field_to_string)
        .and_then(|micros| micros.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_micros)
        .unwrap_or_else(Utc::now)
}

pub fn parse_journal_line(line: &str) -> Result<JournalRecord, SourceError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(SourceError::Malformed(
            "expected a JSON object".to_string(),
        ));
    };

    let timestamp = parse_timestamp(&fields);

    let source = SOURCE_FIELDS
        .iter()
        .find_map(|key| fields.get(*key).and_then(field_to_string))
        .unwrap_or_else(|| "unknown".to_string());

    let severity = fields
        .get(PRIORITY)
        .and_then(field_to_string)
        .and_then(|p| p.parse::<Severity>().ok())
        .unwrap_or_default();

    let message = fields
        .get(MESSAGE)
        .and_then(field_to_string)
        .unwrap_or_default();

    let cursor = fields.get(CURSOR).and_then(field_to_string);

    let raw: BTreeMap<String, String> = fields
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), MESSAGE | PRIORITY | REALTIME_TIMESTAMP | CURSOR))
        .filter_map(|(key, value)| field_to_string(value).map(|v| (key.clone(), v)))
        .collect();

    let mut event = LogEvent::new(timestamp, source, severity, message);
    event.fields = raw;

    Ok(JournalRecord { event, cursor })
}

/// Follows the system journal through a `journalctl` child process.
///
/// The last seen cursor is remembered so a reopen resumes right after the
/// last delivered entry.
#[derive(Debug)]
pub struct JournalctlSource {
    config: JournalConfig,
    child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    cursor: Option<String>,
}

impl JournalctlSource {
    pub fn new(config: JournalConfig) -> Self {
        Self {
            config,
            child: None,
            lines: None,
            cursor: None,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "--follow".to_string(),
            "--output=json".to_string(),
            "--no-pager".to_string(),
        ];

        if let Some(unit) = &self.config.unit {
            args.push(format!("--unit={unit}"));
        }
        if let Some(identifier) = &self.config.identifier {
            args.push(format!("--identifier={identifier}"));
        }

        // A cursor supersedes the initial window.
        if let Some(cursor) = &self.cursor {
            args.push(format!("--after-cursor={cursor}"));
        } else {
            if let Some(since) = &self.config.since {
                args.push(format!("--since={since}"));
            }
            args.push(format!("--lines={}", self.config.lines));
        }

        args
    }

    async fn close(&mut self) {
        self.lines = None;
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.kill().await
        {
            debug!("journalctl already exited: {}", e);
        }
    }
}

impl LogSource for JournalctlSource {
    async fn open(&mut self) -> Result<(), SourceError> {
        self.close().await;

        let program = self.config.journalctl_path.display().to_string();
        let args = self.command_args();
        debug!("Spawning {} {:?}", program, args);

        let mut child = Command::new(&self.config.journalctl_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::Io(std::io::Error::other("journalctl stdout was not captured"))
        })?;

        self.lines = Some(BufReader::new(stdout).lines());
        self.child = Some(child);

        info!(
            "Following journal via {} (resume cursor: {})",
            program,
            self.cursor.is_some()
        );
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<LogEvent>, SourceError> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(SourceError::NotOpen);
        };

        loop {
            let Some(line) = lines.next_line().await? else {
                self.close().await;
                return Ok(None);
            };

            if line.trim().is_empty() {
                continue;
            }

            match parse_journal_line(&line) {
                Ok(record) => {
                    if record.cursor.is_some() {
                        self.cursor = record.cursor;
                    }
                    return Ok(Some(record.event));
                }
                Err(e) => {
                    warn!("Skipping journal line: {}", e);
                }
            }
        }
    }
}

//! Append-only JSONL event log, one file per `(namespace, taskID)`.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::json;

use super::ACPEvent;

const INITIAL_BUFFER: usize = 64 * 1024;
const MAX_LINE: usize = 1024 * 1024;

pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(acp_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: acp_dir.into().join("events.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn write(&self, event: &ACPEvent) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create acp directory")?;
        }
        let mut line = serde_json::to_vec(event).context("failed to serialize event")?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open event log {}", self.path.display()))?;
        file.write_all(&line)
            .context("failed to append to event log")?;
        Ok(())
    }

    /// Reads every valid event plus a trailing `_warning` pseudo-event if any
    /// lines failed to decode. The file itself is never modified.
    pub fn read_all(&self) -> Result<Vec<ACPEvent>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("failed to open event log"),
        };

        let mut reader = BufReader::with_capacity(INITIAL_BUFFER, file);
        let mut events = Vec::new();
        let mut skipped = 0u64;

        loop {
            let mut line = String::new();
            let bytes_read = read_bounded_line(&mut reader, &mut line)?;
            if bytes_read == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ACPEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            events.push(ACPEvent {
                timestamp: 0,
                kind: "_warning".to_string(),
                session_id: String::new(),
                payload: Some(json!({ "message": format!("skipped {} malformed lines", skipped) })),
            });
        }

        Ok(events)
    }
}

/// Reads one line, bounded to `MAX_LINE` bytes, into `buf`. Returns the
/// number of bytes read (0 at EOF). A line that would exceed the cap is
/// treated as malformed: its bytes up to the cap are returned so the caller
/// counts it as a skipped line rather than hanging forever on an unbounded
/// read.
fn read_bounded_line(reader: &mut impl BufRead, buf: &mut String) -> Result<usize> {
    let mut total = 0usize;
    let mut raw = Vec::new();
    loop {
        let available = reader.fill_buf().context("failed to read event log")?;
        if available.is_empty() {
            break;
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            raw.extend_from_slice(&available[..=pos]);
            total += pos + 1;
            reader.consume(pos + 1);
            break;
        } else {
            let len = available.len();
            raw.extend_from_slice(available);
            total += len;
            reader.consume(len);
            if raw.len() > MAX_LINE {
                break;
            }
        }
    }
    *buf = String::from_utf8_lossy(&raw).into_owned();
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_all_round_trips() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        log.write(&ACPEvent {
            timestamp: 1,
            kind: "started".into(),
            session_id: "s1".into(),
            payload: None,
        })
        .unwrap();
        log.write(&ACPEvent {
            timestamp: 2,
            kind: "finished".into(),
            session_id: "s1".into(),
            payload: None,
        })
        .unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "started");
        assert_eq!(events[1].kind, "finished");
    }

    #[test]
    fn malformed_line_is_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            b"{\"ts\":1,\"type\":\"a\",\"session_id\":\"s\"}\nnot json\n{\"ts\":2,\"type\":\"b\",\"session_id\":\"s\"}\n",
        )
        .unwrap();

        let log = EventLog::new(dir.path());
        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].kind, "_warning");
        assert!(
            events[2]
                .payload
                .as_ref()
                .unwrap()
                .get("message")
                .unwrap()
                .as_str()
                .unwrap()
                .contains("1 malformed")
        );
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        assert!(log.read_all().unwrap().is_empty());
    }
}

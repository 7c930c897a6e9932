use crate::prelude::*;

use chrono::{Local, SecondsFormat};
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Fault,
    State,
    Comm,
    System,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Fault => "FAULT",
            Self::State => "STATE",
            Self::Comm => "COMM",
            Self::System => "SYSTEM",
        };
        write!(f, "{}", kind)
    }
}

/// Append-only journal of discrete events, independent of the rate-limited
/// measurement stream. Every call appends one whole line; the handle is
/// held open in append mode behind a mutex so concurrent writers never
/// interleave partial lines.
#[derive(Clone)]
pub struct EventJournal {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl EventJournal {
    pub fn new(directory: &Path) -> Result<Self, LogIoError> {
        std::fs::create_dir_all(directory).map_err(|source| LogIoError::Create {
            path: directory.to_path_buf(),
            source,
        })?;

        let path = directory.join("events.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogIoError::Create {
                path: path.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            {
                error!(
                    "failed to set permissions on event journal {}: {}",
                    path.display(),
                    e
                );
            }
        }

        info!("event journal at {}", path.display());

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append one event line. I/O failures are logged and swallowed here;
    /// journalling must never take down the telemetry path that feeds it.
    pub fn record(&self, kind: EventKind, message: &str, payload: Option<serde_json::Value>) {
        let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);

        let mut line = format!("{} [{}] {}", stamp, kind, message);
        if let Some(payload) = payload {
            line.push_str(&format!(" | {}", payload));
        }

        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!(
                        "failed to append to event journal {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
            Err(_) => error!("event journal lock poisoned, event lost"),
        }

        info!("event: [{}] {}", kind, message);
    }

    /// Journal the active fault set plus the raw code for correlation
    /// with the CSV stream.
    pub fn record_fault(&self, fault_code: FaultCode) {
        self.record(
            EventKind::Fault,
            &format!("Fault detected: {}", fault_code.descriptions().join(", ")),
            Some(json!({ "code": format!("{:#x}", fault_code.bits()) })),
        );
    }

    /// Journal a state transition using the same symbolic names the CSV
    /// stream uses.
    pub fn record_state_change(&self, old: InverterState, new: InverterState) {
        self.record(
            EventKind::State,
            &format!("State change: {} -> {}", old, new),
            None,
        );
    }
}

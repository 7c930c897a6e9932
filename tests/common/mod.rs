#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inverter_monitor::prelude::*;
use inverter_monitor::transport::RegisterTransport;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Transport double fed from a script of read results. Reads pop the
/// front of the script; an exhausted script reads as a dead link. Writes
/// are recorded for assertion.
pub struct ScriptedTransport {
    reads: Mutex<VecDeque<Result<Vec<u16>, TransportError>>>,
    writes: Mutex<Vec<(u16, u16)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn queue_read(&self, regs: Vec<u16>) {
        self.reads.lock().unwrap().push_back(Ok(regs));
    }

    pub fn queue_error(&self, err: TransportError) {
        self.reads.lock().unwrap().push_back(Err(err));
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegisterTransport for ScriptedTransport {
    async fn read_registers(&self, _base: u16, _count: u16) -> Result<Vec<u16>, TransportError> {
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Disconnected))
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError> {
        self.writes.lock().unwrap().push((address, value));
        Ok(())
    }
}

pub struct Factory;

impl Factory {
    /// Register block for a healthy running inverter.
    pub fn block() -> Vec<u16> {
        Self::block_with(0x0705, 0, 0)
    }

    pub fn block_with(status: u16, fault_low: u16, fault_high: u16) -> Vec<u16> {
        vec![
            status, fault_low, fault_high, 5000, 200, 500, 23000, 100, 1000, 50, 5000, 950, 250,
            800, 9650, 8200,
        ]
    }

    pub fn measurement() -> Measurement {
        Measurement::from_registers(&Self::block(), chrono::Local::now()).unwrap()
    }

    /// Config pointed at a scratch directory, tuned for fast tests.
    pub fn config(dir: &Path) -> Config {
        Config {
            inverter: inverter_monitor::config::Inverter {
                host: "127.0.0.1".to_string(),
                port: 502,
                unit_id: 1,
                register_base: 0,
                poll_interval_ms: 50,
            },
            logging: inverter_monitor::config::Logging {
                enabled: true,
                directory: dir.display().to_string(),
                file_prefix: "test_log".to_string(),
                interval_ms: 0,
                max_file_size_mb: 100,
            },
            events: inverter_monitor::config::Events {
                directory: dir.display().to_string(),
            },
            loglevel: "info".to_string(),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// All CSV files in `dir`, sorted by name (creation order, given the
/// timestamped naming).
pub fn csv_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    files
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Total data rows (excluding headers) across all CSV files in `dir`.
pub fn data_row_count(dir: &Path) -> usize {
    csv_files(dir)
        .iter()
        .map(|path| read_lines(path).len().saturating_sub(1))
        .sum()
}

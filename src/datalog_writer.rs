use crate::prelude::*;

use chrono::{DateTime, Local, SecondsFormat};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long the worker sleeps in an empty receive before re-checking the
/// stop flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Fixed CSV header; row fields are written in exactly this order.
pub const CSV_HEADER: &str = "timestamp,state,fault_code,vdc_v,idc_a,pdc_w,vac_v,iac_a,pac_w,\
qac_var,frequency_hz,power_factor,temp_heatsink_c,temp_mosfet_c,efficiency_pct,soc_pct,\
pll_locked,grid_connected,bms_valid";

#[derive(Debug, Clone)]
pub enum ChannelData {
    Sample(QueuedSample),
    Shutdown,
}

/// A measurement in flight to the logger worker. Ownership transfers on
/// enqueue; the producer keeps no handle to it.
#[derive(Debug, Clone)]
pub struct QueuedSample {
    pub queued_at: DateTime<Local>,
    pub measurement: Measurement,
}

impl QueuedSample {
    pub fn new(measurement: Measurement) -> Self {
        Self {
            queued_at: Local::now(),
            measurement,
        }
    }
}

// LogFile {{{
/// One open output file. Exclusive to the logger worker; replaced on
/// rotation, dropped on close.
#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: File,
    bytes_written: u64,
}

impl LogFile {
    fn create(directory: &Path, prefix: &str, stamp: DateTime<Local>) -> Result<Self, LogIoError> {
        std::fs::create_dir_all(directory).map_err(|source| LogIoError::Create {
            path: directory.to_path_buf(),
            source,
        })?;

        let path = directory.join(format!("{}_{}.csv", prefix, stamp.format("%Y%m%d_%H%M%S")));
        let file = File::create(&path).map_err(|source| LogIoError::Create {
            path: path.clone(),
            source,
        })?;

        let mut log_file = Self {
            path,
            file,
            bytes_written: 0,
        };
        log_file.write_line(CSV_HEADER)?;

        info!("opened new datalog file {}", log_file.path.display());
        Ok(log_file)
    }

    /// Append one line and flush, so a crash loses at most the in-flight
    /// row.
    fn write_line(&mut self, line: &str) -> Result<(), LogIoError> {
        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .map_err(|source| LogIoError::Write {
                path: self.path.clone(),
                source,
            })?;

        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }
} // }}}

/// Asynchronous CSV writer: any number of producers submit measurements,
/// a single worker persists at most one row per configured interval and
/// rotates the output file once it grows past the configured ceiling.
#[derive(Clone)]
pub struct DataLogger {
    config: ConfigWrapper,
    channels: Channels,
    running: Arc<AtomicBool>,
    file: Arc<Mutex<Option<LogFile>>>,
}

impl DataLogger {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self {
            config,
            channels,
            running: Arc::new(AtomicBool::new(false)),
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Hand a measurement to the worker. Never blocks; if the logger is
    /// not running the sample is silently discarded.
    pub fn submit(&self, measurement: Measurement) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let _ = self
            .channels
            .to_datalog
            .send(ChannelData::Sample(QueuedSample::new(measurement)));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Worker loop. Sole writer to the output file; runs until stopped.
    pub async fn start(&self) -> Result<()> {
        let logging = self.config.logging();
        if !logging.enabled() {
            info!("datalog disabled, skipping");
            return Ok(());
        }

        let mut receiver = self.channels.to_datalog.subscribe();
        self.running.store(true, Ordering::SeqCst);

        info!(
            "datalog writer started, writing to {}",
            logging.directory().display()
        );

        let interval = logging.interval();
        let mut last_row: Option<Instant> = None;

        loop {
            match tokio::time::timeout(RECV_TIMEOUT, receiver.recv()).await {
                Err(_) => {
                    // Idle; the timeout exists so a stop is noticed promptly.
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!("datalog receiver lagged, {} samples lost", n);
                }
                Ok(Ok(ChannelData::Shutdown)) => break,
                Ok(Ok(ChannelData::Sample(sample))) => {
                    // At most one row per interval; extra samples are
                    // dropped, not buffered.
                    if last_row.is_some_and(|at| at.elapsed() < interval) {
                        continue;
                    }

                    match self.persist(&sample) {
                        Ok(()) => last_row = Some(Instant::now()),
                        Err(e) => error!("dropping sample after write failure: {}", e),
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.close();
        info!("datalog writer stopped");

        Ok(())
    }

    /// Signal the worker to exit. Idempotent; safe from any context.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.channels.to_datalog.send(ChannelData::Shutdown);
    }

    /// Flush and release the current file, if any. Idempotent; the app
    /// calls this after joining the worker so the file is closed even if
    /// the worker had to be abandoned on a timeout.
    pub fn close(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(mut log_file) = guard.take() {
                if let Err(e) = log_file.file.flush() {
                    error!(
                        "failed to flush datalog file {}: {}",
                        log_file.path.display(),
                        e
                    );
                }
                info!("closed datalog file {}", log_file.path.display());
            }
        }
    }

    fn persist(&self, sample: &QueuedSample) -> Result<(), LogIoError> {
        let logging = self.config.logging();
        let mut guard = self.file.lock().unwrap();

        // Size check happens before the write, so one row may overshoot
        // the ceiling; the row after it lands in a fresh file.
        if guard
            .as_ref()
            .is_some_and(|f| f.bytes_written > logging.max_file_bytes())
        {
            let full = guard.take().unwrap();
            info!(
                "rotating datalog file {} at {} bytes",
                full.path.display(),
                full.bytes_written
            );
        }

        if guard.is_none() {
            *guard = Some(LogFile::create(
                &logging.directory(),
                logging.file_prefix(),
                sample.queued_at,
            )?);
        }

        guard.as_mut().unwrap().write_line(&csv_row(sample))
    }
}

fn csv_row(sample: &QueuedSample) -> String {
    let m = &sample.measurement;
    format!(
        "{},{},{:#x},{:.2},{:.2},{:.1},{:.2},{:.2},{:.1},{:.1},{:.3},{:.4},{:.1},{:.1},{:.2},{:.2},{},{},{}",
        sample.queued_at.to_rfc3339_opts(SecondsFormat::Millis, false),
        m.state,
        m.fault_code.bits(),
        m.vdc,
        m.idc,
        m.pdc,
        m.vac,
        m.iac,
        m.pac,
        m.qac,
        m.frequency,
        m.power_factor,
        m.temp_heatsink,
        m.temp_mosfet,
        m.efficiency,
        m.soc,
        m.pll_locked,
        m.grid_connected,
        m.bms_valid,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> QueuedSample {
        let regs: Vec<u16> = vec![
            0x0705, 0x0011, 0, 5000, 200, 500, 23000, 100, 1000, 50, 5000, 950, 250, 800, 9650,
            8200,
        ];
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        QueuedSample {
            queued_at: at,
            measurement: Measurement::from_registers(&regs, at).unwrap(),
        }
    }

    #[test]
    fn header_matches_row_order() {
        assert!(CSV_HEADER.starts_with("timestamp,state,fault_code,vdc_v"));
        assert_eq!(CSV_HEADER.split(',').count(), 19);
        assert_eq!(csv_row(&sample()).split(',').count(), 19);
    }

    #[test]
    fn row_serializes_fixed_precision_fields() {
        let row = csv_row(&sample());
        let fields: Vec<&str> = row.split(',').collect();

        assert!(fields[0].starts_with("2024-05-01T12:30:00"));
        assert_eq!(fields[1], "RunInverter");
        assert_eq!(fields[2], "0x11");
        assert_eq!(fields[3], "50.00");
        assert_eq!(fields[4], "2.00");
        assert_eq!(fields[5], "50000.0");
        assert_eq!(fields[6], "230.00");
        assert_eq!(fields[7], "1.00");
        assert_eq!(fields[8], "100000.0");
        assert_eq!(fields[9], "5000.0");
        assert_eq!(fields[10], "50.000");
        assert_eq!(fields[11], "0.9500");
        assert_eq!(fields[12], "25.0");
        assert_eq!(fields[13], "80.0");
        assert_eq!(fields[14], "96.50");
        assert_eq!(fields[15], "82.00");
        assert_eq!(fields[16], "true");
        assert_eq!(fields[17], "true");
        assert_eq!(fields[18], "true");
    }

    #[test]
    fn log_file_counts_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let mut log_file = LogFile::create(dir.path(), "unit", at).unwrap();
        assert_eq!(log_file.bytes_written, CSV_HEADER.len() as u64 + 1);

        log_file.write_line("a,b,c").unwrap();
        assert_eq!(log_file.bytes_written, CSV_HEADER.len() as u64 + 1 + 6);

        let contents = std::fs::read_to_string(&log_file.path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(lines.next(), Some("a,b,c"));
    }
}

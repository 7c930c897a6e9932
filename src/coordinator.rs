use crate::prelude::*;

use crate::datalog_writer::DataLogger;
use crate::events::{EventJournal, EventKind};
use crate::monitor::Monitor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Measurement(Measurement),
    Shutdown,
}

#[derive(Default)]
pub struct PollStats {
    pub polls_attempted: u64,
    pub polls_ok: u64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub state_changes: u64,
    pub faults_raised: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll statistics:");
        info!("  Polls attempted: {}", self.polls_attempted);
        info!("  Polls ok: {}", self.polls_ok);
        info!("  Transport errors: {}", self.transport_errors);
        info!("  Decode errors: {}", self.decode_errors);
        info!("  State changes: {}", self.state_changes);
        info!("  Faults raised: {}", self.faults_raised);
    }
}

/// Drives the poll loop: reads the inverter on a fixed cadence, fans
/// measurements out to display subscribers and the datalog writer, and
/// journals discrete transitions (state, faults, link health).
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    monitor: Arc<Monitor>,
    datalog: DataLogger,
    journal: EventJournal,
    last_status: Arc<Mutex<Option<(InverterState, FaultCode)>>>,
    link_down: Arc<AtomicBool>,
    pub stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        monitor: Monitor,
        datalog: DataLogger,
        journal: EventJournal,
    ) -> Self {
        Self {
            config,
            channels,
            monitor: Arc::new(monitor),
            datalog,
            journal,
            last_status: Arc::new(Mutex::new(None)),
            link_down: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.from_monitor.subscribe();

        let poll_interval = self.config.inverter().poll_interval();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("coordinator started, polling every {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_cycle().await,
                message = receiver.recv() => match message {
                    Ok(ChannelData::Shutdown) => break,
                    Ok(_) => (),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => (),
                },
            }
        }

        self.stats.lock().unwrap().print_summary();
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_monitor.send(ChannelData::Shutdown);
    }

    async fn poll_cycle(&self) {
        self.stats.lock().unwrap().polls_attempted += 1;

        match self.monitor.poll().await {
            Ok(measurement) => {
                self.stats.lock().unwrap().polls_ok += 1;

                if self.link_down.swap(false, Ordering::SeqCst) {
                    self.journal.record(EventKind::Comm, "link restored", None);
                }

                self.observe_transitions(&measurement);

                let _ = self
                    .channels
                    .from_monitor
                    .send(ChannelData::Measurement(measurement.clone()));
                self.datalog.submit(measurement);
            }
            Err(err) => {
                match err {
                    ReadError::Transport(_) => {
                        self.stats.lock().unwrap().transport_errors += 1;
                        // Journal the outage once, not once per poll.
                        if !self.link_down.swap(true, Ordering::SeqCst) {
                            self.journal.record(
                                EventKind::Comm,
                                &format!("poll failed: {}", err),
                                None,
                            );
                        }
                    }
                    ReadError::Decode(_) => {
                        self.stats.lock().unwrap().decode_errors += 1;
                    }
                }
                warn!("poll failed: {}", err);
            }
        }
    }

    fn observe_transitions(&self, measurement: &Measurement) {
        let mut last = self.last_status.lock().unwrap();

        match *last {
            Some((old_state, old_faults)) => {
                if old_state != measurement.state {
                    self.journal
                        .record_state_change(old_state, measurement.state);
                    self.stats.lock().unwrap().state_changes += 1;
                }

                if old_faults != measurement.fault_code {
                    if measurement.fault_code.is_empty() {
                        self.journal
                            .record(EventKind::System, "all faults cleared", None);
                    } else {
                        self.journal.record_fault(measurement.fault_code);
                        self.stats.lock().unwrap().faults_raised += 1;
                    }
                }
            }
            None => {
                // First successful poll; only a pre-existing fault is
                // worth journalling.
                if !measurement.fault_code.is_empty() {
                    self.journal.record_fault(measurement.fault_code);
                    self.stats.lock().unwrap().faults_raised += 1;
                }
            }
        }

        *last = Some((measurement.state, measurement.fault_code));
    }
}

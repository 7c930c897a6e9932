use crate::prelude::*;

use crate::register::INPUT_BLOCK_LEN;
use crate::transport::RegisterTransport;
use chrono::Local;
use std::sync::{Arc, Mutex};

/// Telemetry reader. One `poll` is one transport round-trip plus a pure
/// decode; polls are independent of each other.
pub struct Monitor {
    transport: Arc<dyn RegisterTransport>,
    register_base: u16,
    last: Mutex<Option<Measurement>>,
}

impl Monitor {
    pub fn new(transport: Arc<dyn RegisterTransport>, register_base: u16) -> Self {
        Self {
            transport,
            register_base,
            last: Mutex::new(None),
        }
    }

    /// Fetch and decode one full register block. On any failure the
    /// previously held measurement is left untouched.
    pub async fn poll(&self) -> Result<Measurement, ReadError> {
        let regs = self
            .transport
            .read_registers(self.register_base, INPUT_BLOCK_LEN as u16)
            .await?;

        let measurement = Measurement::from_registers(&regs, Local::now())?;

        *self.last.lock().unwrap() = Some(measurement.clone());

        Ok(measurement)
    }

    /// Most recent successful measurement, kept for display read-back.
    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last.lock().unwrap().clone()
    }
}

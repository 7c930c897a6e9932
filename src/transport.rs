use crate::prelude::*;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::slave::Slave;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Seam to the register link. The implementation owns framing and any
/// wire-level retry policy; callers only see register words.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn read_registers(
        &self,
        base: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError>;
}

/// Modbus/TCP client transport. One connection, one request in flight at
/// a time; the context lives behind a mutex so the monitor and control
/// paths can share it.
pub struct TcpTransport {
    ctx: Arc<Mutex<Context>>,
}

impl TcpTransport {
    pub async fn connect(host: &str, port: u16, unit_id: u8) -> Result<Self, TransportError> {
        let addr: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Request(format!("no address for {}", host)))?;

        info!("connecting to inverter at {}", addr);

        let ctx = tokio::time::timeout(CONNECT_TIMEOUT, tcp::connect_slave(addr, Slave(unit_id)))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            ctx: Arc::new(Mutex::new(ctx)),
        })
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn read_registers(
        &self,
        base: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut ctx = self.ctx.lock().await;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, ctx.read_input_registers(base, count))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Request(e.to_string()))?;

        response.map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError> {
        let mut ctx = self.ctx.lock().await;

        let response =
            tokio::time::timeout(REQUEST_TIMEOUT, ctx.write_single_register(address, value))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Request(e.to_string()))?;

        response.map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }
}

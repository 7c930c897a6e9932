pub use crate::channels::Channels;
pub use crate::config::{Config, ConfigWrapper};
pub use crate::error::{
    ControlError, DecodeError, EncodeError, LogIoError, ReadError, TransportError,
};
pub use crate::options::Options;
pub use crate::register::{FaultCode, InverterState, Measurement};

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

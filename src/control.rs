use crate::prelude::*;

use crate::register::to_unsigned;
use crate::transport::RegisterTransport;
use std::sync::Arc;

// Holding register addresses.
pub const REG_CONTROL: u16 = 0;
pub const REG_POWER_REF_P: u16 = 2;
pub const REG_POWER_REF_Q: u16 = 3;

const CONTROL_ENABLE: u16 = 0x0001;
const CONTROL_MODE_SHIFT: u16 = 4;
const CONTROL_MODE_MASK: u16 = 0x000F;

/// Writing this to the control register clears latched faults. Bit 15 is
/// outside the enable/mode layout, so it can never collide with a
/// legitimate control word.
pub const CONTROL_FAULT_CLEAR: u16 = 0x8000;

/// Build the control word: bit 0 = enable, bits 4-7 = mode.
pub fn encode_control(enable: bool, mode: u8) -> u16 {
    let enable = if enable { CONTROL_ENABLE } else { 0 };
    enable | ((mode as u16 & CONTROL_MODE_MASK) << CONTROL_MODE_SHIFT)
}

/// Convert kW / kVAr setpoints to 100 W / 100 VAr register units,
/// truncating toward zero. Values that do not fit a signed 16-bit
/// register are rejected before any write happens.
pub fn encode_power_reference(p_kw: f64, q_kvar: f64) -> Result<(u16, u16), EncodeError> {
    let p = to_reference_units(p_kw, "p_kw")?;
    let q = to_reference_units(q_kvar, "q_kvar")?;
    Ok((to_unsigned(p), to_unsigned(q)))
}

pub fn encode_fault_clear() -> u16 {
    CONTROL_FAULT_CLEAR
}

fn to_reference_units(kilo: f64, field: &'static str) -> Result<i32, EncodeError> {
    let units = (kilo * 10.0).trunc();
    if !units.is_finite() || units < i16::MIN as f64 || units > i16::MAX as f64 {
        return Err(EncodeError::OutOfRange { field, value: kilo });
    }
    Ok(units as i32)
}

/// Control writer. Encodes operator intent and hands single-register
/// writes to the transport; no retries on this side.
pub struct Control {
    transport: Arc<dyn RegisterTransport>,
}

impl Control {
    pub fn new(transport: Arc<dyn RegisterTransport>) -> Self {
        Self { transport }
    }

    pub async fn write_control(&self, enable: bool, mode: u8) -> Result<(), ControlError> {
        let word = encode_control(enable, mode);
        info!("writing control word {:#06x}", word);
        self.transport.write_register(REG_CONTROL, word).await?;
        Ok(())
    }

    pub async fn write_power_reference(
        &self,
        p_kw: f64,
        q_kvar: f64,
    ) -> Result<(), ControlError> {
        let (p, q) = encode_power_reference(p_kw, q_kvar)?;
        info!("writing power reference p={}kW q={}kVAr", p_kw, q_kvar);
        self.transport.write_register(REG_POWER_REF_P, p).await?;
        self.transport.write_register(REG_POWER_REF_Q, q).await?;
        Ok(())
    }

    pub async fn clear_faults(&self) -> Result<(), ControlError> {
        info!("sending fault clear");
        self.transport
            .write_register(REG_CONTROL, encode_fault_clear())
            .await?;
        Ok(())
    }
}

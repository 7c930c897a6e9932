use crate::prelude::*;

use bitflags::bitflags;
use chrono::{DateTime, Local};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;

/// The controller exposes one fixed block of input registers, polled in a
/// single read.
pub const INPUT_BLOCK_LEN: usize = 16;

// Status word (register 0) layout.
const STATUS_STATE_MASK: u16 = 0x000F;
const STATUS_PLL_LOCKED: u16 = 0x0100;
const STATUS_GRID_CONNECTED: u16 = 0x0200;
const STATUS_BMS_VALID: u16 = 0x0400;

// InverterState {{{
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InverterState {
    Init = 0,
    Standby = 1,
    Precharge = 2,
    Ready = 3,
    GridSync = 4,
    RunInverter = 5,
    RunRectifier = 6,
    Stopping = 7,
    Fault = 8,
    Emergency = 9,
}

impl InverterState {
    /// Operator-facing label, as shown on the front panel.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Init => "Initializing",
            Self::Standby => "Standby",
            Self::Precharge => "Pre-charging",
            Self::Ready => "Ready",
            Self::GridSync => "Grid Sync",
            Self::RunInverter => "Running (Inverter)",
            Self::RunRectifier => "Running (Rectifier)",
            Self::Stopping => "Stopping",
            Self::Fault => "FAULT",
            Self::Emergency => "EMERGENCY STOP",
        }
    }
}

impl std::fmt::Display for InverterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::Standby => "Standby",
            Self::Precharge => "Precharge",
            Self::Ready => "Ready",
            Self::GridSync => "GridSync",
            Self::RunInverter => "RunInverter",
            Self::RunRectifier => "RunRectifier",
            Self::Stopping => "Stopping",
            Self::Fault => "Fault",
            Self::Emergency => "Emergency",
        };
        write!(f, "{}", name)
    }
} // }}}

// FaultCode {{{
bitflags! {
    /// Controller fault word, spread across input registers 1 (low) and
    /// 2 (high). Bits 11, 18-19 and 27-31 are reserved; they are carried
    /// through unchanged but never rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultCode: u32 {
        const DC_OVERVOLTAGE    = 0x0000_0001;
        const DC_UNDERVOLTAGE   = 0x0000_0002;
        const DC_OVERCURRENT    = 0x0000_0004;
        const DC_GROUND_FAULT   = 0x0000_0008;

        const AC_OVERVOLTAGE    = 0x0000_0010;
        const AC_UNDERVOLTAGE   = 0x0000_0020;
        const AC_OVERCURRENT    = 0x0000_0040;
        const AC_SHORT_CIRCUIT  = 0x0000_0080;

        const OVER_FREQUENCY    = 0x0000_0100;
        const UNDER_FREQUENCY   = 0x0000_0200;
        const ANTI_ISLANDING    = 0x0000_0400;

        const OVERTEMP_MOSFET   = 0x0000_1000;
        const OVERTEMP_HEATSINK = 0x0000_2000;
        const OVERTEMP_INDUCTOR = 0x0000_4000;
        const OVERTEMP_AMBIENT  = 0x0000_8000;

        const BMS_TIMEOUT       = 0x0001_0000;
        const MODBUS_ERROR      = 0x0002_0000;

        const DESAT_DETECTED    = 0x0010_0000;
        const GATE_DRIVER       = 0x0020_0000;
        const NP_IMBALANCE      = 0x0040_0000;
        const PRECHARGE_FAIL    = 0x0080_0000;

        const ESTOP_ACTIVE      = 0x0100_0000;
        const WATCHDOG          = 0x0200_0000;
        const INTERNAL_ERROR    = 0x0400_0000;
    }
}

pub const NO_FAULTS: &str = "No Faults";

// Ordered by ascending bit value so rendered fault lists are deterministic.
const FAULT_DESCRIPTIONS: [(FaultCode, &str); 24] = [
    (FaultCode::DC_OVERVOLTAGE, "DC Over-Voltage"),
    (FaultCode::DC_UNDERVOLTAGE, "DC Under-Voltage"),
    (FaultCode::DC_OVERCURRENT, "DC Over-Current"),
    (FaultCode::DC_GROUND_FAULT, "DC Ground Fault"),
    (FaultCode::AC_OVERVOLTAGE, "AC Over-Voltage"),
    (FaultCode::AC_UNDERVOLTAGE, "AC Under-Voltage"),
    (FaultCode::AC_OVERCURRENT, "AC Over-Current"),
    (FaultCode::AC_SHORT_CIRCUIT, "Short Circuit"),
    (FaultCode::OVER_FREQUENCY, "Over-Frequency"),
    (FaultCode::UNDER_FREQUENCY, "Under-Frequency"),
    (FaultCode::ANTI_ISLANDING, "Anti-Islanding"),
    (FaultCode::OVERTEMP_MOSFET, "MOSFET Over-Temperature"),
    (FaultCode::OVERTEMP_HEATSINK, "Heatsink Over-Temperature"),
    (FaultCode::OVERTEMP_INDUCTOR, "Inductor Over-Temperature"),
    (FaultCode::OVERTEMP_AMBIENT, "Ambient Over-Temperature"),
    (FaultCode::BMS_TIMEOUT, "BMS Timeout"),
    (FaultCode::MODBUS_ERROR, "Modbus Communication Error"),
    (FaultCode::DESAT_DETECTED, "Gate Desaturation Detected"),
    (FaultCode::GATE_DRIVER, "Gate Driver Fault"),
    (FaultCode::NP_IMBALANCE, "Neutral-Point Imbalance"),
    (FaultCode::PRECHARGE_FAIL, "Precharge Failed"),
    (FaultCode::ESTOP_ACTIVE, "E-Stop Active"),
    (FaultCode::WATCHDOG, "Watchdog Reset"),
    (FaultCode::INTERNAL_ERROR, "Internal Error"),
];

impl FaultCode {
    pub const NONE: FaultCode = FaultCode::empty();

    /// Human descriptions of every defined flag present, in ascending bit
    /// order. Reserved bits are skipped; an empty set yields the single
    /// "No Faults" entry.
    pub fn descriptions(&self) -> Vec<&'static str> {
        let active: Vec<&'static str> = FAULT_DESCRIPTIONS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, text)| *text)
            .collect();

        if active.is_empty() {
            vec![NO_FAULTS]
        } else {
            active
        }
    }
} // }}}

/// Convert a raw register word to its two's-complement signed value.
pub fn to_signed(value: u16) -> i32 {
    if value >= 0x8000 {
        value as i32 - 0x10000
    } else {
        value as i32
    }
}

/// Inverse of [`to_signed`]; the caller guarantees the value fits 16 bits.
pub fn to_unsigned(value: i32) -> u16 {
    if value < 0 {
        (value + 0x10000) as u16
    } else {
        value as u16
    }
}

// Measurement {{{
/// One decoded snapshot of the inverter. Built once per successful poll
/// and never mutated afterwards; consumers clone what they keep.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: DateTime<Local>,

    pub state: InverterState,
    pub fault_code: FaultCode,
    pub pll_locked: bool,
    pub grid_connected: bool,
    pub bms_valid: bool,

    /// DC link voltage (V)
    pub vdc: f64,
    /// DC current (A)
    pub idc: f64,
    /// DC power (W)
    pub pdc: f64,

    /// AC voltage, line-to-line RMS (V)
    pub vac: f64,
    /// AC current, RMS (A)
    pub iac: f64,
    /// Active power (W)
    pub pac: f64,
    /// Reactive power (VAr)
    pub qac: f64,
    /// Grid frequency (Hz)
    pub frequency: f64,
    pub power_factor: f64,

    /// Heatsink temperature (degC)
    pub temp_heatsink: f64,
    /// MOSFET temperature (degC)
    pub temp_mosfet: f64,

    /// Conversion efficiency (%)
    pub efficiency: f64,
    /// Battery state of charge (%)
    pub soc: f64,
}

impl Measurement {
    /// Decode one full input-register block. The capture timestamp is
    /// supplied by the caller, so decoding is a pure function of its
    /// arguments.
    pub fn from_registers(
        regs: &[u16],
        captured_at: DateTime<Local>,
    ) -> Result<Self, DecodeError> {
        if regs.len() != INPUT_BLOCK_LEN {
            return Err(DecodeError::BlockLength {
                expected: INPUT_BLOCK_LEN,
                got: regs.len(),
            });
        }

        let status = regs[0];
        let state_bits = (status & STATUS_STATE_MASK) as u8;
        let state = InverterState::try_from(state_bits)
            .map_err(|_| DecodeError::InvalidState(state_bits))?;

        Ok(Self {
            timestamp: captured_at,
            state,
            fault_code: FaultCode::from_bits_retain(regs[1] as u32 | (regs[2] as u32) << 16),
            pll_locked: status & STATUS_PLL_LOCKED != 0,
            grid_connected: status & STATUS_GRID_CONNECTED != 0,
            bms_valid: status & STATUS_BMS_VALID != 0,

            vdc: to_signed(regs[3]) as f64 / 100.0,
            idc: to_signed(regs[4]) as f64 / 100.0,
            pdc: to_signed(regs[5]) as f64 * 100.0,

            vac: to_signed(regs[6]) as f64 / 100.0,
            iac: to_signed(regs[7]) as f64 / 100.0,
            pac: to_signed(regs[8]) as f64 * 100.0,
            qac: to_signed(regs[9]) as f64 * 100.0,
            frequency: regs[10] as f64 / 100.0,
            power_factor: regs[11] as f64 / 1000.0,

            temp_heatsink: to_signed(regs[12]) as f64 / 10.0,
            temp_mosfet: to_signed(regs[13]) as f64 / 10.0,

            efficiency: regs[14] as f64 / 100.0,
            soc: regs[15] as f64 / 100.0,
        })
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Vec<u16> {
        vec![
            0x0005, 0, 0, 5000, 200, 500, 23000, 100, 1000, 50, 5000, 950, 250, 800, 9650, 8200,
        ]
    }

    #[test]
    fn signed_round_trip_is_exact_for_all_words() {
        for v in 0..=u16::MAX {
            assert_eq!(to_unsigned(to_signed(v)), v);
        }
    }

    #[test]
    fn signed_boundary() {
        assert_eq!(to_signed(0x7FFF), 32767);
        assert_eq!(to_signed(0x8000), -32768);
        assert_eq!(to_signed(0xFFFF), -1);
        assert_eq!(to_unsigned(-1), 0xFFFF);
        assert_eq!(to_unsigned(-45), 65491);
    }

    #[test]
    fn decodes_running_block() {
        let m = Measurement::from_registers(&block(), Local::now()).unwrap();

        assert_eq!(m.state, InverterState::RunInverter);
        assert_eq!(m.fault_code, FaultCode::NONE);
        assert!(!m.pll_locked);
        assert!(!m.grid_connected);
        assert!(!m.bms_valid);

        assert_eq!(m.vdc, 50.0);
        assert_eq!(m.idc, 2.0);
        assert_eq!(m.pdc, 50_000.0);
        assert_eq!(m.vac, 230.0);
        assert_eq!(m.iac, 1.0);
        assert_eq!(m.pac, 100_000.0);
        assert_eq!(m.qac, 5_000.0);
        assert_eq!(m.frequency, 50.0);
        assert_eq!(m.power_factor, 0.95);
        assert_eq!(m.temp_heatsink, 25.0);
        assert_eq!(m.temp_mosfet, 80.0);
        assert_eq!(m.efficiency, 96.5);
        assert_eq!(m.soc, 82.0);
    }

    #[test]
    fn decodes_status_flags() {
        let mut regs = block();
        regs[0] = 0x0004 | STATUS_PLL_LOCKED | STATUS_GRID_CONNECTED | STATUS_BMS_VALID;

        let m = Measurement::from_registers(&regs, Local::now()).unwrap();
        assert_eq!(m.state, InverterState::GridSync);
        assert!(m.pll_locked);
        assert!(m.grid_connected);
        assert!(m.bms_valid);
    }

    #[test]
    fn decodes_negative_measurements() {
        let mut regs = block();
        regs[4] = to_unsigned(-250); // -2.50 A
        regs[5] = to_unsigned(-500); // -50 kW
        regs[12] = to_unsigned(-55); // -5.5 degC

        let m = Measurement::from_registers(&regs, Local::now()).unwrap();
        assert_eq!(m.idc, -2.5);
        assert_eq!(m.pdc, -50_000.0);
        assert_eq!(m.temp_heatsink, -5.5);
    }

    #[test]
    fn rejects_unmapped_states() {
        for s in 10u16..=15 {
            let mut regs = block();
            regs[0] = s;
            assert_eq!(
                Measurement::from_registers(&regs, Local::now()),
                Err(DecodeError::InvalidState(s as u8))
            );
        }
    }

    #[test]
    fn rejects_wrong_block_length() {
        let regs = vec![0u16; 15];
        assert!(matches!(
            Measurement::from_registers(&regs, Local::now()),
            Err(DecodeError::BlockLength {
                expected: 16,
                got: 15
            })
        ));
    }

    #[test]
    fn decode_is_deterministic() {
        let at = Local::now();
        let a = Measurement::from_registers(&block(), at).unwrap();
        let b = Measurement::from_registers(&block(), at).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fault_words_combine_little_endian() {
        let mut regs = block();
        regs[1] = 0x0011;
        regs[2] = 0x0100;

        let m = Measurement::from_registers(&regs, Local::now()).unwrap();
        assert_eq!(m.fault_code.bits(), 0x0100_0011);
        assert!(m.fault_code.contains(FaultCode::ESTOP_ACTIVE));
    }

    #[test]
    fn fault_descriptions_in_ascending_bit_order() {
        // Insertion order of the flags must not matter.
        let code = FaultCode::ESTOP_ACTIVE | FaultCode::AC_OVERVOLTAGE | FaultCode::DC_OVERVOLTAGE;
        assert_eq!(
            code.descriptions(),
            vec!["DC Over-Voltage", "AC Over-Voltage", "E-Stop Active"]
        );

        let raw = FaultCode::from_bits_retain(0x0011);
        assert_eq!(
            raw.descriptions(),
            vec!["DC Over-Voltage", "AC Over-Voltage"]
        );
    }

    #[test]
    fn empty_fault_set_renders_sentinel() {
        assert_eq!(FaultCode::NONE.descriptions(), vec![NO_FAULTS]);
    }

    #[test]
    fn reserved_fault_bits_pass_through_unrendered() {
        let mut regs = block();
        regs[1] = 0x0800; // bit 11
        regs[2] = 0x8000; // bit 31

        let m = Measurement::from_registers(&regs, Local::now()).unwrap();
        assert_eq!(m.fault_code.bits(), 0x8000_0800);
        assert_eq!(m.fault_code.descriptions(), vec![NO_FAULTS]);
    }

    #[test]
    fn state_names_are_stable() {
        assert_eq!(InverterState::RunInverter.to_string(), "RunInverter");
        assert_eq!(InverterState::Emergency.to_string(), "Emergency");
        assert_eq!(InverterState::Fault.description(), "FAULT");
    }
}

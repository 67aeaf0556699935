//! Pin-level access to the JTAG port of a simulated design.
//!
//! The simulator itself is an external collaborator. It is reached only
//! through [`JtagPins`], which exposes the five TAP signals and a way to
//! advance simulated time. Everything above that (TAP walking, DMI, the
//! debug module) is implemented on top of [`JtagAdapter`].

pub(crate) mod common;
pub mod fake_dut;
mod jtag;

pub use common::IdCode;
pub use jtag::{JtagAdapter, ScanStats};

/// Width of the instruction register of the SoC TAP.
pub const IR_LENGTH: u32 = 5;

/// Accessor for the JTAG pins of a simulated device under test.
///
/// Implementations wrap a cycle based simulation model. Setters only latch the
/// new pin level; it becomes visible to the design on the next [`step`](JtagPins::step).
pub trait JtagPins {
    /// Drive `jtag_tck_i`.
    fn set_tck(&mut self, level: bool);

    /// Drive `jtag_tms_i`.
    fn set_tms(&mut self, level: bool);

    /// Drive `jtag_td_i`.
    fn set_tdi(&mut self, level: bool);

    /// Drive the active-low `jtag_trst_ni`.
    fn set_trst_n(&mut self, level: bool);

    /// Sample `jtag_td_o`.
    fn tdo(&self) -> bool;

    /// Advance the simulated design by one half period of the system clock.
    fn step(&mut self);
}

impl<T: JtagPins + ?Sized> JtagPins for &mut T {
    fn set_tck(&mut self, level: bool) {
        (**self).set_tck(level)
    }

    fn set_tms(&mut self, level: bool) {
        (**self).set_tms(level)
    }

    fn set_tdi(&mut self, level: bool) {
        (**self).set_tdi(level)
    }

    fn set_trst_n(&mut self, level: bool) {
        (**self).set_trst_n(level)
    }

    fn tdo(&self) -> bool {
        (**self).tdo()
    }

    fn step(&mut self) {
        (**self).step()
    }
}

/// JTAG instructions understood by the SoC TAP.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JtagInstruction {
    /// Selects the 32 bit IDCODE register.
    IdCode,
    /// Selects the `dtmcs` register of the RISC-V debug transport module.
    Dtmcs,
    /// Selects the `dmi` register of the RISC-V debug transport module.
    DmiAccess,
    /// Selects the single bit BYPASS register.
    Bypass,
}

impl JtagInstruction {
    /// The IR opcode of the instruction.
    pub const fn opcode(self) -> u8 {
        match self {
            Self::IdCode => 0b00001,
            Self::Dtmcs => 0b10000,
            Self::DmiAccess => 0b10001,
            Self::Bypass => 0b11111,
        }
    }

    /// Look up the instruction for a raw IR value.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        [Self::IdCode, Self::Dtmcs, Self::DmiAccess, Self::Bypass]
            .into_iter()
            .find(|instruction| instruction.opcode() == opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::JtagInstruction;

    #[test]
    fn idcode_and_bypass_are_distinct() {
        assert_ne!(
            JtagInstruction::IdCode.opcode(),
            JtagInstruction::Bypass.opcode()
        );
    }

    #[test]
    fn opcode_lookup() {
        assert_eq!(
            JtagInstruction::from_opcode(0b10001),
            Some(JtagInstruction::DmiAccess)
        );
        assert_eq!(JtagInstruction::from_opcode(0b00101), None);
    }
}

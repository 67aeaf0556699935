//! Debug Transport Module (DTM) handling
//!
//! The DTM is responsible for access to the debug module. Every access goes
//! through the `dmi` JTAG register, which is a request/response pipeline: a
//! read is issued with one scan and its result is collected by the next one.

use bitfield::bitfield;
use bitvec::prelude::*;

use crate::architecture::riscv::communication_interface::RiscvError;
use crate::config::TestbenchConfig;
use crate::probe::{JtagAdapter, JtagInstruction, JtagPins};

/// Access to the Debug Transport Module (DTM),
/// which is used to communicate with the RISC-V debug module.
#[derive(Debug)]
pub struct Dtm<P> {
    pub probe: JtagAdapter<P>,

    /// Number of address bits in the DMI register
    abits: u32,
    /// Run-Test/Idle cycles the DTM asks for after each DMI access.
    idle_cycles: u32,

    initial_backoff_cycles: u32,
    max_retries: Option<u32>,
}

impl<P: JtagPins> Dtm<P> {
    pub fn new(probe: JtagAdapter<P>, config: &TestbenchConfig) -> Self {
        Self {
            probe,
            abits: DEFAULT_ABITS,
            idle_cycles: 0,
            initial_backoff_cycles: config.initial_backoff_cycles.max(1),
            max_retries: config.max_dmi_retries,
        }
    }

    /// Width of the `dmi` register in bits.
    pub fn dmi_width(&self) -> u32 {
        self.abits + DMI_ADDRESS_BIT_OFFSET
    }

    pub fn abits(&self) -> u32 {
        self.abits
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    /// Read `dtmcs` and configure the DMI width and idle hint from it.
    pub fn init(&mut self) -> Result<(), RiscvError> {
        let raw_dtmcs = self.read_dtmcs();

        if raw_dtmcs == 0 {
            return Err(RiscvError::NoRiscvTarget);
        }

        let dtmcs = Dtmcs(raw_dtmcs);

        tracing::debug!("{:?}", dtmcs);

        if dtmcs.version() != 1 {
            return Err(RiscvError::UnsupportedDebugTransportModuleVersion(
                dtmcs.version() as u8,
            ));
        }

        self.abits = dtmcs.abits();
        self.idle_cycles = dtmcs.idle();

        Ok(())
    }

    pub fn read_dtmcs(&mut self) -> u32 {
        self.probe
            .read_register(JtagInstruction::Dtmcs, DTMCS_WIDTH)
            .load_le::<u32>()
    }

    /// Clear a sticky DMI error or busy condition (`dmireset`).
    pub fn clear_error_state(&mut self) {
        let mut dtmcs = Dtmcs(0);

        dtmcs.set_dmireset(true);

        let Dtmcs(reg_value) = dtmcs;

        self.probe.write_register(
            JtagInstruction::Dtmcs,
            &reg_value.to_le_bytes().view_bits::<Lsb0>()[..DTMCS_WIDTH as usize],
        );
    }

    /// Shift `op` through the `dmi` register and return the captured bits.
    fn dmi_register_access(&mut self, op: DmiOperation) -> u128 {
        let len = self.dmi_width() as usize;
        let bytes = op.to_byte_batch();

        self.probe.set_ir(JtagInstruction::DmiAccess);
        self.probe.shift_dr();
        let captured = self
            .probe
            .readwrite_bits(&bytes.view_bits::<Lsb0>()[..len], true);
        self.probe.update_dr(true);

        captured.load_le::<u128>()
    }

    /// Issue a read request for `address`, idle for `wait_cycles`, then
    /// collect the response with a NOP scan.
    ///
    /// Returns the raw captured `dmi` value; use [`decode_dmi_response`] to
    /// extract the status and data.
    pub fn read_dmi(&mut self, address: u8, wait_cycles: u32) -> u128 {
        tracing::trace!("read_dmi({:#04x}, wait {})", address, wait_cycles);

        self.dmi_register_access(DmiOperation::Read {
            address: address.into(),
        });

        self.probe.idle(wait_cycles);

        // The NOP carries the same address. The DTM ignores it.
        self.dmi_register_access(DmiOperation::NoOp {
            address: address.into(),
        })
    }

    /// Queue a write. No response is collected.
    pub fn write_dmi(&mut self, address: u8, value: u32) {
        tracing::trace!("write_dmi({:#04x}, {:#010x})", address, value);

        self.dmi_register_access(DmiOperation::Write {
            address: address.into(),
            value,
        });

        self.probe.idle(self.idle_cycles);
    }

    /// Read a DMI register, retrying while the DTM reports BUSY.
    ///
    /// The idle time between request and collection starts at the configured
    /// initial back-off and doubles after every BUSY response. Each BUSY is
    /// cleared with a `dmireset` before the next attempt.
    pub fn read_dmi_with_backoff(&mut self, address: u8) -> Result<u32, RiscvError> {
        let mut wait_cycles = self.initial_backoff_cycles;
        let mut retries = 0;

        loop {
            let raw = self.read_dmi(address, wait_cycles);

            match decode_dmi_response(raw) {
                Ok(value) => return Ok(value),
                Err(DmiOperationStatus::RequestInProgress) => {
                    // Operation still in progress, reset dmi status and try again.
                    self.clear_error_state();

                    if let Some(max) = self.max_retries {
                        if retries >= max {
                            return Err(RiscvError::RetryLimitExceeded { address, retries });
                        }
                    }

                    retries += 1;
                    wait_cycles = wait_cycles.saturating_mul(2);
                    tracing::debug!(
                        "DMI read of {:#04x} busy, retrying with {} idle cycles",
                        address,
                        wait_cycles
                    );
                }
                Err(DmiOperationStatus::OperationFailed) => {
                    // The error is sticky, leave the DTM usable for the caller.
                    self.clear_error_state();
                    return Err(RiscvError::DtmOperationFailed);
                }
                Err(_) => {
                    self.clear_error_state();
                    return Err(RiscvError::DmiReserved);
                }
            }
        }
    }
}

/// Split a captured `dmi` value into its status and data fields.
pub fn decode_dmi_response(response: u128) -> Result<u32, DmiOperationStatus> {
    // Only two bits are left after masking, parse() accepts all of them.
    match DmiOperationStatus::parse((response & DMI_OP_MASK) as u8) {
        Some(DmiOperationStatus::Ok) | None => Ok((response >> DMI_VALUE_BIT_OFFSET) as u32),
        Some(status) => Err(status),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmiOperation {
    NoOp { address: u64 },
    Read { address: u64 },
    Write { address: u64, value: u32 },
}

impl DmiOperation {
    fn opcode(&self) -> u8 {
        match self {
            Self::NoOp { .. } => 0,
            Self::Read { .. } => 1,
            Self::Write { .. } => 2,
        }
    }

    pub fn register_value(&self) -> u128 {
        let (address, value): (u128, u128) = match self {
            Self::NoOp { address } | Self::Read { address } => (*address as u128, 0),
            Self::Write { address, value } => (*address as u128, *value as u128),
        };
        (address << DMI_ADDRESS_BIT_OFFSET)
            | (value << DMI_VALUE_BIT_OFFSET)
            | self.opcode() as u128
    }

    pub fn to_byte_batch(self) -> [u8; 16] {
        self.register_value().to_le_bytes()
    }
}

/// Possible return values in the op field of
/// the dmi register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmiOperationStatus {
    Ok = 0,
    Reserved = 1,
    OperationFailed = 2,
    RequestInProgress = 3,
}

impl DmiOperationStatus {
    pub(crate) fn parse(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Ok,
            1 => Self::Reserved,
            2 => Self::OperationFailed,
            3 => Self::RequestInProgress,
            _ => return None,
        };

        Some(status)
    }
}

/// Width of the `dtmcs` JTAG register.
pub const DTMCS_WIDTH: u32 = 32;

/// `abits` assumed until `dtmcs` has been read.
pub const DEFAULT_ABITS: u32 = 7;

/// Offset of the `address` field in the `dmi` JTAG register.
pub const DMI_ADDRESS_BIT_OFFSET: u32 = 34;

/// Offset of the `value` field in the `dmi` JTAG register.
pub const DMI_VALUE_BIT_OFFSET: u32 = 2;

const DMI_OP_MASK: u128 = 0x3;

bitfield! {
    /// The `dtmcs` register.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dtmcs(u32);
    impl Debug;

    pub dmihardreset, set_dmihardreset: 17;
    pub dmireset, set_dmireset: 16;
    pub idle, set_idle: 14, 12;
    pub dmistat, set_dmistat: 11, 10;
    pub abits, set_abits: 9, 4;
    pub version, set_version: 3, 0;
}

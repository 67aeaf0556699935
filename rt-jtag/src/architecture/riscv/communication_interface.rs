//! Debug Module Communication
//!
//! This module implements communication with a
//! Debug Module, as described in the RISCV debug
//! specification v0.13.2 .

use bitvec::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::dtm::Dtm;
use super::{
    Abstractcs, AccessRegisterCommand, Data0, Dmcontrol, Dmstatus, Sbaddress0, Sbaddress1, Sbcs,
    Sbdata0, DPC, SBACCESS_32,
};
use crate::config::{ConfigError, TestbenchConfig};
use crate::probe::common::{bits_to_words, words_to_bits};
use crate::probe::{IdCode, JtagAdapter, JtagInstruction, JtagPins};

/// Some error occurred when working with the RISC-V core.
#[derive(thiserror::Error, Debug)]
pub enum RiscvError {
    /// An error occurred during transport
    #[error("Error during DMI transport: the DTM reported a failed operation")]
    DtmOperationFailed,
    /// The DTM answered with the reserved status value.
    #[error("The DTM answered with a reserved status value")]
    DmiReserved,
    /// No RISC-V DTM behind the JTAG port
    #[error("No RISC-V debug transport module found, dtmcs reads as zero")]
    NoRiscvTarget,
    /// The version of the debug transport module (DTM) is currently not supported.
    #[error("The version '{0}' of the debug transport module (DTM) is currently not supported.")]
    UnsupportedDebugTransportModuleVersion(u8),
    /// A DMI read stayed BUSY past the configured retry limit.
    #[error("DMI register {address:#04x} is still busy after {retries} retries")]
    RetryLimitExceeded {
        /// DMI address being read.
        address: u8,
        /// Number of retries performed.
        retries: u32,
    },
    /// A polling loop hit the configured attempt limit.
    #[error("Timeout while waiting for {0}")]
    Timeout(&'static str),
    /// An error with operating an abstract command
    #[error("Error executing an abstract command: {0:?}")]
    AbstractCommand(AbstractCommandErrorKind),
    /// The configuration does not describe a usable operation.
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),
}

/// Errors which can occur while executing an abstract command
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbstractCommandErrorKind {
    /// No error
    None = 0,
    /// An abstract command was executing while `command`, `abstractcs` or
    /// `abstractauto` was written, or when one of the `data` or `progbuf`
    /// registers was read or written.
    Busy = 1,
    /// The requested command is not supported
    NotSupported = 2,
    /// An exception occurred while executing the command
    Exception = 3,
    /// The abstract command couldn't execute because the hart wasn't in the
    /// required state (running/halted), or unavailable.
    HaltResume = 4,
    /// The abstract command failed due to a bus error
    Bus = 5,
    /// Reserved for future use
    _Reserved = 6,
    /// A command failed for another reason
    Other = 7,
}

impl AbstractCommandErrorKind {
    pub(crate) fn parse(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Busy,
            2 => Self::NotSupported,
            3 => Self::Exception,
            4 => Self::HaltResume,
            5 => Self::Bus,
            6 => Self::_Reserved,
            _ => Self::Other,
        }
    }
}

/// Value of the `sberror` field in `sbcs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SbaErrorKind {
    None = 0,
    Timeout = 1,
    BadAddress = 2,
    Alignment = 3,
    UnsupportedSize = 4,
    Other = 7,
}

impl SbaErrorKind {
    pub(crate) fn parse(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Timeout,
            2 => Self::BadAddress,
            3 => Self::Alignment,
            4 => Self::UnsupportedSize,
            _ => Self::Other,
        }
    }
}

/// A debug module register, addressed through the DMI.
pub trait DebugRegister: Into<u32> + From<u32> {
    const ADDRESS: u8;
    const NAME: &'static str;
}

/// Outcome of [`RiscvCommunicationInterface::memory_test`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryTestReport {
    /// Number of write/read-back pairs.
    pub accesses: u32,
    pub mismatches: u32,
    /// The first failing access, as (address, written, read back).
    pub first_mismatch: Option<(u64, u32, u32)>,
}

impl MemoryTestReport {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Access to the RISC-V debug module of the simulated SoC.
#[derive(Debug)]
pub struct RiscvCommunicationInterface<P> {
    dtm: Dtm<P>,
    config: TestbenchConfig,
}

impl<P: JtagPins> RiscvCommunicationInterface<P> {
    pub fn new(dtm: Dtm<P>, config: TestbenchConfig) -> Self {
        Self { dtm, config }
    }

    pub fn config(&self) -> &TestbenchConfig {
        &self.config
    }

    pub fn dtm(&self) -> &Dtm<P> {
        &self.dtm
    }

    pub fn dtm_mut(&mut self) -> &mut Dtm<P> {
        &mut self.dtm
    }

    pub fn probe(&self) -> &JtagAdapter<P> {
        &self.dtm.probe
    }

    pub fn probe_mut(&mut self) -> &mut JtagAdapter<P> {
        &mut self.dtm.probe
    }

    pub fn into_dtm(self) -> Dtm<P> {
        self.dtm
    }

    pub fn read_dm_register<R: DebugRegister>(&mut self) -> Result<R, RiscvError> {
        tracing::debug!(
            "Reading DM register '{}' at {:#04x}",
            R::NAME,
            R::ADDRESS
        );

        let register_value = self.dtm.read_dmi_with_backoff(R::ADDRESS)?;

        tracing::debug!(
            "Read DM register '{}' at {:#04x} = {:#010x}",
            R::NAME,
            R::ADDRESS,
            register_value
        );

        Ok(register_value.into())
    }

    pub fn write_dm_register<R: DebugRegister>(&mut self, register: R) -> Result<(), RiscvError> {
        self.write(R::ADDRESS, register.into(), false, false)
    }

    /// Write a DM register and optionally wait for the abstract command
    /// engine (`wait_cmd`) and/or the system bus (`wait_sba`) to go idle.
    ///
    /// Sticky errors seen while polling are logged, polling carries on until
    /// the busy bit clears.
    pub fn write(
        &mut self,
        address: u8,
        value: u32,
        wait_cmd: bool,
        wait_sba: bool,
    ) -> Result<(), RiscvError> {
        tracing::debug!("Write DM register at {:#04x} = {:#010x}", address, value);

        self.dtm.write_dmi(address, value);

        if wait_cmd {
            self.wait_for_abstract_command()?;
        }

        if wait_sba {
            self.wait_for_system_bus()?;
        }

        Ok(())
    }

    /// Read `R` until `done` accepts it.
    fn poll<R: DebugRegister>(
        &mut self,
        what: &'static str,
        mut done: impl FnMut(&R) -> bool,
    ) -> Result<R, RiscvError> {
        let mut attempts = 0;

        loop {
            let register: R = self.read_dm_register()?;

            if done(&register) {
                return Ok(register);
            }

            attempts += 1;
            if let Some(max) = self.config.max_poll_attempts {
                if attempts >= max {
                    tracing::error!("Gave up waiting for {} after {} reads", what, attempts);
                    return Err(RiscvError::Timeout(what));
                }
            }
        }
    }

    fn wait_for_abstract_command(&mut self) -> Result<Abstractcs, RiscvError> {
        let mut reported = false;

        self.poll("abstract command", |abstractcs: &Abstractcs| {
            if abstractcs.cmderr() != 0 && !reported {
                tracing::warn!(
                    "Abstract command error: {:?}",
                    AbstractCommandErrorKind::parse(abstractcs.cmderr() as u8)
                );
                reported = true;
            }

            !abstractcs.busy()
        })
    }

    fn wait_for_system_bus(&mut self) -> Result<Sbcs, RiscvError> {
        let mut reported = false;

        self.poll("system bus", |sbcs: &Sbcs| {
            if (sbcs.sberror() != 0 || sbcs.sbbusyerror()) && !reported {
                tracing::warn!(
                    "System bus error: {:?}, busy error: {}",
                    SbaErrorKind::parse(sbcs.sberror() as u8),
                    sbcs.sbbusyerror()
                );
                reported = true;
            }

            !sbcs.sbbusy()
        })
    }

    /// Read the IDCODE register of the TAP.
    pub fn get_idcode(&mut self) -> IdCode {
        let value = self
            .dtm
            .probe
            .read_register(JtagInstruction::IdCode, 32)
            .load_le::<u32>();

        IdCode(value)
    }

    /// Compare `idcode` with the expected one. A mismatch is logged, not fatal.
    pub fn check_idcode(&self, idcode: IdCode) -> bool {
        tracing::info!("Tap ID: {}", idcode);

        if idcode.0 == self.config.expected_idcode {
            tracing::info!("Tap ID test passed");
            true
        } else {
            tracing::error!(
                "Tap ID test failed, expected {:#010X}",
                self.config.expected_idcode
            );
            false
        }
    }

    /// Shift `pattern` through the single bit BYPASS register and check it
    /// comes out unchanged, one clock late.
    pub fn bypass_test(&mut self, pattern: &[u32]) -> bool {
        let expected = words_to_bits(pattern);

        // One extra bit pushes the last pattern bit out of the register.
        let mut data = expected.clone();
        data.push(false);

        let probe = &mut self.dtm.probe;
        probe.set_ir(JtagInstruction::Bypass);
        probe.shift_dr();
        let mut captured = probe.readwrite_bits(&data, true);
        probe.update_dr(true);

        // The first bit out is the captured BYPASS value.
        captured.rotate_left(1);
        captured.truncate(expected.len());

        if captured == expected {
            tracing::info!("Bypass test passed");
            true
        } else {
            tracing::error!("Bypass test failed");
            for (index, (sent, received)) in pattern
                .iter()
                .zip(bits_to_words(&captured))
                .enumerate()
            {
                tracing::error!("test[{index}]: {sent:08x} result[{index}]: {received:08x}");
            }
            false
        }
    }

    /// Enable the debug module and wait until it reports being active.
    #[tracing::instrument(skip_all)]
    pub fn activate(&mut self) -> Result<(), RiscvError> {
        let mut control = Dmcontrol(0);
        control.set_dmactive(true);
        self.write_dm_register(control)?;

        self.poll("dmactive", |control: &Dmcontrol| control.dmactive())?;

        let status: Dmstatus = self.read_dm_register()?;
        tracing::debug!("{:?}", status);

        if status.version() != 2 {
            tracing::warn!(
                "Debug module version {} is not 0.13, continuing anyway",
                status.version()
            );
        }

        Ok(())
    }

    /// Halt the hart and wait until it reports being halted.
    pub fn halt(&mut self) -> Result<(), RiscvError> {
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_haltreq(true);
        dmcontrol.set_dmactive(true);
        self.write_dm_register(dmcontrol)?;

        self.poll("hart halt", |status: &Dmstatus| status.allhalted())?;

        // clear the halt request
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        self.write_dm_register(dmcontrol)?;

        tracing::debug!("Hart halted");

        Ok(())
    }

    /// Resume the hart and wait for the acknowledgement.
    pub fn resume(&mut self) -> Result<(), RiscvError> {
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_resumereq(true);
        dmcontrol.set_dmactive(true);
        self.write_dm_register(dmcontrol)?;

        self.poll("hart resume", |status: &Dmstatus| status.allresumeack())?;

        // clear the resume request
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        self.write_dm_register(dmcontrol)?;

        tracing::debug!("Hart resumed");

        Ok(())
    }

    /// Run an access register command and check `cmderr` afterwards.
    fn execute_abstract_command(
        &mut self,
        command: AccessRegisterCommand,
    ) -> Result<(), RiscvError> {
        let command_value: u32 = command.into();
        self.write(AccessRegisterCommand::ADDRESS, command_value, true, false)?;

        let abstractcs: Abstractcs = self.read_dm_register()?;

        if abstractcs.cmderr() != 0 {
            let kind = AbstractCommandErrorKind::parse(abstractcs.cmderr() as u8);

            // cmderr is write-1-to-clear
            let mut clear = Abstractcs(0);
            clear.set_cmderr(0x7);
            self.write_dm_register(clear)?;

            return Err(RiscvError::AbstractCommand(kind));
        }

        Ok(())
    }

    fn access_register_command(regno: u16, write: bool) -> AccessRegisterCommand {
        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(2);
        command.set_transfer(true);
        command.set_write(write);
        command.set_regno(regno);
        command
    }

    /// Write a core register (GPR or CSR) through an abstract command.
    /// The hart has to be halted.
    pub fn write_core_register(&mut self, regno: u16, value: u32) -> Result<(), RiscvError> {
        tracing::debug!("Writing core register {:#06x} = {:#010x}", regno, value);

        self.write_dm_register(Data0(value))?;
        self.execute_abstract_command(Self::access_register_command(regno, true))
    }

    /// Read a core register (GPR or CSR) through an abstract command.
    /// The hart has to be halted.
    pub fn read_core_register(&mut self, regno: u16) -> Result<u32, RiscvError> {
        self.execute_abstract_command(Self::access_register_command(regno, false))?;

        let Data0(value) = self.read_dm_register()?;
        tracing::debug!("Read core register {:#06x} = {:#010x}", regno, value);

        Ok(value)
    }

    /// Write the debug program counter, where the hart continues on resume.
    pub fn write_dpc(&mut self, value: u32) -> Result<(), RiscvError> {
        self.write_core_register(DPC, value)
    }

    /// Program `sbcs` for 32 bit accesses, clearing any sticky error, then
    /// the bus address. With `read_on_address` set, writing `sbaddress0`
    /// starts a read.
    pub fn setup_system_bus(
        &mut self,
        address: u64,
        read_on_address: bool,
        autoincrement: bool,
    ) -> Result<(), RiscvError> {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbaccess(SBACCESS_32);
        sbcs.set_sbreadonaddr(read_on_address);
        sbcs.set_sbautoincrement(autoincrement);
        // write-1-to-clear
        sbcs.set_sbbusyerror(true);
        sbcs.set_sberror(0x7);
        self.write_dm_register(sbcs)?;

        self.write_dm_register(Sbaddress1((address >> 32) as u32))?;
        self.write_dm_register(Sbaddress0(address as u32))
    }

    /// Write one word to memory through system bus access.
    pub fn mm_write(
        &mut self,
        address: u64,
        value: u32,
        wait_cycles: u32,
        verbose: bool,
    ) -> Result<(), RiscvError> {
        if verbose {
            tracing::info!("Writing {:#010x} to {:#010x}", value, address);
        }

        self.setup_system_bus(address, false, false)?;
        self.write_dm_register(Sbdata0(value))?;

        self.dtm.probe.idle(wait_cycles);

        Ok(())
    }

    /// Read one word from memory through system bus access.
    pub fn mm_read(&mut self, address: u64, wait_cycles: u32) -> Result<u32, RiscvError> {
        self.setup_system_bus(address, true, false)?;

        self.dtm.probe.idle(wait_cycles);

        let Sbdata0(value) = self.read_dm_register()?;
        tracing::trace!("Read {:#010x} from {:#010x}", value, address);

        Ok(value)
    }

    /// Write and read back words at pseudo-random addresses of the configured
    /// scratch-pad window. All-zeros and all-ones are always tried first.
    #[tracing::instrument(skip_all)]
    pub fn memory_test(&mut self) -> Result<MemoryTestReport, RiscvError> {
        let test = self.config.memory_test.clone();
        test.validate()?;

        let wait_cycles = self.config.sba_wait_cycles;

        tracing::info!(
            "Memory test of {:#x}..{:#x}, {} random words, seed {:#x}",
            test.base,
            test.base + test.size,
            test.iterations,
            test.seed
        );

        let mut rng = StdRng::seed_from_u64(test.seed);
        let words = test.size / 4;

        let fixed = [0x0000_0000, 0xFFFF_FFFF];
        let random: Vec<u32> = (0..test.iterations).map(|_| rng.gen()).collect();

        let mut report = MemoryTestReport::default();

        for data in fixed.into_iter().chain(random) {
            let address = test.base + rng.gen_range(0..words) * 4;

            self.mm_write(address, data, wait_cycles, false)?;
            let read_back = self.mm_read(address, wait_cycles)?;

            report.accesses += 1;

            if read_back != data {
                tracing::error!(
                    "Memory test mismatch at {:#010x}: wrote {:#010x}, read {:#010x}",
                    address,
                    data,
                    read_back
                );
                report.mismatches += 1;
                if report.first_mismatch.is_none() {
                    report.first_mismatch = Some((address, data, read_back));
                }
            }
        }

        if report.passed() {
            tracing::info!("Memory test passed ({} accesses)", report.accesses);
        } else {
            tracing::error!(
                "Memory test failed, {} of {} accesses mismatched",
                report.mismatches,
                report.accesses
            );
        }

        Ok(report)
    }
}

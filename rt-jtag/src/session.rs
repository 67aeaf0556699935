//! The testbench flow: bring up the debug port, check it, load an image and
//! run it.

use std::path::Path;

use anyhow::anyhow;

use crate::architecture::riscv::{Dtm, MemoryTestReport, RiscvCommunicationInterface};
use crate::config::TestbenchConfig;
use crate::flashing::{self, ObjectElfSource, PreloadReport};
use crate::probe::{IdCode, JtagAdapter, JtagPins};
use crate::Error;

/// Words shifted through BYPASS by [`Testbench::connectivity_test`].
pub const BYPASS_PATTERN: [u32; 8] = [
    0x0000_1111,
    0xEEEE_FFFF,
    0xCCCC_DDDD,
    0xAAAA_BBBB,
    0x89AB_CDEF,
    0x0123_4567,
    0x0BAD_F00D,
    0xDEAD_BEEF,
];

/// Result of [`Testbench::connectivity_test`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub bypass_passed: bool,
    pub idcode: IdCode,
    pub idcode_matches: bool,
}

impl ConnectivityReport {
    pub fn passed(&self) -> bool {
        self.bypass_passed && self.idcode_matches
    }
}

/// Drives the debug port of one simulated SoC.
#[derive(Debug)]
pub struct Testbench<P> {
    interface: RiscvCommunicationInterface<P>,
}

impl<P: JtagPins> Testbench<P> {
    /// Set up a testbench on `pins`. Fails if `config` does not validate.
    pub fn new(pins: P, config: TestbenchConfig) -> Result<Self, Error> {
        config.validate()?;

        let probe = JtagAdapter::new(pins, config.clock_period);
        let dtm = Dtm::new(probe, &config);

        Ok(Self {
            interface: RiscvCommunicationInterface::new(dtm, config),
        })
    }

    /// Like [`new`](Self::new), with the configuration read from a YAML file.
    pub fn from_config_file(pins: P, path: impl AsRef<Path>) -> Result<Self, Error> {
        let config = TestbenchConfig::load(path)?;
        Self::new(pins, config)
    }

    pub fn config(&self) -> &TestbenchConfig {
        self.interface.config()
    }

    pub fn interface(&self) -> &RiscvCommunicationInterface<P> {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut RiscvCommunicationInterface<P> {
        &mut self.interface
    }

    pub fn pins(&self) -> &P {
        self.interface.probe().pins()
    }

    pub fn pins_mut(&mut self) -> &mut P {
        self.interface.probe_mut().pins_mut()
    }

    /// TCK cycles issued so far.
    pub fn tick_count(&self) -> u64 {
        self.interface.probe().scan_stats().tck_cycles
    }

    /// Reset the TAP both ways, then check BYPASS and IDCODE.
    #[tracing::instrument(skip_all)]
    pub fn connectivity_test(&mut self) -> ConnectivityReport {
        let probe = self.interface.probe_mut();

        tracing::info!("Performing JTAG reset test");
        probe.reset();

        tracing::info!("Performing JTAG soft-reset test");
        probe.softreset();

        tracing::info!("Performing JTAG bypass test");
        let bypass_passed = self.interface.bypass_test(&BYPASS_PATTERN);

        tracing::info!("Performing JTAG get IDCODE test");
        let idcode = self.interface.get_idcode();
        let idcode_matches = self.interface.check_idcode(idcode);

        ConnectivityReport {
            bypass_passed,
            idcode,
            idcode_matches,
        }
    }

    /// Bring up the debug transport and activate the debug module.
    #[tracing::instrument(skip_all)]
    pub fn jtag_init(&mut self) -> Result<(), Error> {
        let probe = self.interface.probe_mut();
        probe.reset();
        probe.softreset();

        self.interface.dtm_mut().init()?;
        let idcode = self.interface.get_idcode();
        self.interface.check_idcode(idcode);
        self.interface.activate()?;

        tracing::info!("Debug module active after {} TCK cycles", self.tick_count());

        Ok(())
    }

    pub fn memory_test(&mut self) -> Result<MemoryTestReport, Error> {
        Ok(self.interface.memory_test()?)
    }

    /// Halt the hart and preload the ELF file at `path`.
    pub fn load_elf(&mut self, path: impl AsRef<Path>) -> Result<PreloadReport, Error> {
        let mut source = ObjectElfSource::open(path)?;
        Ok(flashing::halt_and_load(&mut self.interface, &mut source)?)
    }

    /// Preload the ELF file at `path` and start the hart at its entry point.
    pub fn load_and_run(&mut self, path: impl AsRef<Path>) -> Result<PreloadReport, Error> {
        let mut source = ObjectElfSource::open(path)?;
        Ok(flashing::load_and_run(&mut self.interface, &mut source)?)
    }

    /// The full bring-up: initialise the debug port, test memory, then load
    /// and start the image. A failing memory test stops the flow.
    pub fn run(&mut self, path: impl AsRef<Path>) -> Result<PreloadReport, Error> {
        self.jtag_init()?;

        let report = self.memory_test()?;
        if !report.passed() {
            return Err(anyhow!(
                "memory test failed with {} of {} mismatching accesses",
                report.mismatches,
                report.accesses
            )
            .into());
        }

        self.load_and_run(path)
    }
}

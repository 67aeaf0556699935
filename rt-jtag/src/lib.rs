//! # JTAG debug transport for simulated RISC-V SoCs
//!
//! Drives the JTAG port of a cycle based simulation of the SoC to reset and
//! probe the TAP, access the RISC-V debug module and load images into memory
//! through system bus access.
//!
//! The simulation is reached through the [`JtagPins`] trait only. A software
//! model of the debug port, [`FakeDut`], implements it for tests.
//!
//! ## Loading an image
//!
//! ```no_run
//! # use rt_jtag::Error;
//! use rt_jtag::{FakeDut, Testbench, TestbenchConfig};
//!
//! let mut testbench = Testbench::new(FakeDut::new(), TestbenchConfig::default())?;
//!
//! testbench.jtag_init()?;
//! testbench.memory_test()?;
//! testbench.load_and_run("hello.elf")?;
//! # Ok::<(), Error>(())
//! ```
//!
//! The crate is layered the same way the hardware is: [`JtagAdapter`] walks
//! the TAP, [`Dtm`] speaks the DMI protocol on top of it and
//! [`RiscvCommunicationInterface`] talks to the debug module.

/// All the interface bits for the different architectures.
pub mod architecture;
pub mod config;
mod error;
pub mod flashing;
pub mod probe;
mod session;

pub use crate::architecture::riscv::{
    communication_interface::RiscvCommunicationInterface, dtm::Dtm, RiscvError,
};
pub use crate::config::{ConfigError, MemoryTestConfig, TestbenchConfig};
pub use crate::error::Error;
pub use crate::flashing::FileDownloadError;
pub use crate::probe::{
    fake_dut::FakeDut, IdCode, JtagAdapter, JtagInstruction, JtagPins, ScanStats,
};
pub use crate::session::{ConnectivityReport, Testbench, BYPASS_PATTERN};

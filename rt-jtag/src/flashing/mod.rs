//! Loading executable images into the simulated memory.
//!
//! Images are streamed word by word through system bus access. The hart is
//! halted first and can be restarted at the image entry point afterwards.

mod download;
mod loader;

pub use download::{halt_and_load, load_and_run, preload, PreloadReport};
pub use loader::{ElfSource, ObjectElfSource, SectionInfo};

use crate::architecture::riscv::RiscvError;

/// An error while loading an image into the target.
#[derive(Debug, thiserror::Error)]
pub enum FileDownloadError {
    /// An IO error has occured while reading the firmware file.
    #[error("I/O error")]
    IO(#[from] std::io::Error),
    /// The given error has occured while reading the object file.
    #[error("Object Error: {0}.")]
    Object(&'static str),
    /// Reading and decoding the given ELF file has resulted in the given error.
    #[error("Could not read ELF file")]
    Elf(#[from] object::read::Error),
    /// No loadable segments were found in the ELF file.
    ///
    /// This is most likely because of a bad linker script.
    #[error("No loadable ELF sections were found.")]
    NoLoadableSegments,
    /// The image has no section at the requested address, or it is shorter
    /// than requested.
    #[error("No section with {length} bytes at {address:#010x}")]
    SectionUnavailable { address: u64, length: u64 },
    /// Talking to the debug module failed.
    #[error("Debug module access failed")]
    Riscv(#[from] RiscvError),
}

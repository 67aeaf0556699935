use crate::architecture::riscv::{DebugRegister, RiscvCommunicationInterface, Sbdata0};
use crate::probe::JtagPins;

use super::{ElfSource, FileDownloadError};

/// Totals of a [`preload`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PreloadReport {
    pub sections: u32,
    pub bytes: u64,
    /// Number of `sbdata0` writes issued.
    pub words: u64,
}

/// Stream every section of `source` into memory through system bus access.
///
/// Each section is sent as little-endian words with auto-incrementing
/// addresses; a trailing partial word is zero padded. Completion is only
/// confirmed every `checkpoint_bytes` bytes and after the last word of a
/// section.
#[tracing::instrument(skip_all)]
pub fn preload<P: JtagPins>(
    interface: &mut RiscvCommunicationInterface<P>,
    source: &mut dyn ElfSource,
) -> Result<PreloadReport, FileDownloadError> {
    let checkpoint = u64::from(interface.config().checkpoint_bytes.max(4));
    let mut report = PreloadReport::default();

    while let Some(section) = source.next_section() {
        if section.length == 0 {
            continue;
        }

        tracing::info!(
            "Loading section at {:#010x}, {} bytes",
            section.address,
            section.length
        );

        let mut buffer = vec![0u8; section.length as usize];
        source.read_section(section.address, &mut buffer)?;

        interface.setup_system_bus(section.address, false, true)?;

        let words = buffer.len().div_ceil(4);

        for (index, chunk) in buffer.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);

            let written = (index as u64 + 1) * 4;
            let wait = written % checkpoint == 0 || index + 1 == words;

            if wait {
                tracing::debug!(
                    "Checkpoint at {:#010x}",
                    section.address + written
                );
            }

            interface.write(Sbdata0::ADDRESS, u32::from_le_bytes(word), wait, wait)?;
        }

        report.sections += 1;
        report.bytes += section.length;
        report.words += words as u64;
    }

    if report.sections == 0 {
        return Err(FileDownloadError::NoLoadableSegments);
    }

    tracing::info!(
        "Preloaded {} sections, {} bytes in {} words",
        report.sections,
        report.bytes,
        report.words
    );

    Ok(report)
}

/// Halt the hart, then [`preload`] the image.
pub fn halt_and_load<P: JtagPins>(
    interface: &mut RiscvCommunicationInterface<P>,
    source: &mut dyn ElfSource,
) -> Result<PreloadReport, FileDownloadError> {
    interface.halt()?;
    preload(interface, source)
}

/// Load the image into the halted hart and let it run from the entry point.
pub fn load_and_run<P: JtagPins>(
    interface: &mut RiscvCommunicationInterface<P>,
    source: &mut dyn ElfSource,
) -> Result<PreloadReport, FileDownloadError> {
    let report = halt_and_load(interface, source)?;

    let entry = source.entry_point();
    tracing::info!("Starting execution at {:#010x}", entry);

    interface.write_dpc(entry as u32)?;
    interface.resume()?;

    Ok(report)
}

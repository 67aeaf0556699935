use std::path::Path;

use object::{elf::SHF_ALLOC, BinaryFormat, Object, ObjectSection, SectionFlags, SectionKind};

use super::FileDownloadError;

/// Address and size of one loadable section.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub address: u64,
    pub length: u64,
}

/// Source of the sections to preload.
pub trait ElfSource {
    /// The next section to load, in load order. `None` once all sections
    /// have been handed out.
    fn next_section(&mut self) -> Option<SectionInfo>;

    /// Fill `buffer` with the contents of the section starting at `address`.
    fn read_section(&mut self, address: u64, buffer: &mut [u8]) -> Result<(), FileDownloadError>;

    /// Address the hart should start executing at.
    fn entry_point(&self) -> u64;
}

#[derive(Debug)]
struct LoadableSection {
    name: String,
    address: u64,
    data: Vec<u8>,
}

/// [`ElfSource`] for an ELF file, parsed with the `object` crate.
///
/// Every allocated section with contents in the file is loaded, in address
/// order. `.bss` and similar sections are skipped.
#[derive(Debug)]
pub struct ObjectElfSource {
    sections: Vec<LoadableSection>,
    entry: u64,
    next: usize,
}

impl ObjectElfSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileDownloadError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;

        tracing::debug!("Read {} bytes from {}", data.len(), path.display());

        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FileDownloadError> {
        let binary = object::File::parse(data)?;

        if binary.format() != BinaryFormat::Elf {
            return Err(FileDownloadError::Object("Unsupported file type"));
        }

        let mut sections = vec![];

        for section in binary.sections() {
            let allocated = match section.flags() {
                SectionFlags::Elf { sh_flags } => sh_flags & u64::from(SHF_ALLOC) != 0,
                _ => false,
            };

            if !allocated || section.kind() == SectionKind::UninitializedData {
                continue;
            }

            let data = section.data()?;
            if data.is_empty() {
                continue;
            }

            let name = section.name().unwrap_or("<unnamed>").to_owned();
            tracing::debug!(
                "Found loadable section {} at {:#010x}, {} bytes",
                name,
                section.address(),
                data.len()
            );

            sections.push(LoadableSection {
                name,
                address: section.address(),
                data: data.to_vec(),
            });
        }

        if sections.is_empty() {
            return Err(FileDownloadError::NoLoadableSegments);
        }

        sections.sort_by_key(|section| section.address);

        Ok(Self {
            sections,
            entry: binary.entry(),
            next: 0,
        })
    }

    /// Names of the loadable sections, in load order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|section| section.name.as_str())
    }
}

impl ElfSource for ObjectElfSource {
    fn next_section(&mut self) -> Option<SectionInfo> {
        let section = self.sections.get(self.next)?;
        self.next += 1;

        Some(SectionInfo {
            address: section.address,
            length: section.data.len() as u64,
        })
    }

    fn read_section(&mut self, address: u64, buffer: &mut [u8]) -> Result<(), FileDownloadError> {
        // Sections of relocatable files may share an address, prefer the one
        // handed out last.
        let section = self.sections[..self.next]
            .iter()
            .rev()
            .chain(&self.sections[self.next..])
            .find(|section| section.address == address)
            .filter(|section| section.data.len() >= buffer.len())
            .ok_or(FileDownloadError::SectionUnavailable {
                address,
                length: buffer.len() as u64,
            })?;

        buffer.copy_from_slice(&section.data[..buffer.len()]);

        Ok(())
    }

    fn entry_point(&self) -> u64 {
        self.entry
    }
}

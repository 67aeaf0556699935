use crate::architecture::riscv::RiscvError;
use crate::config::ConfigError;
use crate::flashing::FileDownloadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("A RISC-V debug module access failed")]
    Riscv(#[from] RiscvError),
    #[error("Loading the image failed")]
    FileDownload(#[from] FileDownloadError),
    #[error("Unable to load the testbench configuration")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

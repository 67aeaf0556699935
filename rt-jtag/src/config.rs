//! Testbench configuration.
//!
//! Every knob has a default matching the Verilator testbench, so an empty YAML
//! document is a valid configuration.

use std::{fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

/// Expected IDCODE of the SoC TAP.
pub const DEFAULT_IDCODE: u32 = 0xFEED_C0D3;

/// Error while loading a [`TestbenchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read the configuration file")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the configuration")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of the JTAG driver and the self tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbenchConfig {
    /// System clock half periods per TCK phase.
    pub clock_period: u32,
    /// Run-Test/Idle cycles before the first DMI read result is collected.
    /// Doubles on every BUSY response.
    pub initial_backoff_cycles: u32,
    /// Cap on the number of BUSY retries of a single DMI read.
    /// `None` retries forever, like the Verilator testbench.
    pub max_dmi_retries: Option<u32>,
    /// Cap on busy-bit polling loops. `None` polls forever.
    pub max_poll_attempts: Option<u32>,
    /// Idle cycles granted to a system bus transfer before touching `sbdata0`.
    pub sba_wait_cycles: u32,
    /// ELF preload confirms completion every this many bytes.
    pub checkpoint_bytes: u32,
    pub expected_idcode: u32,
    pub memory_test: MemoryTestConfig,
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        Self {
            clock_period: 2,
            initial_backoff_cycles: 8,
            max_dmi_retries: None,
            max_poll_attempts: None,
            sba_wait_cycles: 10,
            checkpoint_bytes: 512,
            expected_idcode: DEFAULT_IDCODE,
            memory_test: MemoryTestConfig::default(),
        }
    }
}

/// Scratch-pad window exercised by the memory self test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTestConfig {
    pub base: u64,
    /// Size of the window in bytes.
    pub size: u64,
    /// Number of random words written and read back, on top of the fixed
    /// all-zeros and all-ones patterns.
    pub iterations: u32,
    pub seed: u64,
}

impl Default for MemoryTestConfig {
    fn default() -> Self {
        Self {
            base: 0x1000_0000,
            size: 0x4000,
            iterations: 64,
            seed: 0x5EED,
        }
    }
}

impl TestbenchConfig {
    /// Parse a YAML configuration and validate it.
    pub fn from_yaml_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path.as_ref())?;
        tracing::debug!("Loading testbench configuration from {:?}", path.as_ref());
        Self::from_yaml_reader(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_period == 0 {
            return Err(ConfigError::Invalid(
                "clock_period must be at least 1".to_owned(),
            ));
        }

        if self.initial_backoff_cycles == 0 {
            return Err(ConfigError::Invalid(
                "initial_backoff_cycles must be at least 1".to_owned(),
            ));
        }

        if self.checkpoint_bytes == 0 || self.checkpoint_bytes % 4 != 0 {
            return Err(ConfigError::Invalid(format!(
                "checkpoint_bytes ({}) must be a non-zero multiple of 4",
                self.checkpoint_bytes
            )));
        }

        self.memory_test.validate()
    }
}

impl MemoryTestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base % 4 != 0 || self.size < 4 || self.base.checked_add(self.size).is_none() {
            return Err(ConfigError::Invalid(format!(
                "memory test window {:#x}+{:#x} must be word aligned and hold at least one word",
                self.base, self.size
            )));
        }

        Ok(())
    }
}

use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::header::FULL_DISC_SIZE;

/// Engine settings.
///
/// These are format constants in practice, kept configurable so tests and
/// unusual disks can tighten or relax them. Missing JSON fields take their
/// default values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Byte boundary for file data and the filesystem table.
    pub alignment: u64,
    /// Largest image a plan may produce.
    #[serde(rename = "maxImageSize")]
    pub max_image_size: u64,
    /// Reject disks that fail the header and table plausibility checks.
    #[serde(rename = "sanityChecks")]
    pub sanity_checks: bool,
    /// Amount of data copied between progress updates and cancellation checks.
    #[serde(rename = "blockSize")]
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            alignment: 4,
            max_image_size: FULL_DISC_SIZE,
            sanity_checks: true,
            block_size: 0x10_0000,
        }
    }
}

impl Config {
    /// Load a Config from a JSON reader
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a Config from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::io(format!("cannot open config '{}'", path.display()), e))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn validate(&self) -> Result<()> {
        if self.alignment < 4 || !self.alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "alignment must be a power of two of at least 4, got {}",
                self.alignment
            )));
        }
        if self.max_image_size > u64::from(u32::MAX) + 1 {
            return Err(Error::Config(format!(
                "maximum image size {} is not addressable with 32-bit offsets",
                self.max_image_size
            )));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block size must not be zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.alignment, 4);
        assert_eq!(config.max_image_size, 1_459_978_240);
        assert!(config.sanity_checks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_reader(r#"{"alignment": 32768}"#.as_bytes()).unwrap();
        assert_eq!(config.alignment, 0x8000);
        assert_eq!(config.block_size, 0x10_0000);
    }

    #[test]
    fn test_rejects_bad_alignment() {
        assert!(matches!(
            Config::from_reader(r#"{"alignment": 6}"#.as_bytes()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_unaddressable_size() {
        let config = Config {
            max_image_size: 1 << 40,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

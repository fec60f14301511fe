//! # Configuration
//!
//! Store configuration with environment overrides and enforced floors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::{env_parse, next_power_of_two};

/// Default cap on a single value's length: 4 MiB.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;

/// Default logical bytes between framing checksums. Chosen so a section
/// plus its 4-byte checksum fills sixteen 4 KiB pages exactly.
pub const DEFAULT_CHECKSUM_INTERVAL: usize = 65532;

const MIN_MEM_PAGE_SIZE: usize = 4096;
const MIN_CHECKSUM_INTERVAL: usize = 1024;

/// Storage engine configuration.
///
/// `from_env` honors the `BRIMSTORE_*` variables; floors and caps are
/// applied by the store on startup via [`StoreConfig::clamped`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory where `.values` and `.toc` files are created.
    pub data_dir: PathBuf,

    /// Worker count for the memory writer and memory clearer pools.
    pub cores: usize,

    /// Largest accepted value length in bytes.
    pub max_value_size: usize,

    /// Capacity of a memory block's table-of-contents region.
    pub mem_toc_page_size: usize,

    /// Capacity of a memory block's value data region.
    pub mem_values_page_size: usize,

    /// Logical bytes between framing checksums in every on-disk file.
    pub checksum_interval: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let max_value_size = DEFAULT_MAX_VALUE_SIZE;
        let page = next_power_of_two((max_value_size + 4) as u64) as usize;
        Self {
            data_dir: PathBuf::from("."),
            cores: available_cores(),
            max_value_size,
            mem_toc_page_size: page,
            mem_values_page_size: page,
            checksum_interval: DEFAULT_CHECKSUM_INTERVAL,
        }
    }
}

impl StoreConfig {
    /// Build a configuration from the environment. Unset, malformed, or
    /// non-positive variables fall back to the derived defaults.
    pub fn from_env() -> Self {
        let cores = env_parse("BRIMSTORE_CORES")
            .filter(|&c: &usize| c > 0)
            .unwrap_or_else(available_cores);
        let max_value_size = env_parse("BRIMSTORE_MAX_VALUE_SIZE")
            .filter(|&v: &usize| v > 0)
            .unwrap_or(DEFAULT_MAX_VALUE_SIZE);
        let derived_page = next_power_of_two((max_value_size + 4) as u64) as usize;
        let mem_toc_page_size = env_parse("BRIMSTORE_MEM_TOC_PAGE_SIZE")
            .filter(|&v: &usize| v > 0)
            .unwrap_or(derived_page);
        let mem_values_page_size = env_parse("BRIMSTORE_MEM_VALUES_PAGE_SIZE")
            .filter(|&v: &usize| v > 0)
            .unwrap_or(derived_page);
        let checksum_interval = env_parse("BRIMSTORE_CHECKSUM_INTERVAL")
            .filter(|&v: &usize| v > 0)
            .unwrap_or(DEFAULT_CHECKSUM_INTERVAL);
        Self {
            data_dir: PathBuf::from("."),
            cores,
            max_value_size,
            mem_toc_page_size,
            mem_values_page_size,
            checksum_interval,
        }
    }

    /// Apply the documented floors and caps. The store calls this on
    /// startup, so hand-built configurations are brought into range too.
    pub fn clamped(mut self) -> Self {
        if self.cores < 1 {
            self.cores = 1;
        }
        if self.mem_toc_page_size < MIN_MEM_PAGE_SIZE {
            self.mem_toc_page_size = MIN_MEM_PAGE_SIZE;
        }
        if self.mem_values_page_size < MIN_MEM_PAGE_SIZE {
            self.mem_values_page_size = MIN_MEM_PAGE_SIZE;
        }
        // A value plus its length prefix must always fit a single block.
        if self.mem_values_page_size < self.max_value_size + 4 {
            self.mem_values_page_size =
                next_power_of_two((self.max_value_size + 4) as u64) as usize;
        }
        if self.checksum_interval < MIN_CHECKSUM_INTERVAL {
            self.checksum_interval = MIN_CHECKSUM_INTERVAL;
        } else if self.checksum_interval > u32::MAX as usize {
            self.checksum_interval = u32::MAX as usize;
        }
        self
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_range() {
        let config = StoreConfig::default();
        assert!(config.cores >= 1);
        assert_eq!(config.max_value_size, DEFAULT_MAX_VALUE_SIZE);
        assert!(config.mem_values_page_size >= config.max_value_size + 4);
        assert_eq!(config.checksum_interval, DEFAULT_CHECKSUM_INTERVAL);
    }

    #[test]
    fn clamped_applies_floors_and_caps() {
        let config = StoreConfig {
            data_dir: PathBuf::from("."),
            cores: 0,
            max_value_size: 100,
            mem_toc_page_size: 1,
            mem_values_page_size: 1,
            checksum_interval: 1,
        }
        .clamped();
        assert_eq!(config.cores, 1);
        assert_eq!(config.mem_toc_page_size, 4096);
        assert_eq!(config.mem_values_page_size, 4096);
        assert_eq!(config.checksum_interval, 1024);

        let config = StoreConfig {
            checksum_interval: usize::MAX,
            ..StoreConfig::default()
        }
        .clamped();
        assert_eq!(config.checksum_interval, u32::MAX as usize);
    }

    #[test]
    fn clamped_makes_room_for_max_value() {
        let config = StoreConfig {
            max_value_size: 1 << 20,
            mem_values_page_size: 8192,
            ..StoreConfig::default()
        }
        .clamped();
        assert!(config.mem_values_page_size >= config.max_value_size + 4);
    }
}

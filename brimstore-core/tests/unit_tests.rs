//! Unit tests for configuration discovery and request plumbing.

use bytes::Bytes;
use brimstore_core::config::{StoreConfig, DEFAULT_CHECKSUM_INTERVAL, DEFAULT_MAX_VALUE_SIZE};
use brimstore_core::utils::is_power_of_two;
use brimstore_core::{Error, WriteValue};

/// All environment-sensitive assertions live in one test so parallel test
/// threads never race on the process environment.
#[test]
fn config_from_env_overrides_and_fallbacks() {
    let clear = || {
        for name in [
            "BRIMSTORE_CORES",
            "BRIMSTORE_MAX_VALUE_SIZE",
            "BRIMSTORE_MEM_TOC_PAGE_SIZE",
            "BRIMSTORE_MEM_VALUES_PAGE_SIZE",
            "BRIMSTORE_CHECKSUM_INTERVAL",
        ] {
            std::env::remove_var(name);
        }
    };

    clear();
    let config = StoreConfig::from_env();
    assert!(config.cores >= 1);
    assert_eq!(config.max_value_size, DEFAULT_MAX_VALUE_SIZE);
    assert_eq!(config.checksum_interval, DEFAULT_CHECKSUM_INTERVAL);
    assert!(is_power_of_two(config.mem_toc_page_size as u64));
    assert!(config.mem_values_page_size >= config.max_value_size + 4);

    std::env::set_var("BRIMSTORE_CORES", "3");
    std::env::set_var("BRIMSTORE_MAX_VALUE_SIZE", "1000");
    std::env::set_var("BRIMSTORE_CHECKSUM_INTERVAL", "2048");
    let config = StoreConfig::from_env();
    assert_eq!(config.cores, 3);
    assert_eq!(config.max_value_size, 1000);
    // page defaults derive from the overridden max value size
    assert_eq!(config.mem_toc_page_size, 1024);
    assert_eq!(config.mem_values_page_size, 1024);
    assert_eq!(config.checksum_interval, 2048);
    // the store floor lifts the derived pages into range
    let clamped = config.clamped();
    assert_eq!(clamped.mem_toc_page_size, 4096);
    assert_eq!(clamped.mem_values_page_size, 4096);

    std::env::set_var("BRIMSTORE_CORES", "not a number");
    std::env::set_var("BRIMSTORE_MAX_VALUE_SIZE", "0");
    let config = StoreConfig::from_env();
    assert!(config.cores >= 1);
    assert_eq!(config.max_value_size, DEFAULT_MAX_VALUE_SIZE);

    clear();
}

#[test]
fn oversize_error_reports_both_lengths() {
    let err = Error::ValueTooLarge {
        length: 4097,
        max: 4096,
    };
    assert_eq!(err.to_string(), "value length of 4097 > 4096");
}

#[test]
fn write_value_carries_its_payload() {
    let w = WriteValue::new(0xAA, 0xBB, Bytes::from_static(b"payload"), 9);
    assert_eq!(&w.value[..], b"payload");
    assert_eq!(w.seq, 9);
    let rx = w.written_rx.clone();
    w.complete(Err(Error::KeyNotFound));
    drop(w);
    assert!(matches!(rx.recv().unwrap(), Err(Error::KeyNotFound)));
}

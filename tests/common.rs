use caskdb::Config;

/// Record overhead: checksum + key_len + value_len + seq + flags.
#[allow(unused)]
pub const RECORD_HEADER_SIZE: u64 = 18;

/// Config with tiny files and manual compaction, so tests control
/// rollover and merging deterministically.
#[allow(unused)]
pub fn tiny_config() -> Config {
    Config::default()
        .max_file_size(1_000)
        .number_of_records(10_000)
        .merge_disabled(true)
        .merge_threshold_per_file(0.5)
        .merge_threshold_file_number(2)
}

/// A value sized so that key + value + header hits `record_size` bytes.
#[allow(unused)]
pub fn value_of_record_size(key: &[u8], record_size: u64) -> Vec<u8> {
    let value_len = record_size - RECORD_HEADER_SIZE - key.len() as u64;
    vec![b'v'; value_len as usize]
}

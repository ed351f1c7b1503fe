use crate::bail;
use crate::error::{ErrorKind, TapsResult};

/// CRC-32 of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Returns `true` when `data` hashes to `expected`.
pub fn is_valid(data: &[u8], expected: u32) -> bool {
    checksum(data) == expected
}

/// Fails with [`ErrorKind::CorruptedData`] when `data` does not hash to `expected`.
pub fn verify(data: &[u8], expected: u32) -> TapsResult<()> {
    let actual = checksum(data);
    if actual != expected {
        bail!(
            ErrorKind::CorruptedData,
            "Checksum mismatch",
            format!("expected {expected}, computed {actual}")
        );
    }

    Ok(())
}

/// Parses a checksum transmitted as a decimal string, mapping garbage to corruption.
pub fn parse(value: &str) -> TapsResult<u32> {
    value.trim().parse::<u32>().map_err(|err| {
        crate::taps_error!(
            ErrorKind::CorruptedData,
            "Malformed checksum",
            format!("{value:?}: {err}")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_value() {
        assert_eq!(checksum(b"hello world"), 0x0d4a_1185);
    }

    #[test]
    fn detects_a_single_flipped_bit() {
        let data = b"some payload".to_vec();
        let crc = checksum(&data);
        assert!(is_valid(&data, crc));

        let mut corrupted = data.clone();
        corrupted[3] ^= 0x01;
        assert!(!is_valid(&corrupted, crc));
        assert_eq!(
            verify(&corrupted, crc).unwrap_err().kind(),
            ErrorKind::CorruptedData
        );
    }

    #[test]
    fn malformed_checksum_is_corruption() {
        assert_eq!(parse("123").unwrap(), 123);
        assert_eq!(parse("12a").unwrap_err().kind(), ErrorKind::CorruptedData);
    }
}

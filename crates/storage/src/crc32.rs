//! IEEE 802.3 CRC32 (reflected, poly 0xEDB88320, init/final XOR 0xFFFFFFFF),
//! the exact variant spec'd for page and WAL record checksums. `crc32fast`
//! already implements this table/SIMD-accelerated; we just pin the empty-span
//! special case the checksum testable property calls out.

/// CRC32 over `bytes`. An empty span always hashes to `0`, matching the
/// convention used for as-yet-unwritten pages.
pub fn crc32(bytes: &[u8]) -> u32 {
    if bytes.is_empty() {
        return 0;
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_span_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn known_vector() {
        // "123456789" is the standard CRC-32/ISO-HDLC check vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn is_stable_for_same_input() {
        let data = vec![0xAAu8; 4096];
        assert_eq!(crc32(&data), crc32(&data));
    }
}

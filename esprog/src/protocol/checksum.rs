//! Additive block checksum.
//!
//! The programmer firmware sums raw bytes into a `u32` and compares the
//! result with the value carried next to each payload. It is blind to byte
//! reordering; it is kept as-is to stay compatible with the device.

/// Wrapping 32-bit sum of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 6);
        assert_eq!(checksum(&[0xFF; 512]), 0xFF * 512);
    }

    #[test]
    fn test_checksum_blind_to_permutation() {
        // Known limitation: any reordering yields the same sum.
        let data = [0x10, 0x20, 0x30, 0x40, 0xAA];
        let mut reversed = data;
        reversed.reverse();
        let mut rotated = data;
        rotated.rotate_left(2);

        assert_eq!(checksum(&data), checksum(&reversed));
        assert_eq!(checksum(&data), checksum(&rotated));
    }

    #[test]
    fn test_checksum_wraps() {
        let data = vec![0xFF; (u32::MAX / 0xFF) as usize + 2];
        let expected = (0xFFu64 * data.len() as u64) as u32;
        assert_eq!(checksum(&data), expected);
    }
}

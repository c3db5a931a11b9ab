//! CRC-32 helpers used for ROM identification and save-state integrity checks

use crc::Crc;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Compute the CRC-32 (ISO-HDLC polynomial, the zlib/PNG variant) of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Incremental CRC-32 digest. Feeding a vector in arbitrary splits produces the same result as
/// a one-shot [`crc32`] over the concatenation.
pub struct Crc32Digest {
    digest: crc::Digest<'static, u32>,
}

impl Crc32Digest {
    #[must_use]
    pub fn new() -> Self {
        Self { digest: CRC32.digest() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    #[must_use]
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_check_value() {
        // The standard CRC-32 check value
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let bytes: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let expected = crc32(&bytes);

        for split in [1, 7, 256, 1000, 4095] {
            let mut digest = Crc32Digest::new();
            for chunk in bytes.chunks(split) {
                digest.update(chunk);
            }
            assert_eq!(digest.finalize(), expected, "split size {split}");
        }
    }
}

use crc::{Crc, CRC_32_CKSUM};

const CKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_CKSUM);

/// Checksum over `data`, bit-identical to the Linux `cksum` utility.
///
/// CRC-32 with polynomial 0x04C11DB7, zero initial value, no bit
/// reflection. After the data bytes, the unsigned input length is fed
/// through the same update step as a little-endian base-256 integer with
/// no leading zero bytes (a zero-length input contributes no length
/// bytes). The final register is complemented.
///
/// The server computes the same value over the decrypted upload and
/// returns it for comparison, so this must never drift from `cksum`:
/// `cksum(b"") == 0xFFFF_FFFF`.
pub fn cksum(data: &[u8]) -> u32 {
    let mut digest = CKSUM.digest();
    digest.update(data);

    // Length trailer: least-significant byte first, stop at the last
    // non-zero byte.
    let mut length = data.len();
    while length > 0 {
        digest.update(&[(length & 0xFF) as u8]);
        length >>= 8;
    }

    digest.finalize()
}

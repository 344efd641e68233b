/// Seed used for every checksum stored on flash.
pub const CRC16_SEED: u16 = 0xFFFF;

const POLYNOMIAL: u16 = 0x1021;

static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-16/CCITT (polynomial 0x1021, MSB first, no final xor) continuing from `crc`.
///
/// Bank headers and record payloads are both protected by this checksum, always
/// seeded with [`CRC16_SEED`].
pub fn crc16(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ TABLE[((crc >> 8) ^ byte as u16) as usize]
    })
}

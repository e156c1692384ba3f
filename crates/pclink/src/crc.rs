//! CRC-8 (polynomial 0x07) used to protect frames on byte-stream links.
//!
//! The checksum is MSB first with no reflection and no final xor. Feeding the
//! transmitted checksum byte back into the accumulator yields zero, which is how
//! received trailers are validated.

const POLY: u8 = 0x07;

const TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u8;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 0x80 != 0 { (c << 1) ^ POLY } else { c << 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Crc8 {
    value: u8,
}

impl Crc8 {
    pub fn new() -> Crc8 {
        Crc8::default()
    }

    /// Reset the accumulator to `seed`.
    pub fn clear(&mut self, seed: u8) {
        self.value = seed;
    }

    pub fn add_byte(&mut self, byte: u8) {
        self.value = TABLE[(self.value ^ byte) as usize];
    }

    pub fn add_block(&mut self, data: &[u8]) {
        for &b in data {
            self.add_byte(b);
        }
    }

    pub fn get(&self) -> u8 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        let mut crc = Crc8::new();
        crc.add_block(b"123456789");
        assert_eq!(crc.get(), 0xf4);
    }

    #[test]
    fn appended_checksum_cancels() {
        let mut crc = Crc8::new();
        crc.add_block(&[0x02, b'F', b'O', b'O', 0x00]);
        let sum = crc.get();
        crc.add_byte(sum);
        assert_eq!(crc.get(), 0);
    }

    #[test]
    fn seeded_clear() {
        let mut crc = Crc8::new();
        crc.add_byte(0x55);
        crc.clear(0xff);
        assert_eq!(crc.get(), 0xff);
        crc.add_byte(0xff);
        assert_eq!(crc.get(), 0);
    }
}

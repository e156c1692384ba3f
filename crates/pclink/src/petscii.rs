//! Conversion between host file names and the 8-bit PETSCII alphabet.
//!
//! Host names are Unicode. Every code point maps to exactly one PETSCII symbol,
//! falling back to `0xa4` (the underscore lookalike) when nothing fits. The reverse
//! direction is total: symbols without a natural Unicode counterpart land in the
//! private use block `U+E100..U+E1FF`, and a host name may spell such a code point
//! with a `\uXXXX` or `\UXXXXXXXX` escape.

/// Placeholder for unmappable code points.
pub const UNMAPPED: u8 = 0xa4;

const PRIVATE_BASE: u32 = 0xe100;

/// Symbols outside the plain ASCII ranges, as `(petscii, code point)` pairs.
const SPECIAL: [(u8, u32); 44] = [
    (0x2f, 0x2215),
    (0x5b, 0x5b),
    (0x5c, 0xa3),
    (0x5d, 0x5d),
    (0x5e, 0x2191),
    (0x5f, 0x2190),
    (0xa0, 0xa0),
    (0xa1, 0x258c),
    (0xa2, 0x2584),
    (0xa3, 0x2594),
    (0xa4, 0x5f),
    (0xa5, 0x258f),
    (0xa6, 0x2592),
    (0xa7, 0x2595),
    (0xa8, 0x1fb8f),
    (0xa9, 0x1fb99),
    (0xaa, 0x1fb87),
    (0xab, 0x251c),
    (0xac, 0x2597),
    (0xad, 0x2514),
    (0xae, 0x2510),
    (0xaf, 0x2582),
    (0xb0, 0x250c),
    (0xb1, 0x2534),
    (0xb2, 0x252c),
    (0xb3, 0x2524),
    (0xb4, 0x258e),
    (0xb5, 0x258d),
    (0xb6, 0x1fb88),
    (0xb7, 0x1fb82),
    (0xb8, 0x1fb83),
    (0xb9, 0x2583),
    (0xba, 0x2713),
    (0xbb, 0x2596),
    (0xbc, 0x259d),
    (0xbd, 0x2518),
    (0xbe, 0x2598),
    (0xbf, 0x259a),
    (0xc0, 0x2500),
    (0xdb, 0x253c),
    (0xdc, 0x1fb8c),
    (0xdd, 0x2502),
    (0xdf, 0x1fb98),
    (0xff, 0x03c0),
];

/// Latin-1 supplement and Latin Extended-A/B, starting at `U+00C0`.
const LATIN1: [u8; 372] = [
    0xc1, 0xc1, 0xc1, 0xc1, 0xc1, 0xc1, 0xa4, 0xc3, 0xc5, 0xc5, 0xc5, 0xc5,
    0xc9, 0xc9, 0xc9, 0xc9, 0xa4, 0xce, 0xcf, 0xcf, 0xcf, 0xcf, 0xcf, 0xa4,
    0xa4, 0xd5, 0xd5, 0xd5, 0xd5, 0xd9, 0xa4, 0xa4, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0xa4, 0x43, 0x45, 0x45, 0x45, 0x45, 0x49, 0x49, 0x49, 0x49,
    0xa4, 0x4e, 0x4f, 0x4f, 0x4f, 0x4f, 0x4f, 0xa4, 0xa4, 0x55, 0x55, 0x55,
    0x55, 0x59, 0xa4, 0x59, 0xc1, 0x41, 0xc1, 0x41, 0xc1, 0x41, 0xc3, 0x43,
    0xc3, 0x43, 0xc3, 0x43, 0xc3, 0x43, 0xc4, 0x44, 0xa4, 0xa4, 0xc5, 0x45,
    0xc5, 0x45, 0xc5, 0x45, 0xc5, 0x45, 0xc5, 0x45, 0xc7, 0x47, 0xc7, 0x47,
    0xc7, 0x47, 0xc7, 0x47, 0xc8, 0x48, 0xa4, 0xa4, 0xc9, 0x49, 0xc9, 0x49,
    0xc9, 0x49, 0xc9, 0x49, 0xc9, 0xa4, 0xa4, 0xa4, 0xca, 0x4a, 0xcb, 0x4b,
    0xa4, 0xcc, 0x4c, 0xcc, 0x4c, 0xcc, 0x4c, 0xa4, 0xa4, 0xa4, 0xa4, 0xce,
    0x4e, 0xce, 0x4e, 0xce, 0x4e, 0xa4, 0xa4, 0xa4, 0xcf, 0x4f, 0xcf, 0x4f,
    0xcf, 0x4f, 0xa4, 0xa4, 0xd2, 0x52, 0xd2, 0x52, 0xd2, 0x52, 0xd3, 0x53,
    0xd3, 0x53, 0xd3, 0x53, 0xd3, 0x53, 0xd4, 0x54, 0xd4, 0x54, 0xa4, 0xa4,
    0xd5, 0x55, 0xd5, 0x55, 0xd5, 0x55, 0xd5, 0x55, 0xd5, 0x55, 0xd5, 0x55,
    0xd7, 0x57, 0xd9, 0x59, 0xd9, 0xda, 0x5a, 0xda, 0x5a, 0xda, 0x5a, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xcf, 0x4f, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xd5,
    0x55, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xc1, 0x41, 0xc9, 0x49, 0xcf, 0x4f, 0xd5,
    0x55, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xc7, 0x47, 0xcb, 0x4b, 0xcf, 0x4f,
    0xa4, 0xa4, 0xa4, 0xa4, 0x4a, 0xa4, 0xa4, 0xa4, 0xc7, 0x47, 0xa4, 0xa4,
    0xce, 0x4e, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xc1, 0x41, 0xc1, 0x41,
    0xc5, 0x45, 0xc5, 0x45, 0xc9, 0x49, 0xc9, 0x49, 0xcf, 0x4f, 0xcf, 0x4f,
    0xd2, 0x52, 0xd2, 0x52, 0xd5, 0x55, 0xd5, 0x55, 0xd3, 0x53, 0xd4, 0x54,
    0xa4, 0xa4, 0xc8, 0x48, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xc1, 0x41,
    0xc5, 0x45, 0xa4, 0xa4, 0xa4, 0xa4, 0xcf, 0x4f, 0xa4, 0xa4, 0xd9, 0x59,
];

/// Latin Extended Additional, starting at `U+1E00`.
const LATIN2: [u8; 250] = [
    0xc1, 0x41, 0xc2, 0x42, 0xc2, 0x42, 0xc2, 0x42, 0xa4, 0xa4, 0xc4, 0x44,
    0xc4, 0x44, 0xc4, 0x44, 0xc4, 0x44, 0xc4, 0x44, 0xa4, 0xa4, 0xa4, 0xa4,
    0xc5, 0x45, 0xc5, 0x45, 0xa4, 0xa4, 0xc6, 0x46, 0xc7, 0x47, 0xc8, 0x48,
    0xc8, 0x48, 0xc8, 0x48, 0xc8, 0x48, 0xc8, 0x48, 0xc9, 0x49, 0xa4, 0xa4,
    0xcb, 0x4b, 0xcb, 0x4b, 0xcb, 0x4b, 0xcc, 0x4c, 0xa4, 0xa4, 0xcc, 0x4c,
    0xcc, 0x4c, 0xcd, 0x4d, 0xcd, 0x4d, 0xcd, 0x4d, 0xce, 0x4e, 0xce, 0x4e,
    0xce, 0x4e, 0xce, 0x4e, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xd0, 0x50, 0xd0, 0x50, 0xd2, 0x52, 0xd2, 0x52, 0xa4, 0xa4, 0xd2, 0x52,
    0xd3, 0x53, 0xd3, 0x53, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xd4, 0x54,
    0xd4, 0x54, 0xd4, 0x54, 0xd4, 0x54, 0xd5, 0x55, 0xd5, 0x55, 0xd5, 0x55,
    0xa4, 0xa4, 0xa4, 0xa4, 0xd6, 0x56, 0xd6, 0x56, 0xd7, 0x57, 0xd7, 0x57,
    0xd7, 0x57, 0xd7, 0x57, 0xd7, 0x57, 0xd8, 0x58, 0xd8, 0x58, 0xd9, 0x59,
    0xda, 0x5a, 0xda, 0x5a, 0xda, 0x5a, 0x48, 0x54, 0x57, 0x59, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xc1, 0x41, 0xc1, 0x41, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xc5, 0x45, 0xc5, 0x45, 0xc5, 0x45, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xc9, 0x49, 0xc9, 0x49,
    0xcf, 0x4f, 0xcf, 0x4f, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xd5, 0x55, 0xd5, 0x55, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4, 0xa4,
    0xa4, 0xa4, 0xd9, 0x59, 0xd9, 0x59, 0xd9, 0x59, 0xd9, 0x59,
];

/// Map a single Unicode code point to PETSCII.
pub fn from_code_point(w: u32) -> u8 {
    match w {
        0x20..=0x40 => w as u8,
        0x41..=0x5a => (w + 0x80) as u8,
        0x61..=0x7a => (w - 0x20) as u8,
        0xe100..=0xe1ff => (w - PRIVATE_BASE) as u8,
        _ => {
            if let Some(&(c, _)) = SPECIAL.iter().find(|&&(_, u)| u == w) {
                return c;
            }
            let latin = |base: u32, table: &[u8]| {
                w.checked_sub(base)
                    .and_then(|i| table.get(i as usize))
                    .copied()
            };
            latin(0xc0, &LATIN1)
                .or_else(|| latin(0x1e00, &LATIN2))
                .unwrap_or(UNMAPPED)
        }
    }
}

/// Map a PETSCII symbol to the Unicode character used in host names.
pub fn to_char(c: u8) -> char {
    let w = match c {
        0x20..=0x40 if c != 0x2f => c as u32,
        0x41..=0x5a => c as u32 + 0x20,
        0xc1..=0xda => c as u32 - 0x80,
        _ => SPECIAL
            .iter()
            .find(|&&(p, _)| p == c)
            .map(|&(_, u)| u)
            .unwrap_or(PRIVATE_BASE + c as u32),
    };
    char::from_u32(w).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Convert a host file name to PETSCII, honouring `\u` escapes.
pub fn from_host(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len());
    let mut rest = name;
    while let Some(c) = rest.chars().next() {
        let (w, used) = match c {
            '\\' => escape(rest).unwrap_or(('\\' as u32, 1)),
            c => (c as u32, c.len_utf8()),
        };
        out.push(from_code_point(w));
        rest = &rest[used..];
    }
    out
}

/// Convert PETSCII bytes to a host string.
pub fn to_host(bytes: &[u8]) -> String {
    bytes.iter().map(|&c| to_char(c)).collect()
}

// `\uXXXX` or `\UXXXXXXXX`, lowercase hex only
fn escape(s: &str) -> Option<(u32, usize)> {
    let b = s.as_bytes();
    let digits = match b.get(1) {
        Some(b'u') => 4,
        Some(b'U') => 8,
        _ => return None,
    };
    let hex = b.get(2..2 + digits)?;
    let mut w = 0u32;
    for &h in hex {
        let d = match h {
            b'0'..=b'9' => h - b'0',
            b'a'..=b'f' => h - b'a' + 10,
            _ => return None,
        };
        w = (w << 4) | d as u32;
    }
    Some((w, 2 + digits))
}

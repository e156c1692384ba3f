//! Deterministic shortening of long PETSCII names to 16 symbols.
//!
//! Each stage removes an evenly spread subset of one class of characters and the
//! pipeline stops as soon as the name fits:
//!
//! 1. separators (anything but letters and digits); a letter following a removed
//!    separator is shifted so word boundaries stay visible,
//! 2. unshifted vowels,
//! 3. shifted vowels,
//! 4. the first of two repeated characters,
//! 5. any character but the first.
//!
//! The spreading uses a Bresenham style accumulator, so deletions are distributed
//! across the whole name instead of eating one end of it.

use crate::fcall::NAME_LEN;

const VOWELS: &[u8] = b"AEIOU";

/// Shorten `name` to at most [`NAME_LEN`] symbols.
pub fn shorten(name: &[u8]) -> Vec<u8> {
    let mut s = name.to_vec();
    if s.len() <= NAME_LEN {
        return s;
    }
    s = delete_separators(&s);
    if s.len() <= NAME_LEN {
        return s;
    }
    s = thin(&s, |s, i| i > 0 && VOWELS.contains(&s[i]));
    if s.len() <= NAME_LEN {
        return s;
    }
    s = thin(&s, |s, i| i > 0 && VOWELS.iter().any(|&v| s[i] == v | 0x80));
    if s.len() <= NAME_LEN {
        return s;
    }
    s = thin(&s, |s, i| s.get(i + 1) == Some(&s[i]));
    if s.len() <= NAME_LEN {
        return s;
    }
    thin(&s, |_, i| i > 0)
}

fn is_separator(c: u8) -> bool {
    !(b'A'..=b'Z').contains(&(c & 0x7f)) && !c.is_ascii_digit()
}

/// Spreads `min(excess, candidates)` deletions over the candidates.
struct Spread {
    count: usize,
    amount: usize,
    acc: usize,
}

impl Spread {
    fn new(len: usize, count: usize) -> Spread {
        Spread {
            count,
            amount: len.saturating_sub(NAME_LEN).min(count),
            acc: count / 2,
        }
    }

    fn delete_next(&mut self) -> bool {
        self.acc += self.amount;
        if self.acc >= self.count {
            self.acc -= self.count;
            return true;
        }
        false
    }
}

fn delete_separators(s: &[u8]) -> Vec<u8> {
    let count = s.iter().filter(|&&c| is_separator(c)).count();
    let mut spread = Spread::new(s.len(), count);
    let mut out = Vec::with_capacity(s.len());
    let mut shift = false;
    for &c in s {
        if std::mem::take(&mut shift) && c.is_ascii_uppercase() {
            out.push(c | 0x80);
            continue;
        }
        if is_separator(c) && spread.delete_next() {
            shift = true;
            continue;
        }
        out.push(c);
    }
    out
}

fn thin<F: Fn(&[u8], usize) -> bool>(s: &[u8], candidate: F) -> Vec<u8> {
    let count = (0..s.len()).filter(|&i| candidate(s, i)).count();
    let mut spread = Spread::new(s.len(), count);
    let mut out = Vec::with_capacity(s.len());
    for (i, &c) in s.iter().enumerate() {
        if candidate(s, i) && spread.delete_next() {
            continue;
        }
        out.push(c);
    }
    out
}

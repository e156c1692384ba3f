//! Legacy file name handling: wildcard matching, request parsing and the
//! generation of host names for files the client creates.

use crate::{
    fcall::{NAME_LEN, SHIFTED_SPACE, TYPE_LEN},
    petscii,
};

/// How file types map onto host file name extensions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NameConversion {
    /// `name.type`; a dot in a host name separates the type.
    #[default]
    ForceDot,
    /// `name,type`; new files get a comma, existing dots still separate types.
    ForceComma,
    /// Everything without an explicit `,type` is a PRG file; dots are part of the name.
    IgnoreDot,
}

/// Match `name` against a pattern with `?` (one symbol) and `*` (any tail) wildcards.
pub fn matchname(name: &[u8], pattern: &[u8]) -> bool {
    let mut i = 0;
    loop {
        match (name.get(i), pattern.get(i)) {
            (None, None) => return true,
            (Some(a), Some(b)) if a == b || *b == b'?' => i += 1,
            _ => break,
        }
    }

    let (name, pattern) = (&name[i..], &pattern[i..]);
    match pattern.split_first() {
        Some((b'*', rest)) => {
            rest.is_empty() || (0..name.len()).any(|k| matchname(&name[k..], rest))
        }
        _ => false,
    }
}

/// A request of the form `[path:]name[,type[,mode]]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub name: Vec<u8>,
    /// The requested type, or the default type when none was given
    pub filetype: Vec<u8>,
    pub mode: Option<u8>,
}

/// Split a request into name, type and mode.
///
/// `separator` starts the type field (`,` for opens, `=` for patterns). A zero
/// separator parses a single path component: `/` ends it and no type is read.
/// `:` anywhere restarts the parse. One letter types are expanded when a
/// `default_type` is given: `S`, `P`, `U`, `B` and `J` become `SEQ`, `PRG`,
/// `USR`, `DIR` and `LNK`. A lone `R`, `W`, `A` or `M` in the type field is taken
/// as the mode.
pub fn parse_filename(s: &[u8], separator: u8, default_type: Option<&[u8]>) -> ParsedName {
    let mut name = Vec::with_capacity(NAME_LEN);
    let mut filetype: Option<Vec<u8>> = None;
    let mut mode = None;
    let mut state = 0;

    for &c in s {
        if c == b':' {
            name.clear();
            filetype = None;
            mode = None;
            state = 0;
            continue;
        }
        if c == b'/' && separator == 0 {
            break;
        }
        match state {
            0 if separator != 0 && c == separator => {
                filetype = Some(Vec::with_capacity(TYPE_LEN));
                state = 1;
            }
            0 if c == b',' || c == b'=' => state = 3,
            0 => {
                if name.len() < NAME_LEN {
                    name.push(c);
                }
            }
            1 if c == b',' => state = 2,
            1 if c == b'=' => state = 3,
            1 => {
                if let Some(t) = filetype.as_mut().filter(|t| t.len() < TYPE_LEN) {
                    t.push(c);
                }
            }
            2 if c == b',' || c == b'=' => state = 3,
            2 => {
                mode = Some(c);
                state = 3;
            }
            _ => {}
        }
    }

    if let Some(t) = filetype.take_if(|t| t.len() == 1 && mode.is_none()) {
        match t[0] {
            c @ (b'W' | b'R' | b'A' | b'M') => {
                mode = Some(c);
                if c == b'W' && default_type.is_some_and(|d| d.first() == Some(&b'*')) {
                    filetype = Some(vec![b'S']);
                }
            }
            _ => filetype = Some(t),
        }
    }

    let filetype = match (filetype, default_type) {
        (Some(t), Some(_)) if t.len() == 1 => match t[0] {
            b'S' => b"SEQ".to_vec(),
            b'P' => b"PRG".to_vec(),
            b'U' => b"USR".to_vec(),
            b'B' => b"DIR".to_vec(),
            b'J' => b"LNK".to_vec(),
            _ => vec![b':'],
        },
        (Some(t), Some(_)) => t,
        (None, Some(d)) => d.to_vec(),
        (_, None) => Vec::new(),
    };

    ParsedName {
        name,
        filetype,
        mode,
    }
}

fn is_dot_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// Build the host name for a legacy name and type that has no host counterpart yet.
pub fn host_name(name: &[u8], filetype: &[u8], conversion: NameConversion) -> String {
    let base = petscii::to_host(&name[..name.len().min(NAME_LEN)]);

    let mut dot = if conversion == NameConversion::ForceDot {
        '.'
    } else {
        ','
    };
    let mut extension = match conversion {
        NameConversion::IgnoreDot => filetype != b"PRG",
        _ => {
            let inner = base.strip_prefix('.').unwrap_or(&base);
            !filetype.is_empty() || inner.contains('.') || is_dot_name(&base)
        }
    };

    let padded = filetype.len() == TYPE_LEN && filetype[1..] == [SHIFTED_SPACE; 2];
    let suffix = petscii::to_host(if padded {
        &filetype[..1]
    } else {
        &filetype[..filetype.len().min(TYPE_LEN)]
    });

    loop {
        let mut out = base.clone();
        if extension {
            out.push(dot);
            out.push_str(&suffix);
        }
        if !is_dot_name(&out) {
            return out;
        }
        extension = true;
        dot = ',';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards() {
        assert!(matchname(b"FOO", b"F?O"));
        assert!(matchname(b"FOO", b"F*"));
        assert!(!matchname(b"FOO", b"BAR"));
        assert!(matchname(b"", b"*"));
        assert!(!matchname(b"ANY", b"?"));
        assert!(matchname(b"FOO", b"F*O"));
        assert!(matchname(b"FOO", b"FOO*"));
        assert!(!matchname(b"F", b"F*X"));
        assert!(!matchname(b"FO", b"FO?"));
    }

    #[test]
    fn parse_name_type_mode() {
        let p = parse_filename(b"GAME,P,R", b',', Some(b"*"));
        assert_eq!(p.name, b"GAME");
        assert_eq!(p.filetype, b"PRG");
        assert_eq!(p.mode, Some(b'R'));

        let p = parse_filename(b"0:FOO=SEQ", b'=', Some(b"*"));
        assert_eq!(p.name, b"FOO");
        assert_eq!(p.filetype, b"SEQ");
        assert_eq!(p.mode, None);
    }

    #[test]
    fn lone_mode_letter() {
        let p = parse_filename(b"DATA,W", b',', Some(b"*"));
        assert_eq!(p.filetype, b"SEQ");
        assert_eq!(p.mode, Some(b'W'));

        let p = parse_filename(b"DATA,W", b',', Some(b"PRG"));
        assert_eq!(p.filetype, b"PRG");
        assert_eq!(p.mode, Some(b'W'));

        let p = parse_filename(b"DATA,A", b',', Some(b"*"));
        assert_eq!(p.filetype, b"*");
        assert_eq!(p.mode, Some(b'A'));
    }

    #[test]
    fn unknown_letter_type_matches_nothing() {
        let p = parse_filename(b"X,Q", b',', Some(b"*"));
        assert_eq!(p.filetype, b":");
    }

    #[test]
    fn colon_restarts_and_slash_ends_component() {
        assert_eq!(parse_filename(b"A:B", b',', None).name, b"B");
        assert_eq!(parse_filename(b"DIR/SUB", 0, None).name, b"DIR");
        assert_eq!(
            parse_filename(b"THIS NAME IS TOO LONG", b',', None).name.len(),
            NAME_LEN
        );
    }

    #[test]
    fn host_names() {
        assert_eq!(host_name(b"GAME", b"PRG", NameConversion::ForceDot), "game.prg");
        assert_eq!(host_name(b"GAME", b"PRG", NameConversion::ForceComma), "game,prg");
        assert_eq!(host_name(b"GAME", b"PRG", NameConversion::IgnoreDot), "game");
        assert_eq!(host_name(b"GAME", b"SEQ", NameConversion::IgnoreDot), "game,seq");
        assert_eq!(host_name(&[0xc7, b'A'], b"", NameConversion::ForceDot), "Ga");
        assert_eq!(
            host_name(b"X", &[b'S', SHIFTED_SPACE, SHIFTED_SPACE], NameConversion::ForceDot),
            "x.s"
        );
    }

    #[test]
    fn host_name_never_dot_entries() {
        assert_eq!(host_name(b".", b"", NameConversion::ForceDot), ".,");
        assert_eq!(host_name(b"..", b"", NameConversion::ForceDot), "...");
        assert_eq!(host_name(b"A.B", b"", NameConversion::ForceDot), "a.b.");
    }
}

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Character encodings supported by character classes.
///
/// A character class is always built for a specific encoding, which
/// determines the byte sequences accepted for each code point. Classes built
/// for different encodings can't be combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Latin1,
    Ascii,
}

/// Error returned when parsing the name of an encoding that is not
/// supported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown encoding `{0}`")]
pub struct UnknownEncoding(pub String);

impl Encoding {
    /// Returns the canonical name of the encoding, which is the name stored
    /// in class files and used for naming directories of pre-built classes.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf_8",
            Encoding::Utf16Le => "utf_16_le",
            Encoding::Utf16Be => "utf_16_be",
            Encoding::Utf32Le => "utf_32_le",
            Encoding::Utf32Be => "utf_32_be",
            Encoding::Latin1 => "latin_1",
            Encoding::Ascii => "ascii",
        }
    }

    /// Encodes a single code point.
    ///
    /// Returns [`None`] if the code point can't be represented in this
    /// encoding. Surrogates (`U+D800..=U+DFFF`) are not encodable in any
    /// encoding.
    pub fn encode(&self, code_point: u32) -> Option<Vec<u8>> {
        let ch = char::from_u32(code_point)?;
        let mut out = Vec::with_capacity(4);
        self.encode_char(ch, &mut out)?;
        Some(out)
    }

    /// Encodes a string, which is usually a single character, but can also
    /// be a grapheme formed by multiple code points (e.g. CR LF).
    ///
    /// Returns [`None`] if any of the characters can't be represented in
    /// this encoding.
    pub fn encode_str(&self, s: &str) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(s.len() * 2);
        for ch in s.chars() {
            self.encode_char(ch, &mut out)?;
        }
        Some(out)
    }

    fn encode_char(&self, ch: char, out: &mut Vec<u8>) -> Option<()> {
        let mut units = [0_u16; 2];
        match self {
            Encoding::Utf8 => {
                let mut buf = [0_u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            Encoding::Utf16Le => {
                for unit in ch.encode_utf16(&mut units) {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Encoding::Utf16Be => {
                for unit in ch.encode_utf16(&mut units) {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Encoding::Utf32Le => {
                out.extend_from_slice(&(ch as u32).to_le_bytes())
            }
            Encoding::Utf32Be => {
                out.extend_from_slice(&(ch as u32).to_be_bytes())
            }
            Encoding::Latin1 => out.push(u8::try_from(ch as u32).ok()?),
            Encoding::Ascii => {
                if !ch.is_ascii() {
                    return None;
                }
                out.push(ch as u8)
            }
        }
        Some(())
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    /// Parses an encoding name. Names are case-insensitive, and dashes and
    /// underscores are ignored, so `UTF-8`, `utf8` and `utf_8` are all
    /// accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "utf8" | "u8" => Ok(Encoding::Utf8),
            "utf16le" => Ok(Encoding::Utf16Le),
            "utf16be" => Ok(Encoding::Utf16Be),
            "utf32le" => Ok(Encoding::Utf32Le),
            "utf32be" => Ok(Encoding::Utf32Be),
            "latin1" | "iso88591" | "l1" => Ok(Encoding::Latin1),
            "ascii" | "usascii" => Ok(Encoding::Ascii),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}

/*! Binary file format for character classes.

All integers are little-endian.

```text
header:       magic:u16  name_len:u16  states:u16  transition_states:u16
              leaf_states:u16  name:[u8; name_len]
transitions:  { state:u16  count:u16  { dest:u16  code } * count } * transition_states
leafs:        { state:u16  code } * leaf_states
checksum:     u16
```

Codes are stored in the serial form produced by [`Code::to_serial`], an
indicator byte followed by the bytes it announces. The checksum is the
CRC32 of every preceding byte, modulo 65521.
*/

use std::fs;
use std::io;
use std::path::Path;

use log::{error, warn};
use nom::bytes::complete::take;
use nom::combinator::map_opt;
use nom::error::ErrorKind;
use nom::multi::count;
use nom::number::complete::{le_u16, u8};
use nom::sequence::tuple;
use nom::IResult;
use thiserror::Error;

use crate::charclass::encoding::UnknownEncoding;
use crate::charclass::{self, CharClass, Code, Encoding, State};

/// Identifies the file format and its version.
pub(crate) const MAGIC: u16 = 0x7EB3;

/// Classes with more states than this are not written to files.
pub(crate) const FILE_STATE_LIMIT: usize = 65521;

/// Modulus applied to the CRC32 to obtain the 16-bits checksum.
const CHECKSUM_MODULUS: u32 = 65521;

/// Errors returned while loading a class file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("checksum mismatch (expected {expected:#06x}, found {found:#06x})")]
    ChecksumMismatch { expected: u16, found: u16 },

    #[error("unsupported file format version {0:#06x}")]
    UnsupportedVersion(u16),

    #[error(transparent)]
    UnknownEncoding(#[from] UnknownEncoding),

    #[error("truncated class file")]
    Truncated,

    #[error("corrupt class file: {0}")]
    Corrupt(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reasons for refusing to serialize a class.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotPersistable {
    #[error("too many states ({0})")]
    TooManyStates(usize),

    #[error("state {0} is non-deterministic")]
    NonDeterministic(usize),
}

impl CharClass {
    /// Serializes the class.
    ///
    /// The class is serialized in normalized graph form, without modifying
    /// `self`. Classes that are too large, or where a state's leaf overlaps
    /// one of its transitions, can't be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NotPersistable> {
        let mut class = self.clone();
        class.to_tree();
        class.to_graph();

        if class.states.len() > FILE_STATE_LIMIT {
            return Err(NotPersistable::TooManyStates(class.states.len()));
        }

        for (id, state) in class.states.iter().enumerate() {
            if let Some(leaf) = state.leaf {
                if state.transitions.keys().any(|code| code.intersects(&leaf)) {
                    return Err(NotPersistable::NonDeterministic(id));
                }
            }
        }

        let name = class.encoding.name().as_bytes();
        let transition_states =
            class.states.iter().filter(|s| !s.transitions.is_empty());
        let leaf_states = class.states.iter().filter(|s| s.leaf.is_some());

        // All these values are below FILE_STATE_LIMIT.
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(class.states.len() as u16).to_le_bytes());
        out.extend_from_slice(&(transition_states.count() as u16).to_le_bytes());
        out.extend_from_slice(&(leaf_states.count() as u16).to_le_bytes());
        out.extend_from_slice(name);

        for (id, state) in class.states.iter().enumerate() {
            if state.transitions.is_empty() {
                continue;
            }
            out.extend_from_slice(&(id as u16).to_le_bytes());
            out.extend_from_slice(
                &(state.transitions.len() as u16).to_le_bytes(),
            );
            for (code, dest) in state.transitions.iter() {
                out.extend_from_slice(&(*dest as u16).to_le_bytes());
                write_code(&mut out, code);
            }
        }

        for (id, leaf) in class.leafs() {
            out.extend_from_slice(&(id as u16).to_le_bytes());
            write_code(&mut out, &leaf);
        }

        out.extend_from_slice(&checksum(&out).to_le_bytes());

        Ok(out)
    }

    /// Deserializes a class produced by [`CharClass::to_bytes`].
    ///
    /// The checksum is verified before anything else is read.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < 2 {
            return Err(LoadError::Truncated);
        }

        let (body, tail) = data.split_at(data.len() - 2);
        let found = u16::from_le_bytes([tail[0], tail[1]]);
        let expected = checksum(body);

        if found != expected {
            return Err(LoadError::ChecksumMismatch { expected, found });
        }

        let (input, (magic, name_len, state_count, trans_count, leaf_count)) =
            tuple((le_u16, le_u16, le_u16, le_u16, le_u16))(body)
                .map_err(parse_error)?;

        if magic != MAGIC {
            return Err(LoadError::UnsupportedVersion(magic));
        }

        let (input, name) =
            take::<_, _, nom::error::Error<&[u8]>>(name_len)(input)
                .map_err(parse_error)?;

        let encoding: Encoding = std::str::from_utf8(name)
            .map_err(|_| LoadError::Corrupt("encoding name is not UTF-8"))?
            .parse()?;

        let (input, transitions) =
            count(transition_record, trans_count as usize)(input)
                .map_err(parse_error)?;

        let (input, leafs) =
            count(leaf_record, leaf_count as usize)(input).map_err(parse_error)?;

        if !input.is_empty() {
            return Err(LoadError::Corrupt("trailing bytes after last record"));
        }

        let mut states = vec![State::default(); state_count as usize];

        for (id, record) in transitions {
            let state = states
                .get_mut(id as usize)
                .ok_or(LoadError::Corrupt("state index out of range"))?;
            for (dest, code) in record {
                if dest >= state_count {
                    return Err(LoadError::Corrupt("state index out of range"));
                }
                state.transitions.insert(code, dest as usize);
            }
        }

        for (id, leaf) in leafs {
            states
                .get_mut(id as usize)
                .ok_or(LoadError::Corrupt("state index out of range"))?
                .leaf = Some(leaf);
        }

        Ok(Self { encoding, states, is_tree: false })
    }

    /// Writes the class to a file, creating the parent directories if
    /// needed.
    ///
    /// Returns `false` without writing anything if the class can't be
    /// serialized, see [`CharClass::to_bytes`].
    pub fn to_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<bool, charclass::Error> {
        let path = path.as_ref();

        let bytes = match self.to_bytes() {
            Ok(bytes) => bytes,
            Err(reason) => {
                warn!(
                    "character class not written to {}: {}",
                    path.display(),
                    reason
                );
                return Ok(false);
            }
        };

        if path.is_file() {
            warn!(
                "character class file {} already exists, overwriting it",
                path.display()
            );
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, bytes)?;

        Ok(true)
    }

    /// Reads a class from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::from_bytes(data.as_slice()).map_err(|err| {
            error!("can't load character class {}: {}", path.display(), err);
            err
        })
    }
}

fn checksum(data: &[u8]) -> u16 {
    (crc32fast::hash(data) % CHECKSUM_MODULUS) as u16
}

fn write_code(out: &mut Vec<u8>, code: &Code) {
    let (indicator, serial) = code.to_serial();
    out.push(indicator);
    out.extend_from_slice(serial.as_slice());
}

fn code(input: &[u8]) -> IResult<&[u8], Code> {
    let (input, indicator) = u8(input)?;
    let (input, code) =
        map_opt(take(Code::serial_len(indicator)), move |serial: &[u8]| {
            Code::from_serial(indicator, serial)
        })(input)?;
    Ok((input, code))
}

fn transition_record(input: &[u8]) -> IResult<&[u8], (u16, Vec<(u16, Code)>)> {
    let (input, (state, n)) = tuple((le_u16, le_u16))(input)?;
    let (input, transitions) = count(tuple((le_u16, code)), n as usize)(input)?;
    Ok((input, (state, transitions)))
}

fn leaf_record(input: &[u8]) -> IResult<&[u8], (u16, Code)> {
    tuple((le_u16, code))(input)
}

fn parse_error(err: nom::Err<nom::error::Error<&[u8]>>) -> LoadError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e)
            if e.code == ErrorKind::MapOpt =>
        {
            LoadError::Corrupt("invalid byte set")
        }
        _ => LoadError::Truncated,
    }
}

/*! Sets of byte values.

A [`Code`] is the set of byte values accepted by a single transition in a
character class automaton. It is represented as a 256-bits bitmap where the
N-th bit is set if byte N belongs to the set.

Besides the usual set operations, codes can be converted to and from lists
of inclusive byte ranges (the form in which they are handed to the VM), and
to and from a compact variable-length serial form used in class files.
*/

use std::fmt::{Debug, Display, Formatter};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, Not};

use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use bitvec::slice::{BitSlice, IterOnes};
use itertools::Itertools;

/// A set of byte values.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Code([u64; 4]);

impl Code {
    /// The empty set.
    pub const EMPTY: Code = Code([0; 4]);

    /// The set that contains every byte value.
    pub const ALL: Code = Code([u64::MAX; 4]);

    /// Number of bytes in the little-endian representation of a code.
    pub const BYTES: usize = 32;

    /// Returns a code that contains only `byte`.
    pub fn singleton(byte: u8) -> Self {
        let mut words = [0_u64; 4];
        words[byte as usize / 64] = 1 << (byte % 64);
        Self(words)
    }

    /// Returns a code with every byte in the inclusive range `first..=last`.
    /// The bounds are swapped if `first` is greater than `last`.
    pub fn range(first: u8, last: u8) -> Self {
        let (first, last) =
            if first <= last { (first, last) } else { (last, first) };
        let mut bitmap: BitArray<_, Lsb0> = BitArray::new([0_u64; 4]);
        bitmap[first as usize..=last as usize].fill(true);
        Self(bitmap.data)
    }

    /// Builds a code from a list of inclusive byte ranges.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u8, u8)>,
    {
        ranges
            .into_iter()
            .fold(Self::EMPTY, |code, (first, last)| code | Self::range(first, last))
    }

    /// Builds a code from individual byte values.
    pub fn from_bytes<I>(bytes: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        bytes.into_iter().fold(Self::EMPTY, |code, b| code | Self::singleton(b))
    }

    /// Returns true if the code doesn't contain any byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Returns the number of bytes in the set.
    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if the code contains the given byte.
    #[inline]
    pub fn contains(&self, byte: u8) -> bool {
        self.0[byte as usize / 64] & (1 << (byte % 64)) != 0
    }

    /// Returns true if both codes have at least one byte in common.
    #[inline]
    pub fn intersects(&self, other: &Code) -> bool {
        !(*self & *other).is_empty()
    }

    /// Returns the bytes in `self` that are not in `other`.
    #[inline]
    pub fn and_not(self, other: Code) -> Code {
        self & !other
    }

    /// Returns an iterator over the bytes contained in the code, in
    /// ascending order.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.ones().map(|b| b as u8)
    }

    /// Returns the code as a sorted list of inclusive byte ranges, for
    /// instance `{0x01, 0x02, 0x06}` becomes `[(0x01, 0x02), (0x06, 0x06)]`.
    pub fn ranges(&self) -> Vec<(u8, u8)> {
        let mut ranges: Vec<(u8, u8)> = Vec::new();
        for byte in self.bytes() {
            match ranges.last_mut() {
                Some((_, last)) if *last as u16 + 1 == byte as u16 => {
                    *last = byte;
                }
                _ => ranges.push((byte, byte)),
            }
        }
        ranges
    }

    /// Returns the 32 bytes of the bitmap, least significant first.
    pub fn to_le_bytes(&self) -> [u8; Self::BYTES] {
        let mut bytes = [0_u8; Self::BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Inverse of [`Code::to_le_bytes`].
    pub fn from_le_bytes(bytes: [u8; Self::BYTES]) -> Self {
        let mut words = [0_u64; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0_u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        Self(words)
    }

    /// Returns the serial form of the code: an indicator byte and the
    /// significant bytes of the bitmap, most significant first.
    ///
    /// The five least significant bits of the indicator are the position of
    /// the lowest non-zero byte. The three most significant bits are the
    /// number of bytes that follow minus one, except for 7, which means that
    /// every byte from the lowest non-zero one up to the end of the bitmap
    /// follows.
    ///
    /// The empty code is serialized as indicator 0 followed by a single zero
    /// byte.
    pub fn to_serial(&self) -> (u8, Vec<u8>) {
        let bytes = self.to_le_bytes();

        let (posn, top) = match (
            bytes.iter().position(|b| *b != 0),
            bytes.iter().rposition(|b| *b != 0),
        ) {
            (Some(posn), Some(top)) => (posn, top),
            _ => return (0, vec![0]),
        };

        let span = top - posn + 1;
        let (count, len) =
            if span < 8 { (span - 1, span) } else { (7, Self::BYTES - posn) };

        let serial = bytes[posn..posn + len].iter().rev().copied().collect();

        (posn as u8 | (count as u8) << 5, serial)
    }

    /// Returns the number of bytes that follow an indicator byte in the
    /// serial form.
    pub fn serial_len(indicator: u8) -> usize {
        let posn = (indicator & 0x1f) as usize;
        match indicator >> 5 {
            7 => Self::BYTES - posn,
            count => count as usize + 1,
        }
    }

    /// Inverse of [`Code::to_serial`].
    ///
    /// Returns [`None`] if `serial` doesn't have the length implied by the
    /// indicator, or if the bytes would not fit in a 256-bits bitmap.
    pub fn from_serial(indicator: u8, serial: &[u8]) -> Option<Self> {
        let posn = (indicator & 0x1f) as usize;
        let len = Self::serial_len(indicator);

        if serial.len() != len || posn + len > Self::BYTES {
            return None;
        }

        let mut bytes = [0_u8; Self::BYTES];
        for (i, b) in serial.iter().rev().enumerate() {
            bytes[posn + i] = *b;
        }

        Some(Self::from_le_bytes(bytes))
    }

    fn ones(&self) -> IterOnes<'_, u64, Lsb0> {
        BitSlice::<_, Lsb0>::from_slice(&self.0).iter_ones()
    }
}

impl BitAnd for Code {
    type Output = Code;

    fn bitand(self, rhs: Self) -> Self::Output {
        let mut words = self.0;
        words.iter_mut().zip(rhs.0).for_each(|(a, b)| *a &= b);
        Self(words)
    }
}

impl BitOr for Code {
    type Output = Code;

    fn bitor(self, rhs: Self) -> Self::Output {
        let mut words = self.0;
        words.iter_mut().zip(rhs.0).for_each(|(a, b)| *a |= b);
        Self(words)
    }
}

impl BitXor for Code {
    type Output = Code;

    fn bitxor(self, rhs: Self) -> Self::Output {
        let mut words = self.0;
        words.iter_mut().zip(rhs.0).for_each(|(a, b)| *a ^= b);
        Self(words)
    }
}

impl Not for Code {
    type Output = Code;

    fn not(self) -> Self::Output {
        Self(self.0.map(|w| !w))
    }
}

impl BitAndAssign for Code {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitOrAssign for Code {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Comma separated list of the bytes in the code, in hex.
impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bytes().map(|b| format!("{:02X}", b)).join(","))
    }
}

impl Debug for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Code[")?;
        for (i, (first, last)) in self.ranges().into_iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if first == last {
                write!(f, "{:#04x}", first)?;
            } else {
                write!(f, "{:#04x}-{:#04x}", first, last)?;
            }
        }
        write!(f, "]")
    }
}

use nom::number::complete::{
    be_i64, be_u16, be_u32, be_u64, be_u8, le_i64, le_u16, le_u32, le_u64, le_u8,
};

use crate::{combinators::*, Input, Result};

/// Byte order of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    // Little endian byte order.
    Little,
    // Big endian byte order.
    Big,
}

/// Trait to parse and write various numbers.
///
/// COIL modules are little-endian on disk; parsers and writers stay generic
/// over the byte order anyway, so that a wire type reads the same whatever
/// container embeds it.
pub trait Number {
    /// Get endianness used by the number parser.
    fn endianness() -> Endianness;

    /// Parse a `u8`.
    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse a `u16`.
    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse a `u32`.
    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse a `u64`.
    fn read_u64<'a, E>(input: Input<'a>) -> Result<'a, u64, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse an `i64`.
    fn read_i64<'a, E>(input: Input<'a>) -> Result<'a, i64, E>
    where
        E: ParseError<Input<'a>>;

    /// Write a `u8` to its byte representation.
    fn write_u8(value: u8) -> [u8; 1];

    /// Write a `u16` to its byte representation.
    fn write_u16(value: u16) -> [u8; 2];

    /// Write a `u32` to its byte representation.
    fn write_u32(value: u32) -> [u8; 4];

    /// Write a `u64` to its byte representation.
    fn write_u64(value: u64) -> [u8; 8];

    /// Write an `i64` to its byte representation.
    fn write_i64(value: i64) -> [u8; 8];
}

/// Type that implements [`Number`] for little-endian numbers.
pub struct LittleEndian;

impl Number for LittleEndian {
    fn endianness() -> Endianness {
        Endianness::Little
    }

    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u8(input)
    }

    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u16(input)
    }

    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u32(input)
    }

    fn read_u64<'a, E>(input: Input<'a>) -> Result<'a, u64, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u64(input)
    }

    fn read_i64<'a, E>(input: Input<'a>) -> Result<'a, i64, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_i64(input)
    }

    fn write_u8(value: u8) -> [u8; 1] {
        value.to_le_bytes()
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }

    fn write_u64(value: u64) -> [u8; 8] {
        value.to_le_bytes()
    }

    fn write_i64(value: i64) -> [u8; 8] {
        value.to_le_bytes()
    }
}

/// Type that implements [`Number`] for big-endian numbers.
pub struct BigEndian;

impl Number for BigEndian {
    fn endianness() -> Endianness {
        Endianness::Big
    }

    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u8(input)
    }

    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u16(input)
    }

    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u32(input)
    }

    fn read_u64<'a, E>(input: Input<'a>) -> Result<'a, u64, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u64(input)
    }

    fn read_i64<'a, E>(input: Input<'a>) -> Result<'a, i64, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_i64(input)
    }

    fn write_u8(value: u8) -> [u8; 1] {
        value.to_be_bytes()
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    fn write_u64(value: u64) -> [u8; 8] {
        value.to_be_bytes()
    }

    fn write_i64(value: i64) -> [u8; 8] {
        value.to_be_bytes()
    }
}

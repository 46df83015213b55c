use std::io;

use casm_object_macros::ReadWrite;

use crate::{combinators::*, Input, Number, Read, Result, Write};

/// How a relocation patches the emitted bytes.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelocationKind {
    /// A 32-bit absolute address.
    Absolute32 = 0x00,
    /// A 64-bit absolute address.
    Absolute64 = 0x01,
    /// A 32-bit offset relative to the end of the patched field.
    Relative32 = 0x02,
}

/// An `(offset, symbol, kind, addend)` entry fixing up emitted code bytes
/// post-emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset of the patched field in the emitted code.
    pub offset: u32,
    /// Id of the symbol whose address is patched in.
    pub symbol: u32,
    /// Patch kind.
    pub kind: RelocationKind,
    /// Constant added to the resolved address.
    pub addend: i64,
}

impl Relocation {
    /// Size of an encoded relocation entry.
    pub const SIZE: usize = 20;

    /// Parse the whole `relocation` section payload: a `u32` count followed
    /// by that many entries. The payload must be fully consumed.
    pub fn read_table<'a, N, E>(input: Input<'a>) -> Result<'a, Vec<Self>, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (mut input, count) = N::read_u32(input)?;

        let mut relocations = Vec::with_capacity((count as usize).min(input.len()));

        for _ in 0..count {
            let (next_input, relocation) = Self::read::<N, E>(input)?;
            relocations.push(relocation);
            input = next_input;
        }

        if !input.is_empty() {
            return Err(Err::Error(E::from_error_kind(input, ErrorKind::Verify)));
        }

        Ok((input, relocations))
    }

    /// Write a whole `relocation` section payload.
    pub fn write_table<N, B>(relocations: &[Self], buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let count: u32 = relocations
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many relocations"))?;

        buffer.write_all(&N::write_u32(count))?;

        for relocation in relocations {
            relocation.write::<N, _>(buffer)?;
        }

        Ok(())
    }
}

impl Read for Relocation {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, (offset, symbol, kind, _padding, addend)) = tuple((
            N::read_u32,
            N::read_u32,
            RelocationKind::read::<N, _>,
            take(3usize),
            N::read_i64,
        ))(input)?;

        Ok((input, Self { offset, symbol, kind, addend }))
    }
}

impl Write for Relocation {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.offset))?;
        buffer.write_all(&N::write_u32(self.symbol))?;
        self.kind.write::<N, _>(buffer)?;
        buffer.write_all(&[0; 3])?;
        buffer.write_all(&N::write_i64(self.addend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LittleEndian;

    #[test]
    fn test_relocation() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Offset.
            0x08, 0x00, 0x00, 0x00,
            // Symbol.
            0x02, 0x00, 0x00, 0x00,
            // Kind, padding.
            0x02, 0x00, 0x00, 0x00,
            // Addend: -4.
            0xfc, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        ];

        assert_read_write!(
            Relocation: Read<()> + Write<()> {
                bytes(little_endian) = input,
                rust_value = Relocation {
                    offset: 8,
                    symbol: 2,
                    kind: RelocationKind::Relative32,
                    addend: -4,
                },
            }
        );
    }

    #[test]
    fn test_relocation_table() {
        let relocations = vec![
            Relocation { offset: 0, symbol: 1, kind: RelocationKind::Absolute64, addend: 0 },
            Relocation { offset: 12, symbol: 2, kind: RelocationKind::Relative32, addend: -4 },
        ];

        let mut payload = Vec::new();
        Relocation::write_table::<LittleEndian, _>(&relocations, &mut payload).unwrap();

        assert_eq!(payload.len(), 4 + 2 * Relocation::SIZE);

        let (rest, reread) = Relocation::read_table::<LittleEndian, ()>(&payload).unwrap();

        assert!(rest.is_empty());
        assert_eq!(reread, relocations);
    }

    #[test]
    fn test_relocation_table_rejects_unknown_kind() {
        let mut payload = Vec::new();
        Relocation::write_table::<LittleEndian, _>(
            &[Relocation { offset: 0, symbol: 1, kind: RelocationKind::Absolute32, addend: 0 }],
            &mut payload,
        )
        .unwrap();

        // Corrupt the kind byte.
        payload[4 + 8] = 0x2a;

        assert!(Relocation::read_table::<LittleEndian, ()>(&payload).is_err());
    }
}

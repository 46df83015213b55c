use std::{fmt, io};

use casm_object_macros::ReadWrite;

use crate::{combinators::*, Input, Number, Read, Result, Write};

/// Section kind tag.
///
/// A module carries at most one section per kind; consumers rely on the
/// uniqueness when they look a section up by kind.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionKind {
    /// Unused tag. A valid module never carries it.
    Unknown = 0x00,
    /// Type definitions.
    Type = 0x01,
    /// Function declarations.
    Function = 0x02,
    /// Global variable descriptors.
    Global = 0x03,
    /// Constant pool.
    Constant = 0x04,
    /// The instruction stream.
    Code = 0x05,
    /// Relocation entries.
    Relocation = 0x06,
    /// Free-form metadata.
    Metadata = 0x07,
    /// Debug information.
    Debug = 0x08,
    /// Producer-specific payload.
    Custom = 0x09,
}

impl SectionKind {
    /// Stable lowercase name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Type => "type",
            Self::Function => "function",
            Self::Global => "global",
            Self::Constant => "constant",
            Self::Code => "code",
            Self::Relocation => "relocation",
            Self::Metadata => "metadata",
            Self::Debug => "debug",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// A typed, contiguous payload within a module.
///
/// The on-disk format splits a section into a table entry (kind, offset,
/// size) and payload bytes at the declared offset; in memory both halves
/// live in one record. A zero-size section has no payload buffer but still
/// appears in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Kind tag.
    pub kind: SectionKind,
    /// Offset of the payload in the file image.
    pub offset: u32,
    /// Declared size of the payload, in bytes.
    pub size: u32,
    /// The payload, owned by the module. `None` if and only if `size` is 0.
    pub data: Option<Vec<u8>>,
}

impl Section {
    /// Size of a section table entry in the file image.
    pub const ENTRY_SIZE: usize = 12;

    /// Read one table entry from `input`, and copy the payload it points to
    /// out of `file` (the whole module image).
    pub fn read<'a, N, E>(input: Input<'a>, file: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (kind, offset, size)) =
            tuple((SectionKind::read::<N, _>, N::read_u32, N::read_u32))(input)?;

        let data = if size == 0 {
            None
        } else {
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .ok_or_else(|| Err::Error(E::from_error_kind(input, ErrorKind::TooLarge)))?;

            match file.get(start..end) {
                Some(payload) => Some(payload.to_vec()),
                None => return Err(Err::Error(E::from_error_kind(input, ErrorKind::Eof))),
            }
        };

        Ok((input, Self { kind, offset, size, data }))
    }

    /// The payload bytes; empty for a zero-size section.
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

// Writes the table entry only. The payload is written by
// [`Module::build`][super::Module::build], at the declared offset.
impl Write for Section {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        self.kind.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u32(self.offset))?;
        buffer.write_all(&N::write_u32(self.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_entry() {
        #[rustfmt::skip]
        let entry: &[u8] = &[
            // Kind.
            0x05, 0x00, 0x00, 0x00,
            // Offset.
            0x1c, 0x00, 0x00, 0x00,
            // Size.
            0x04, 0x00, 0x00, 0x00,
        ];

        #[rustfmt::skip]
        let file: &[u8] = &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Payload.
            0xde, 0xad, 0xbe, 0xef,
        ];

        let section = Section {
            kind: SectionKind::Code,
            offset: 0x1c,
            size: 4,
            data: Some(vec![0xde, 0xad, 0xbe, 0xef]),
        };

        assert_eq!(
            Section::read::<crate::LittleEndian, ()>(entry, file),
            Ok((&[] as &[u8], section.clone()))
        );

        let mut buffer = Vec::new();
        section.write::<crate::LittleEndian, _>(&mut buffer).unwrap();

        assert_eq!(buffer, entry);
    }

    #[test]
    fn test_section_entry_out_of_bounds() {
        #[rustfmt::skip]
        let entry: &[u8] = &[
            // Kind.
            0x05, 0x00, 0x00, 0x00,
            // Offset.
            0x10, 0x00, 0x00, 0x00,
            // Size: larger than the file.
            0xff, 0x00, 0x00, 0x00,
        ];

        let file = [0u8; 32];

        assert_eq!(
            Section::read::<crate::LittleEndian, ()>(entry, &file),
            Err(Err::Error(()))
        );
    }

    #[test]
    fn test_section_zero_size() {
        #[rustfmt::skip]
        let entry: &[u8] = &[
            // Kind.
            0x07, 0x00, 0x00, 0x00,
            // Offset.
            0x1c, 0x00, 0x00, 0x00,
            // Size.
            0x00, 0x00, 0x00, 0x00,
        ];

        let file = [0u8; 16];

        let (_, section) = Section::read::<crate::LittleEndian, ()>(entry, &file).unwrap();

        assert_eq!(section.kind, SectionKind::Metadata);
        assert_eq!(section.data, None);
        assert_eq!(section.payload(), &[] as &[u8]);
    }
}

use std::{
    fs,
    io::{self, Write as _},
    path::Path,
    result,
};

use casm_file::{FileReader, Picker};
use log::debug;
use thiserror::Error;

use super::{align4, Section, SectionKind};
use crate::{combinators::*, Input, LittleEndian, Number, Read, Result, Write};

/// Module format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u16,
}

impl Version {
    /// The version written by this crate.
    pub const CURRENT: Self = Self { major: 1, minor: 0, patch: 0 };
}

impl Read for Version {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, (major, minor, patch)) = tuple((N::read_u8, N::read_u8, N::read_u16))(input)?;

        Ok((input, Self { major, minor, patch }))
    }
}

impl Write for Version {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u8(self.major))?;
        buffer.write_all(&N::write_u8(self.minor))?;
        buffer.write_all(&N::write_u16(self.patch))
    }
}

/// A COIL module: a 16-byte header, a section table, and one owned payload
/// per section.
///
/// The on-disk encoding keeps the table and the payloads apart; in memory a
/// single collection of [`Section`] records carries both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Format version.
    pub version: Version,
    /// Module flags. Opaque to the container.
    pub flags: u32,
    /// The sections, in table order.
    pub sections: Vec<Section>,
}

/// Failure to load a module from a file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("unable to read the module file: {0}")]
    Io(#[from] io::Error),

    /// The bytes do not form a COIL module.
    #[error("the file does not contain a valid COIL module")]
    Malformed,
}

/// Violation of one of the container invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A section carries the `unknown` kind.
    #[error("section #{index} has the `unknown` kind")]
    UnknownKind {
        /// Index of the section in table order.
        index: usize,
    },

    /// A section's declared size disagrees with its payload.
    #[error("section `{kind}` declares {declared} byte(s) but carries {actual}")]
    SizeMismatch {
        /// Kind of the offending section.
        kind: SectionKind,
        /// Size declared in the table entry.
        declared: u32,
        /// Actual payload length.
        actual: usize,
    },

    /// A zero-size section carries a payload buffer.
    #[error("section `{kind}` declares no bytes but carries a payload buffer")]
    StrayPayload {
        /// Kind of the offending section.
        kind: SectionKind,
    },

    /// The same kind appears more than once.
    #[error("section `{kind}` appears more than once")]
    Duplicated {
        /// The duplicated kind.
        kind: SectionKind,
    },

    /// A section offset is not 4-byte aligned.
    #[error("section `{kind}` starts at {offset}, which is not 4-byte aligned")]
    Misaligned {
        /// Kind of the offending section.
        kind: SectionKind,
        /// The misaligned offset.
        offset: u32,
    },

    /// A section payload overlaps the header or the section table.
    #[error("section `{kind}` starts at {offset}, inside the header or section table")]
    InsideTable {
        /// Kind of the offending section.
        kind: SectionKind,
        /// The offending offset.
        offset: u32,
    },

    /// Two section byte ranges are not disjoint, or are out of order.
    #[error("sections `{first}` and `{second}` overlap or are out of order")]
    Overlapping {
        /// Kind of the earlier section, in table order.
        first: SectionKind,
        /// Kind of the later section, in table order.
        second: SectionKind,
    },
}

/// Failure to insert or replace a section.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InsertError {
    /// A section of that kind is already present.
    #[error("a `{kind}` section is already present")]
    Duplicated {
        /// The already present kind.
        kind: SectionKind,
    },

    /// No section of that kind to replace.
    #[error("no `{kind}` section to replace")]
    Missing {
        /// The absent kind.
        kind: SectionKind,
    },

    /// The `unknown` kind cannot be inserted.
    #[error("the `unknown` section kind cannot be inserted")]
    UnknownKind,

    /// The payload does not fit the 32-bit file layout.
    #[error("the section payload does not fit the 32-bit file layout")]
    TooLarge,
}

/// Failure to serialize a module.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A declared offset lies before the bytes already written; writing never
    /// truncates, so the table must be ordered with monotonic, non-overlapping
    /// offsets.
    #[error("section `{kind}` starts at {offset}, before the end of the already written data")]
    Layout {
        /// Kind of the offending section.
        kind: SectionKind,
        /// The offending offset.
        offset: u32,
    },

    /// The output could not be written.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Module {
    /// The `COIL` magic. Stored little-endian on disk.
    pub const MAGIC: u32 = 0x434F_494C;

    /// Size of the module header in the file image.
    pub const HEADER_SIZE: usize = 16;

    /// Create an empty module: current version, no flags, no sections.
    pub fn new() -> Self {
        Self { version: Version::CURRENT, flags: 0, sections: Vec::new() }
    }

    /// Parse a module out of `input`.
    ///
    /// Every payload is copied into owned storage: the input slice can be
    /// dropped as soon as this returns. No partially initialized module
    /// escapes a failure.
    pub fn read<'a, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        E: ParseError<Input<'a>>,
    {
        let file = input;

        let (input, magic) = LittleEndian::read_u32::<E>(input)?;

        if magic != Self::MAGIC {
            return Err(Err::Error(E::from_error_kind(file, ErrorKind::Tag)));
        }

        let (input, version) = Version::read::<LittleEndian, _>(input)?;
        let (input, section_count) = LittleEndian::read_u32::<E>(input)?;
        let (_input, flags) = LittleEndian::read_u32::<E>(input)?;

        let section_count = section_count as usize;

        // The whole section table must fit in the input before any entry is
        // looked at.
        match section_count.checked_mul(Section::ENTRY_SIZE) {
            Some(table_size) if Self::HEADER_SIZE + table_size <= file.len() => {}
            _ => return Err(Err::Error(E::from_error_kind(file, ErrorKind::Eof))),
        }

        let mut sections = Vec::with_capacity(section_count);

        for entry in
            file[Self::HEADER_SIZE..].chunks_exact(Section::ENTRY_SIZE).take(section_count)
        {
            let (_, section) = Section::read::<LittleEndian, E>(entry, file)?;
            sections.push(section);
        }

        debug!("read a COIL module with {} section(s)", sections.len());

        Ok((&[], Self { version, flags, sections }))
    }

    /// Read a whole file and parse it as a module.
    pub fn from_file<P>(path: P) -> result::Result<Self, LoadError>
    where
        P: AsRef<Path>,
    {
        let file = Picker::open(path)?;
        let content = file.read_as_bytes()?;
        let bytes: &[u8] = &content;

        let (_, module) = Self::read::<()>(bytes).map_err(|_| LoadError::Malformed)?;

        Ok(module)
    }

    /// Serialize the module: header, section table, then each payload at its
    /// declared offset, with zero padding in the gaps.
    pub fn build(&self) -> result::Result<Vec<u8>, BuildError> {
        let size_hint = self
            .sections
            .iter()
            .map(|section| section.offset as usize + section.size as usize)
            .max()
            .unwrap_or(Self::HEADER_SIZE);

        let mut buffer = Vec::with_capacity(size_hint);

        buffer.write_all(&LittleEndian::write_u32(Self::MAGIC))?;
        self.version.write::<LittleEndian, _>(&mut buffer)?;
        buffer.write_all(&LittleEndian::write_u32(self.sections.len() as u32))?;
        buffer.write_all(&LittleEndian::write_u32(self.flags))?;

        for section in &self.sections {
            section.write::<LittleEndian, _>(&mut buffer)?;
        }

        for section in &self.sections {
            let offset = section.offset as usize;

            if buffer.len() > offset {
                return Err(BuildError::Layout { kind: section.kind, offset: section.offset });
            }

            buffer.resize(offset, 0);
            buffer.write_all(section.payload())?;
        }

        Ok(buffer)
    }

    /// Serialize the module and write it to `path`.
    pub fn write_to_file<P>(&self, path: P) -> result::Result<(), BuildError>
    where
        P: AsRef<Path>,
    {
        fs::write(path, self.build()?)?;

        Ok(())
    }

    /// Get the first section of the given kind, if any.
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|section| section.kind == kind)
    }

    /// Check every container invariant.
    pub fn validate(&self) -> result::Result<(), ValidationError> {
        let table_end = Self::HEADER_SIZE + self.sections.len() * Section::ENTRY_SIZE;

        let mut previous: Option<(SectionKind, usize)> = None;

        for (index, section) in self.sections.iter().enumerate() {
            if section.kind == SectionKind::Unknown {
                return Err(ValidationError::UnknownKind { index });
            }

            if self.sections[..index].iter().any(|seen| seen.kind == section.kind) {
                return Err(ValidationError::Duplicated { kind: section.kind });
            }

            if section.size == 0 && section.data.is_some() {
                return Err(ValidationError::StrayPayload { kind: section.kind });
            }

            let actual = section.payload().len();

            if actual != section.size as usize {
                return Err(ValidationError::SizeMismatch {
                    kind: section.kind,
                    declared: section.size,
                    actual,
                });
            }

            let offset = section.offset as usize;

            if offset % 4 != 0 {
                return Err(ValidationError::Misaligned {
                    kind: section.kind,
                    offset: section.offset,
                });
            }

            if offset < table_end {
                return Err(ValidationError::InsideTable {
                    kind: section.kind,
                    offset: section.offset,
                });
            }

            if let Some((previous_kind, previous_end)) = previous {
                if offset < previous_end {
                    return Err(ValidationError::Overlapping {
                        first: previous_kind,
                        second: section.kind,
                    });
                }
            }

            previous = Some((section.kind, offset + section.size as usize));
        }

        Ok(())
    }

    /// Append a section.
    ///
    /// The kind must not be `unknown` and must not already be present. All
    /// offsets are re-laid out sequentially after the grown table, 4-byte
    /// aligned. On failure the module is left untouched.
    pub fn add_section(
        &mut self,
        kind: SectionKind,
        data: &[u8],
    ) -> result::Result<(), InsertError> {
        if kind == SectionKind::Unknown {
            return Err(InsertError::UnknownKind);
        }

        if self.section(kind).is_some() {
            return Err(InsertError::Duplicated { kind });
        }

        let size: u32 = data.len().try_into().map_err(|_| InsertError::TooLarge)?;

        // Compute the new layout before mutating anything.
        let sizes = self.sections.iter().map(|section| section.size).chain([size]);
        let offsets = Self::layout(self.sections.len() + 1, sizes)?;

        self.sections.push(Section {
            kind,
            offset: 0,
            size,
            data: if data.is_empty() { None } else { Some(data.to_vec()) },
        });

        self.apply_layout(&offsets);

        Ok(())
    }

    /// Replace the payload of an existing section.
    pub fn replace_section(
        &mut self,
        kind: SectionKind,
        data: &[u8],
    ) -> result::Result<(), InsertError> {
        let index = self
            .sections
            .iter()
            .position(|section| section.kind == kind)
            .ok_or(InsertError::Missing { kind })?;

        let size: u32 = data.len().try_into().map_err(|_| InsertError::TooLarge)?;

        let sizes = self
            .sections
            .iter()
            .enumerate()
            .map(|(nth, section)| if nth == index { size } else { section.size });
        let offsets = Self::layout(self.sections.len(), sizes)?;

        let section = &mut self.sections[index];
        section.size = size;
        section.data = if data.is_empty() { None } else { Some(data.to_vec()) };

        self.apply_layout(&offsets);

        Ok(())
    }

    /// Compute sequential, 4-byte aligned payload offsets for `count`
    /// sections of the given sizes, starting after the section table.
    fn layout(
        count: usize,
        sizes: impl Iterator<Item = u32>,
    ) -> result::Result<Vec<u32>, InsertError> {
        let mut offsets = Vec::with_capacity(count);
        let mut position = align4(Self::HEADER_SIZE + count * Section::ENTRY_SIZE);

        for size in sizes {
            if position > u32::MAX as usize {
                return Err(InsertError::TooLarge);
            }

            offsets.push(position as u32);
            position = align4(position + size as usize);
        }

        Ok(offsets)
    }

    fn apply_layout(&mut self, offsets: &[u32]) {
        for (section, offset) in self.sections.iter_mut().zip(offsets) {
            section.offset = *offset;
        }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const EMPTY_MODULE: &[u8] = &[
        // Magic, "COIL" little-endian.
        0x4c, 0x49, 0x4f, 0x43,
        // Version 1.0.0.
        0x01, 0x00, 0x00, 0x00,
        // Section count.
        0x00, 0x00, 0x00, 0x00,
        // Flags.
        0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_version() {
        assert_read_write!(
            Version: Read<()> + Write<()> {
                bytes(little_endian) = &[0x01, 0x02, 0x2a, 0x00],
                rust_value = Version { major: 1, minor: 2, patch: 42 },
            }
        );
    }

    #[test]
    fn test_empty_module_round_trip() {
        let module = Module::new();

        assert_eq!(module.validate(), Ok(()));

        let bytes = module.build().unwrap();

        assert_eq!(bytes, EMPTY_MODULE);
        assert_eq!(bytes.len(), Module::HEADER_SIZE);

        let (_, reread) = Module::read::<()>(&bytes).unwrap();

        assert_eq!(reread, module);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = [0u8; 16];

        assert!(Module::read::<()>(&bytes).is_err());
    }

    #[test]
    fn test_truncated_header() {
        assert!(Module::read::<()>(&EMPTY_MODULE[..12]).is_err());
    }

    #[test]
    fn test_truncated_section_table() {
        let mut bytes = EMPTY_MODULE.to_vec();
        // Pretend there are 2 sections, without providing the table.
        bytes[8] = 0x02;

        assert!(Module::read::<()>(&bytes).is_err());
    }

    #[test]
    fn test_payload_out_of_bounds() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0xde, 0xad]).unwrap();

        let mut bytes = module.build().unwrap();
        // Inflate the declared size of the first (and only) section.
        bytes[Module::HEADER_SIZE + 8] = 0xff;

        assert!(Module::read::<()>(&bytes).is_err());
    }

    #[test]
    fn test_module_round_trip() {
        let mut module = Module::new();
        module.flags = 0x01;
        module.add_section(SectionKind::Code, &[0x90, 0x90, 0xc3]).unwrap();
        module.add_section(SectionKind::Metadata, b"casm").unwrap();
        module.add_section(SectionKind::Debug, &[]).unwrap();

        assert_eq!(module.validate(), Ok(()));

        let bytes = module.build().unwrap();
        let (rest, reread) = Module::read::<()>(&bytes).unwrap();

        assert!(rest.is_empty());
        assert_eq!(reread, module);
    }

    #[test]
    fn test_add_section_layout() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90; 5]).unwrap();
        module.add_section(SectionKind::Global, &[0x2a; 3]).unwrap();

        // Two sections: the table ends at 16 + 2 * 12 = 40.
        assert_eq!(module.sections[0].offset, 40);
        // 40 + 5 rounded up to the next 4-byte boundary.
        assert_eq!(module.sections[1].offset, 48);

        assert_eq!(module.validate(), Ok(()));
    }

    #[test]
    fn test_add_section_rejects_duplicates() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();

        let snapshot = module.clone();

        assert_eq!(
            module.add_section(SectionKind::Code, &[0xc3]),
            Err(InsertError::Duplicated { kind: SectionKind::Code })
        );

        // The failed insertion must not leave any trace.
        assert_eq!(module, snapshot);
    }

    #[test]
    fn test_add_section_rejects_unknown() {
        let mut module = Module::new();

        assert_eq!(
            module.add_section(SectionKind::Unknown, &[]),
            Err(InsertError::UnknownKind)
        );
        assert!(module.sections.is_empty());
    }

    #[test]
    fn test_replace_section() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.add_section(SectionKind::Metadata, b"casm").unwrap();

        module.replace_section(SectionKind::Code, &[0x90, 0x90, 0x90, 0x90, 0xc3]).unwrap();

        assert_eq!(module.section(SectionKind::Code).unwrap().size, 5);
        // The metadata section moved to make room.
        assert_eq!(module.sections[1].offset, 48);
        assert_eq!(module.validate(), Ok(()));

        assert_eq!(
            module.replace_section(SectionKind::Debug, &[]),
            Err(InsertError::Missing { kind: SectionKind::Debug })
        );
    }

    #[test]
    fn test_get_section() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();

        assert_eq!(module.section(SectionKind::Code).unwrap().payload(), &[0x90]);
        assert!(module.section(SectionKind::Global).is_none());
    }

    #[test]
    fn test_validate_unknown_kind() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.sections[0].kind = SectionKind::Unknown;

        assert_eq!(module.validate(), Err(ValidationError::UnknownKind { index: 0 }));
    }

    #[test]
    fn test_validate_duplicated_kind() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.add_section(SectionKind::Metadata, &[0x2a]).unwrap();
        module.sections[1].kind = SectionKind::Code;

        assert_eq!(
            module.validate(),
            Err(ValidationError::Duplicated { kind: SectionKind::Code })
        );
    }

    #[test]
    fn test_validate_size_mismatch() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90, 0x90]).unwrap();
        module.sections[0].size = 1;

        assert_eq!(
            module.validate(),
            Err(ValidationError::SizeMismatch {
                kind: SectionKind::Code,
                declared: 1,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_validate_stray_payload() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.sections[0].size = 0;
        module.sections[0].data = Some(Vec::new());

        assert_eq!(
            module.validate(),
            Err(ValidationError::StrayPayload { kind: SectionKind::Code })
        );
    }

    #[test]
    fn test_validate_misaligned_offset() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.sections[0].offset = 41;

        assert_eq!(
            module.validate(),
            Err(ValidationError::Misaligned { kind: SectionKind::Code, offset: 41 })
        );
    }

    #[test]
    fn test_validate_payload_inside_table() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90]).unwrap();
        module.sections[0].offset = 16;

        assert_eq!(
            module.validate(),
            Err(ValidationError::InsideTable { kind: SectionKind::Code, offset: 16 })
        );
    }

    #[test]
    fn test_validate_overlapping_sections() {
        // Two entries: `code` at [40, 50), `function` at 44 — overlapping,
        // hand-built the way a hostile file would declare them.
        let mut module = Module::new();
        module.sections.push(Section {
            kind: SectionKind::Code,
            offset: 40,
            size: 10,
            data: Some(vec![0; 10]),
        });
        module.sections.push(Section {
            kind: SectionKind::Function,
            offset: 44,
            size: 10,
            data: Some(vec![0; 10]),
        });

        assert_eq!(
            module.validate(),
            Err(ValidationError::Overlapping {
                first: SectionKind::Code,
                second: SectionKind::Function,
            })
        );
    }

    #[test]
    fn test_build_refuses_truncation() {
        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90; 8]).unwrap();
        module.add_section(SectionKind::Metadata, &[0x2a]).unwrap();
        // Move the second section inside the first one.
        module.sections[1].offset = module.sections[0].offset;

        assert!(matches!(
            module.build(),
            Err(BuildError::Layout { kind: SectionKind::Metadata, .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("casm-module-{}.coil", std::process::id()));

        let mut module = Module::new();
        module.add_section(SectionKind::Code, &[0x90, 0xc3]).unwrap();

        module.write_to_file(&path).unwrap();

        let reread = Module::from_file(&path).unwrap();

        assert_eq!(reread, module);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let path = std::env::temp_dir().join(format!("casm-garbage-{}.coil", std::process::id()));

        std::fs::write(&path, [0u8; 16]).unwrap();

        assert!(matches!(Module::from_file(&path), Err(LoadError::Malformed)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_zero_size_section_round_trip() {
        let mut module = Module::new();
        module.add_section(SectionKind::Debug, &[]).unwrap();

        let bytes = module.build().unwrap();
        let (_, reread) = Module::read::<()>(&bytes).unwrap();

        assert_eq!(reread.section(SectionKind::Debug).unwrap().data, None);
        assert_eq!(reread, module);
    }
}

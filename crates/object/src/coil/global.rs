use std::io;

use bstr::BString;
use enumflags2::{bitflags, BitFlags};

use super::MemoryAddress;
use crate::{combinators::*, Input, Number, Read, Result, Write};

/// Global variable flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GlobalFlag {
    /// The global carries an initial value.
    Initialized = 0x01,
    /// The global is never written.
    Constant = 0x02,
    /// The global is visible outside the module.
    Exported = 0x04,
    /// One instance per thread.
    ThreadLocal = 0x08,
}

/// Global variable flags.
pub type GlobalFlags = BitFlags<GlobalFlag>;

impl Read for GlobalFlags {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, flags) = N::read_u32(input)?;
        let flags = Self::from_bits(flags)
            .map_err(|_| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;

        Ok((input, flags))
    }
}

impl Write for GlobalFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.bits()))
    }
}

/// A global variable descriptor, as encoded in the `global` section payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Numeric id, unique within the module.
    pub id: u32,
    /// Name of the global. Not guaranteed to be valid UTF-8.
    pub name: BString,
    /// Where and how the global is addressed.
    pub address: MemoryAddress,
    /// Type id of the stored value.
    pub type_id: u32,
    /// Size of the stored value, in bytes.
    pub size: u32,
    /// Flags.
    pub flags: GlobalFlags,
    /// Initial value. When present, its length equals `size`.
    pub initializer: Option<Vec<u8>>,
}

impl Global {
    /// Whether the global can be accessed atomically.
    pub fn is_atomic(&self) -> bool {
        self.address.is_atomic(self.size)
    }

    /// Parse the whole `global` section payload: a `u32` count followed by
    /// that many descriptors. The payload must be fully consumed.
    pub fn read_table<'a, N, E>(input: Input<'a>) -> Result<'a, Vec<Self>, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (mut input, count) = N::read_u32(input)?;

        let mut globals = Vec::with_capacity((count as usize).min(input.len()));

        for _ in 0..count {
            let (next_input, global) = Self::read::<N, E>(input)?;
            globals.push(global);
            input = next_input;
        }

        if !input.is_empty() {
            return Err(Err::Error(E::from_error_kind(input, ErrorKind::Verify)));
        }

        Ok((input, globals))
    }

    /// Write a whole `global` section payload.
    pub fn write_table<N, B>(globals: &[Self], buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let count: u32 = globals
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many globals"))?;

        buffer.write_all(&N::write_u32(count))?;

        for global in globals {
            global.write::<N, _>(buffer)?;
        }

        Ok(())
    }
}

impl Read for Global {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, id) = N::read_u32(input)?;
        let (input, name_length) = N::read_u16(input)?;
        let (input, name) = take(name_length)(input)?;
        let (input, address) = MemoryAddress::read::<N, _>(input)?;
        let (input, (type_id, size)) = tuple((N::read_u32, N::read_u32))(input)?;
        let (input, flags) = GlobalFlags::read::<N, _>(input)?;
        let (input, initializer_length) = N::read_u32(input)?;

        let (input, initializer) = if initializer_length == 0 {
            (input, None)
        } else {
            // A present initializer covers the whole value.
            if initializer_length != size {
                return Err(Err::Error(E::from_error_kind(input, ErrorKind::Verify)));
            }

            let (input, bytes) = take(initializer_length)(input)?;

            (input, Some(bytes.to_vec()))
        };

        Ok((
            input,
            Self { id, name: BString::from(name.to_vec()), address, type_id, size, flags, initializer },
        ))
    }
}

impl Write for Global {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let name_length: u16 = self
            .name
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "global name too long"))?;

        buffer.write_all(&N::write_u32(self.id))?;
        buffer.write_all(&N::write_u16(name_length))?;
        buffer.write_all(&self.name)?;
        self.address.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u32(self.type_id))?;
        buffer.write_all(&N::write_u32(self.size))?;
        self.flags.write::<N, _>(buffer)?;

        match &self.initializer {
            Some(bytes) => {
                buffer.write_all(&N::write_u32(bytes.len() as u32))?;
                buffer.write_all(bytes)
            }
            None => buffer.write_all(&N::write_u32(0)),
        }
    }
}

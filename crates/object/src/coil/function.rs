use std::io;

use bstr::BString;

use crate::{combinators::*, Input, Number, Read, Result, Write};

/// A function declaration, as encoded in the `function` section payload.
///
/// The declaration names a contiguous range of the `code` section payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    /// Numeric id, unique within the module.
    pub id: u32,
    /// Name of the function. Not guaranteed to be valid UTF-8.
    pub name: BString,
    /// Type id of the signature.
    pub type_id: u32,
    /// Byte offset of the body inside the `code` section payload.
    pub code_offset: u32,
    /// Byte size of the body.
    pub code_size: u32,
    /// Flags. Opaque to the container.
    pub flags: u32,
}

impl FunctionDecl {
    /// Parse the whole `function` section payload: a `u32` count followed by
    /// that many declarations. The payload must be fully consumed.
    pub fn read_table<'a, N, E>(input: Input<'a>) -> Result<'a, Vec<Self>, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (mut input, count) = N::read_u32(input)?;

        let mut functions = Vec::with_capacity((count as usize).min(input.len()));

        for _ in 0..count {
            let (next_input, function) = Self::read::<N, E>(input)?;
            functions.push(function);
            input = next_input;
        }

        if !input.is_empty() {
            return Err(Err::Error(E::from_error_kind(input, ErrorKind::Verify)));
        }

        Ok((input, functions))
    }

    /// Write a whole `function` section payload.
    pub fn write_table<N, B>(functions: &[Self], buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let count: u32 = functions
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many functions"))?;

        buffer.write_all(&N::write_u32(count))?;

        for function in functions {
            function.write::<N, _>(buffer)?;
        }

        Ok(())
    }
}

impl Read for FunctionDecl {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, id) = N::read_u32(input)?;
        let (input, name_length) = N::read_u16(input)?;
        let (input, name) = take(name_length)(input)?;
        let (input, (type_id, code_offset, code_size, flags)) =
            tuple((N::read_u32, N::read_u32, N::read_u32, N::read_u32))(input)?;

        Ok((
            input,
            Self { id, name: BString::from(name.to_vec()), type_id, code_offset, code_size, flags },
        ))
    }
}

impl Write for FunctionDecl {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let name_length: u16 = self
            .name
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "function name too long"))?;

        buffer.write_all(&N::write_u32(self.id))?;
        buffer.write_all(&N::write_u16(name_length))?;
        buffer.write_all(&self.name)?;
        buffer.write_all(&N::write_u32(self.type_id))?;
        buffer.write_all(&N::write_u32(self.code_offset))?;
        buffer.write_all(&N::write_u32(self.code_size))?;
        buffer.write_all(&N::write_u32(self.flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LittleEndian;

    #[test]
    fn test_function_declaration() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Id.
            0x01, 0x00, 0x00, 0x00,
            // Name length.
            0x05, 0x00,
            // Name.
            b's', b't', b'a', b'r', b't',
            // Type id.
            0x2a, 0x00, 0x00, 0x00,
            // Code offset.
            0x00, 0x00, 0x00, 0x00,
            // Code size.
            0x10, 0x00, 0x00, 0x00,
            // Flags.
            0x00, 0x00, 0x00, 0x00,
        ];

        assert_read_write!(
            FunctionDecl: Read<()> + Write<()> {
                bytes(little_endian) = input,
                rust_value = FunctionDecl {
                    id: 1,
                    name: BString::from("start"),
                    type_id: 42,
                    code_offset: 0,
                    code_size: 16,
                    flags: 0,
                },
            }
        );
    }

    #[test]
    fn test_function_table() {
        let functions = vec![
            FunctionDecl {
                id: 1,
                name: BString::from("start"),
                type_id: 1,
                code_offset: 0,
                code_size: 8,
                flags: 0,
            },
            FunctionDecl {
                id: 2,
                name: BString::from("stop"),
                type_id: 1,
                code_offset: 8,
                code_size: 4,
                flags: 0,
            },
        ];

        let mut payload = Vec::new();
        FunctionDecl::write_table::<LittleEndian, _>(&functions, &mut payload).unwrap();

        let (rest, reread) = FunctionDecl::read_table::<LittleEndian, ()>(&payload).unwrap();

        assert!(rest.is_empty());
        assert_eq!(reread, functions);
    }

    #[test]
    fn test_function_table_truncated() {
        let mut payload = Vec::new();
        FunctionDecl::write_table::<LittleEndian, _>(
            &[FunctionDecl {
                id: 1,
                name: BString::from("start"),
                type_id: 1,
                code_offset: 0,
                code_size: 8,
                flags: 0,
            }],
            &mut payload,
        )
        .unwrap();

        payload.truncate(payload.len() - 2);

        assert!(FunctionDecl::read_table::<LittleEndian, ()>(&payload).is_err());
    }
}

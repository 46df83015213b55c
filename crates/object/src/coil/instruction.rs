use std::{fmt, io};

use casm_object_macros::ReadWrite;

use crate::{combinators::*, Input, Number, Read, Result, Write};

/// Operation code of an instruction.
///
/// Decoding only validates the structure of the stream; what an operation
/// does to its operands is the business of the target back-ends.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Do nothing.
    Nop = 0x0000,
    /// Stop the executing unit.
    Halt = 0x0001,
    /// Load from memory.
    Load = 0x0010,
    /// Store to memory.
    Store = 0x0011,
    /// Move a value into a register.
    Move = 0x0020,
    /// Integer addition.
    Add = 0x0030,
    /// Integer subtraction.
    Sub = 0x0031,
    /// Unconditional branch.
    Branch = 0x0040,
    /// Call a function.
    Call = 0x0050,
    /// Return from a function.
    Return = 0x0051,
}

impl Opcode {
    /// Mnemonic used in assembly listings.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Halt => "halt",
            Self::Load => "load",
            Self::Store => "store",
            Self::Move => "mov",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Branch => "br",
            Self::Call => "call",
            Self::Return => "ret",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.mnemonic())
    }
}

/// Kind of an instruction operand.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperandKind {
    /// No operand.
    None = 0x00,
    /// A virtual register index.
    Register = 0x01,
    /// An immediate value.
    Immediate = 0x02,
    /// A memory address.
    Memory = 0x03,
    /// A byte offset into the code stream.
    Label = 0x04,
    /// A symbol id, resolved by relocation.
    Symbol = 0x05,
}

/// An instruction operand: a kind, a width in bits, and a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    /// Kind of the operand.
    pub kind: OperandKind,
    /// Width in bits: 0, 8, 16, 32 or 64.
    pub width: u8,
    /// Raw value. Interpretation depends on the kind.
    pub value: u64,
}

impl Operand {
    /// Size of an encoded operand in the code stream.
    pub const SIZE: usize = 10;

    /// A virtual register operand.
    pub fn register(index: u64, width: u8) -> Self {
        Self { kind: OperandKind::Register, width, value: index }
    }

    /// An immediate operand.
    pub fn immediate(value: u64, width: u8) -> Self {
        Self { kind: OperandKind::Immediate, width, value }
    }

    /// A label operand, i.e. a byte offset into the code stream.
    pub fn label(offset: u64) -> Self {
        Self { kind: OperandKind::Label, width: 0, value: offset }
    }

    /// A symbol operand, resolved by relocation.
    pub fn symbol(id: u64) -> Self {
        Self { kind: OperandKind::Symbol, width: 0, value: id }
    }
}

impl Read for Operand {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, (kind, width)) = tuple((OperandKind::read::<N, _>, N::read_u8))(input)?;

        if !matches!(width, 0 | 8 | 16 | 32 | 64) {
            return Err(Err::Error(E::from_error_kind(input, ErrorKind::Verify)));
        }

        let (input, value) = N::read_u64(input)?;

        Ok((input, Self { kind, width, value }))
    }
}

impl Write for Operand {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        self.kind.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u8(self.width))?;
        buffer.write_all(&N::write_u64(self.value))
    }
}

/// One decoded instruction of the `code` section payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Operation code.
    pub opcode: Opcode,
    /// Flags. Opaque to the container.
    pub flags: u8,
    /// Operands, in encoding order.
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// A flag-less instruction.
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, flags: 0, operands }
    }

    /// Decode the whole `code` section payload. The stream must be fully
    /// consumed: a dangling half-instruction is a malformed module.
    pub fn read_stream<'a, N, E>(mut input: Input<'a>) -> Result<'a, Vec<Self>, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let mut instructions = Vec::with_capacity(input.len() / 4);

        while !input.is_empty() {
            let (next_input, instruction) = Self::read::<N, E>(input)?;
            instructions.push(instruction);
            input = next_input;
        }

        Ok((input, instructions))
    }

    /// Encode a whole `code` section payload.
    pub fn write_stream<N, B>(instructions: &[Self], buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        for instruction in instructions {
            instruction.write::<N, _>(buffer)?;
        }

        Ok(())
    }
}

impl Read for Instruction {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (mut input, (opcode, flags, operand_count)) =
            tuple((Opcode::read::<N, _>, N::read_u8, N::read_u8))(input)?;

        let mut operands = Vec::with_capacity(operand_count as usize);

        for _ in 0..operand_count {
            let (next_input, operand) = Operand::read::<N, E>(input)?;
            operands.push(operand);
            input = next_input;
        }

        Ok((input, Self { opcode, flags, operands }))
    }
}

impl Write for Instruction {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let operand_count: u8 = self
            .operands
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many operands"))?;

        self.opcode.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u8(self.flags))?;
        buffer.write_all(&N::write_u8(operand_count))?;

        for operand in &self.operands {
            operand.write::<N, _>(buffer)?;
        }

        Ok(())
    }
}

use std::{fmt, io};

use casm_object_macros::ReadWrite;

use crate::{combinators::*, Input, Number, Read, Result, Write};

/// Memory space a value lives in.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Space {
    /// No particular space.
    Generic = 0x00,
    /// Module-wide storage.
    Global = 0x01,
    /// One instance per thread.
    ThreadLocal = 0x02,
    /// Shared across a work group.
    Shared = 0x03,
    /// Read-only storage.
    Constant = 0x04,
    /// Private to the executing unit.
    Private = 0x05,
}

impl Space {
    /// Stable lowercase name of the space.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Global => "global",
            Self::ThreadLocal => "local",
            Self::Shared => "shared",
            Self::Constant => "constant",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Access behavior of a memory location.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Access {
    /// Plain access.
    Normal = 0x00,
    /// Never cached in a register.
    Volatile = 0x01,
    /// Accessed atomically, with an ordering.
    Atomic = 0x02,
    /// Bypasses the cache hierarchy.
    NonTemporal = 0x03,
}

impl Access {
    /// Stable lowercase name of the access behavior.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Volatile => "volatile",
            Self::Atomic => "atomic",
            Self::NonTemporal => "nontemporal",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// How a memory location is aligned.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlignmentKind {
    /// No alignment requirement.
    None = 0x00,
    /// The natural alignment of the stored type.
    Natural = 0x01,
    /// Packed, i.e. 1-byte aligned.
    Packed = 0x02,
    /// An explicit alignment, carried next to the kind.
    Explicit = 0x03,
}

/// Memory ordering of an atomic access.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryOrdering {
    /// No ordering constraint.
    Relaxed = 0x00,
    /// Acquire ordering.
    Acquire = 0x01,
    /// Release ordering.
    Release = 0x02,
    /// Acquire on load, release on store.
    AcqRel = 0x03,
    /// Sequentially consistent.
    SeqCst = 0x04,
}

impl MemoryOrdering {
    /// Stable lowercase name of the ordering.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relaxed => "relaxed",
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::AcqRel => "acq_rel",
            Self::SeqCst => "seq_cst",
        }
    }
}

impl fmt::Display for MemoryOrdering {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// How a global variable is addressed: where it lives, how it is accessed,
/// how it is aligned, and which ordering its atomic accesses carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAddress {
    /// Memory space.
    pub space: Space,
    /// Access behavior.
    pub access: Access,
    /// Alignment kind.
    pub alignment: AlignmentKind,
    /// Explicit alignment, in bytes. Only meaningful with
    /// [`AlignmentKind::Explicit`].
    pub alignment_value: u32,
    /// Memory ordering. Only meaningful with [`Access::Atomic`].
    pub order: MemoryOrdering,
}

impl MemoryAddress {
    /// Size of the descriptor in the file image.
    pub const SIZE: usize = 8;

    /// Whether a value of `size` bytes at this address can be accessed
    /// atomically: the access must be atomic, the size must be a power of two
    /// up to 16, and the location must be at least naturally aligned for that
    /// size.
    pub fn is_atomic(&self, size: u32) -> bool {
        if self.access != Access::Atomic {
            return false;
        }

        if !matches!(size, 1 | 2 | 4 | 8 | 16) {
            return false;
        }

        let alignment = match self.alignment {
            AlignmentKind::Packed => 1,
            AlignmentKind::Explicit => self.alignment_value,
            AlignmentKind::None | AlignmentKind::Natural => size,
        };

        alignment >= size
    }
}

impl Read for MemoryAddress {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, (space, access, alignment, order, alignment_value)) = tuple((
            Space::read::<N, _>,
            Access::read::<N, _>,
            AlignmentKind::read::<N, _>,
            MemoryOrdering::read::<N, _>,
            N::read_u32,
        ))(input)?;

        Ok((input, Self { space, access, alignment, alignment_value, order }))
    }
}

impl Write for MemoryAddress {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        self.space.write::<N, _>(buffer)?;
        self.access.write::<N, _>(buffer)?;
        self.alignment.write::<N, _>(buffer)?;
        self.order.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u32(self.alignment_value))
    }
}

/// Type ids of the standard scalar types.
pub mod type_ids {
    /// 8-bit signed integer.
    pub const I8: u32 = 1;
    /// 16-bit signed integer.
    pub const I16: u32 = 2;
    /// 32-bit signed integer.
    pub const I32: u32 = 3;
    /// 64-bit signed integer.
    pub const I64: u32 = 4;
    /// 128-bit signed integer.
    pub const I128: u32 = 5;
    /// 32-bit float.
    pub const F32: u32 = 6;
    /// 64-bit float.
    pub const F64: u32 = 7;
    /// 128-bit float.
    pub const F128: u32 = 8;
}

/// The natural alignment, in bytes, of a standard scalar type. Unknown type
/// ids fall back to byte alignment.
pub fn natural_alignment(type_id: u32) -> u32 {
    match type_id {
        type_ids::I8 => 1,
        type_ids::I16 => 2,
        type_ids::I32 => 4,
        type_ids::I64 => 8,
        type_ids::I128 => 16,
        type_ids::F32 => 4,
        type_ids::F64 => 8,
        type_ids::F128 => 16,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Space::Generic.name(), "generic");
        assert_eq!(Space::Global.name(), "global");
        assert_eq!(Space::ThreadLocal.name(), "local");
        assert_eq!(Space::Shared.name(), "shared");
        assert_eq!(Space::Constant.name(), "constant");
        assert_eq!(Space::Private.name(), "private");

        assert_eq!(MemoryOrdering::Relaxed.name(), "relaxed");
        assert_eq!(MemoryOrdering::Acquire.name(), "acquire");
        assert_eq!(MemoryOrdering::Release.name(), "release");
        assert_eq!(MemoryOrdering::AcqRel.name(), "acq_rel");
        assert_eq!(MemoryOrdering::SeqCst.name(), "seq_cst");
    }

    #[test]
    fn test_natural_alignment() {
        assert_eq!(natural_alignment(type_ids::I8), 1);
        assert_eq!(natural_alignment(type_ids::I16), 2);
        assert_eq!(natural_alignment(type_ids::I32), 4);
        assert_eq!(natural_alignment(type_ids::I64), 8);
        assert_eq!(natural_alignment(type_ids::I128), 16);
        assert_eq!(natural_alignment(type_ids::F32), 4);
        assert_eq!(natural_alignment(type_ids::F64), 8);
        assert_eq!(natural_alignment(type_ids::F128), 16);
        assert_eq!(natural_alignment(0xdead), 1);
    }

    #[test]
    fn test_memory_address() {
        assert_read_write!(
            MemoryAddress: Read<()> + Write<()> {
                bytes(little_endian) = &[
                    // Space, access, alignment kind, ordering.
                    0x01, 0x02, 0x03, 0x04,
                    // Alignment value.
                    0x08, 0x00, 0x00, 0x00,
                ],
                rust_value = MemoryAddress {
                    space: Space::Global,
                    access: Access::Atomic,
                    alignment: AlignmentKind::Explicit,
                    alignment_value: 8,
                    order: MemoryOrdering::SeqCst,
                },
            }
        );
    }

    #[test]
    fn test_is_atomic() {
        let address = MemoryAddress {
            space: Space::Global,
            access: Access::Atomic,
            alignment: AlignmentKind::Natural,
            alignment_value: 0,
            order: MemoryOrdering::SeqCst,
        };

        assert!(address.is_atomic(1));
        assert!(address.is_atomic(8));
        assert!(address.is_atomic(16));
        // Not a power of two.
        assert!(!address.is_atomic(3));
        // Too wide.
        assert!(!address.is_atomic(32));

        // Packed locations are only byte-atomic.
        let packed = MemoryAddress { alignment: AlignmentKind::Packed, ..address };
        assert!(packed.is_atomic(1));
        assert!(!packed.is_atomic(4));

        // Explicit alignment must reach the natural one.
        let explicit = MemoryAddress {
            alignment: AlignmentKind::Explicit,
            alignment_value: 4,
            ..address
        };
        assert!(explicit.is_atomic(4));
        assert!(!explicit.is_atomic(8));

        // Non-atomic accesses are never atomic.
        let normal = MemoryAddress { access: Access::Normal, ..address };
        assert!(!normal.is_atomic(4));
    }
}

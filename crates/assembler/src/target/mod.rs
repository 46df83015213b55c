//! Target descriptors, the back-end capability set, and emission.
//!
//! A [`Target`] is a static descriptor: a name, a device class, a version, a
//! vendor, and a factory for the target's [`TargetOps`] — the capability set
//! the pipeline drives. Back-ends differ in how they encode instructions;
//! the shape of the emitted output is shared and lives here.

use std::{fmt, str::FromStr};

use casm_object::coil::{
    natural_alignment, AlignmentKind, FunctionDecl, Global, Instruction, Module, Opcode, Operand,
    OperandKind, Relocation, RelocationKind,
};
use thiserror::Error;

use crate::{buffer::OutputBuffer, configuration::TargetConfiguration};

pub(crate) mod aarch64;
mod context;
pub mod registry;
pub(crate) mod x86_64;

pub use context::TargetContext;

/// What kind of device a target emits code for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// A general-purpose processor.
    Cpu,
    /// A graphics processor.
    Gpu,
}

impl DeviceClass {
    /// Stable lowercase name of the device class.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// The format of the emitted output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// A flat image: lowered code, then global storage. The default.
    #[default]
    Object,
    /// A textual listing of the lowered code.
    Assembly,
    /// The flat image behind a 16-byte `CASX` header.
    Executable,
    /// The flat image behind a 16-byte `CASL` header.
    Library,
}

impl OutputFormat {
    /// Map a numeric format code to a variant.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Object),
            1 => Some(Self::Assembly),
            2 => Some(Self::Executable),
            3 => Some(Self::Library),
            _ => None,
        }
    }

    /// Stable lowercase name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Assembly => "assembly",
            Self::Executable => "executable",
            Self::Library => "library",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "object" => Ok(Self::Object),
            "assembly" => Ok(Self::Assembly),
            "executable" => Ok(Self::Executable),
            "library" => Ok(Self::Library),
            _ => Err(format!(
                "`{value}` is not an output format; expected object, assembly, executable or \
                 library"
            )),
        }
    }
}

/// Errors produced by a target back-end.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The operand count does not match the operation.
    #[error("`{mnemonic}` expects {expected} operand(s), found {found}")]
    WrongOperandCount {
        /// Mnemonic of the offending instruction.
        mnemonic: &'static str,
        /// Operand count the operation requires.
        expected: usize,
        /// Operand count the instruction carries.
        found: usize,
    },

    /// The operand shape has no encoding on this target.
    #[error("`{mnemonic}` has an operand shape this target cannot encode")]
    UnsupportedInstruction {
        /// Mnemonic of the offending instruction.
        mnemonic: &'static str,
    },

    /// An immediate does not fit the encodable range.
    #[error("immediate {value:#x} does not fit in {bits} bit(s)")]
    ImmediateTooWide {
        /// The immediate value.
        value: u64,
        /// The width of the encodable field.
        bits: u8,
    },

    /// A register index exceeds the target's register file.
    #[error("register r{index} is out of range; this target has {count} general registers")]
    RegisterOutOfRange {
        /// The requested register index.
        index: u64,
        /// Number of encodable registers.
        count: u64,
    },

    /// A relocation points outside the emitted code.
    #[error("relocation at offset {offset:#x} lies outside the emitted code")]
    RelocationOutOfRange {
        /// Offset of the patched field.
        offset: u32,
    },

    /// A resolved relocation value does not fit the patched field.
    #[error("relocation at offset {offset:#x} overflows its field")]
    RelocationOverflow {
        /// Offset of the patched field.
        offset: u32,
    },

    /// A relocation names a symbol the module does not define.
    #[error("no symbol {id} in the module")]
    UnknownSymbol {
        /// The unresolved symbol id.
        id: u32,
    },

    /// A configuration value was rejected.
    #[error("the `{key}` configuration value `{value}` is invalid: {reason}")]
    InvalidConfiguration {
        /// The rejected key.
        key: &'static str,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// One lowered, encoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInstruction {
    /// The encoded bytes.
    pub bytes: Vec<u8>,
}

/// Everything a back-end needs to emit the output.
#[derive(Debug)]
pub struct EmitRequest<'a> {
    /// The module under assembly, borrowed for the call.
    pub module: &'a Module,
    /// The requested output format.
    pub format: OutputFormat,
    /// Parsed function declarations.
    pub functions: &'a [FunctionDecl],
    /// Parsed global descriptors.
    pub globals: &'a [Global],
    /// The decoded (and optimized) instruction stream.
    pub instructions: &'a [Instruction],
    /// The lowered stream, parallel to `instructions`.
    pub lowered: &'a [TargetInstruction],
    /// Parsed relocation entries.
    pub relocations: &'a [Relocation],
}

/// The capability set of a target back-end.
///
/// `initialize` runs exactly once right after context creation, `finalize`
/// exactly once before context destruction. The remaining hooks are driven
/// by the pipeline, in its stage order.
pub trait TargetOps: Send {
    /// Prepare the target-private state.
    fn initialize(&mut self) -> Result<(), TargetError> {
        Ok(())
    }

    /// Tear the target-private state down.
    fn finalize(&mut self) {}

    /// Check that an instruction is encodable, without encoding it.
    fn validate_instruction(&self, _instruction: &Instruction) -> Result<(), TargetError> {
        Ok(())
    }

    /// Lower one instruction to its encoded form.
    fn map_instruction(&self, instruction: &Instruction) -> Result<TargetInstruction, TargetError>;

    /// Emit the whole output into `output`.
    fn generate_code(
        &mut self,
        request: &EmitRequest<'_>,
        output: &mut OutputBuffer,
    ) -> Result<(), TargetError>;

    /// Apply a configuration bag. Unknown keys are ignored.
    fn apply_configuration(
        &mut self,
        _configuration: &TargetConfiguration,
    ) -> Result<(), TargetError> {
        Ok(())
    }
}

/// A registered target.
#[derive(Debug)]
pub struct Target {
    pub(crate) name: &'static str,
    pub(crate) device_class: DeviceClass,
    pub(crate) version: (u16, u16, u16),
    pub(crate) vendor: &'static str,
    pub(crate) ops: fn() -> Box<dyn TargetOps>,
}

impl Target {
    /// Name of the target, as looked up in the registry.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Device class of the target.
    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    /// Version of the back-end.
    pub fn version(&self) -> (u16, u16, u16) {
        self.version
    }

    /// Vendor of the back-end.
    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    pub(crate) fn operations(&self) -> Box<dyn TargetOps> {
        (self.ops)()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let (major, minor, patch) = self.version;

        write!(
            formatter,
            "{} ({}, {major}.{minor}.{patch}, {})",
            self.name, self.device_class, self.vendor
        )
    }
}

/// Operand-count table shared by the built-in back-ends.
pub(crate) fn check_operand_count(instruction: &Instruction) -> Result<(), TargetError> {
    let expected = match instruction.opcode {
        Opcode::Nop | Opcode::Halt | Opcode::Return => 0,
        Opcode::Branch | Opcode::Call => 1,
        Opcode::Load | Opcode::Store | Opcode::Move | Opcode::Add | Opcode::Sub => 2,
    };

    let found = instruction.operands.len();

    if found != expected {
        return Err(TargetError::WrongOperandCount {
            mnemonic: instruction.opcode.mnemonic(),
            expected,
            found,
        });
    }

    Ok(())
}

/// Unknown configuration keys are ignored; say so, so a typo in a key does
/// not vanish silently.
pub(crate) fn log_ignored_keys(
    target: &str,
    configuration: &TargetConfiguration,
    known: &[&str],
) {
    for key in configuration.keys() {
        if !known.contains(&key) {
            log::debug!("the `{target}` back-end ignores the `{key}` configuration key");
        }
    }
}

/// Shared by both built-in back-ends: the `pad-align` key pads the code
/// region with NOPs up to a power-of-two boundary.
pub(crate) fn parse_pad_align(
    configuration: &TargetConfiguration,
) -> Result<Option<u32>, TargetError> {
    let Some(value) = configuration.get("pad-align") else {
        return Ok(None);
    };

    let alignment: u32 = value.parse().map_err(|_| TargetError::InvalidConfiguration {
        key: "pad-align",
        value: value.to_string(),
        reason: "expected an unsigned integer",
    })?;

    if !alignment.is_power_of_two() {
        return Err(TargetError::InvalidConfiguration {
            key: "pad-align",
            value: value.to_string(),
            reason: "expected a power of two",
        });
    }

    Ok(Some(alignment))
}

/// Per-back-end parameters of the shared emission driver.
pub(crate) struct EmitParams<'a> {
    pub(crate) name: &'a str,
    pub(crate) nop: &'a [u8],
    pub(crate) pad_align: Option<u32>,
}

enum ImageKind {
    Executable,
    Library,
}

/// The shared emission driver: both built-in back-ends produce the same
/// output shapes, differing only in their encodings and padding bytes.
pub(crate) fn emit(
    params: &EmitParams<'_>,
    request: &EmitRequest<'_>,
    output: &mut OutputBuffer,
) -> Result<(), TargetError> {
    match request.format {
        OutputFormat::Assembly => {
            emit_listing(params, request, output);

            Ok(())
        }
        OutputFormat::Object => emit_image(params, request, output, None),
        OutputFormat::Executable => emit_image(params, request, output, Some(ImageKind::Executable)),
        OutputFormat::Library => emit_image(params, request, output, Some(ImageKind::Library)),
    }
}

fn emit_image(
    params: &EmitParams<'_>,
    request: &EmitRequest<'_>,
    output: &mut OutputBuffer,
    image: Option<ImageKind>,
) -> Result<(), TargetError> {
    let header_size = if image.is_some() { 16 } else { 0 };

    if header_size > 0 {
        output.extend(&[0; 16]);
    }

    // Code region.
    let code_start = output.len();

    for lowered in request.lowered {
        output.extend(&lowered.bytes);
    }

    if let Some(alignment) = params.pad_align {
        pad_with_nops(output, code_start, alignment as usize, params.nop);
    }

    let code_size = output.len() - code_start;

    // Global storage, each value at its required alignment. Addresses are
    // image-relative.
    let mut addresses = Vec::with_capacity(request.globals.len());

    for global in request.globals {
        let alignment = match global.address.alignment {
            AlignmentKind::None | AlignmentKind::Packed => 1,
            AlignmentKind::Natural => natural_alignment(global.type_id) as usize,
            AlignmentKind::Explicit => global.address.alignment_value.max(1) as usize,
        };

        output.align_to(alignment, 0x00);
        addresses.push((global.id, output.len() as u64));

        match &global.initializer {
            Some(bytes) => output.extend(bytes),
            None => output.extend_zeroed(global.size as usize),
        }
    }

    // Fix the code up against the global addresses.
    for relocation in request.relocations {
        apply_relocation(relocation, &addresses, output, code_start, code_size)?;
    }

    if let Some(kind) = image {
        let mut header = Vec::with_capacity(16);

        header.extend_from_slice(match kind {
            ImageKind::Executable => b"CASX",
            ImageKind::Library => b"CASL",
        });
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(
            &match kind {
                ImageKind::Executable => code_start as u32,
                ImageKind::Library => request.globals.len() as u32,
            }
            .to_le_bytes(),
        );
        header.extend_from_slice(&(output.len() as u32).to_le_bytes());

        let patched = output.patch(0, &header);
        debug_assert!(patched, "the image header placeholder is always present");
    }

    Ok(())
}

fn apply_relocation(
    relocation: &Relocation,
    addresses: &[(u32, u64)],
    output: &mut OutputBuffer,
    code_start: usize,
    code_size: usize,
) -> Result<(), TargetError> {
    let field_width = match relocation.kind {
        RelocationKind::Absolute64 => 8,
        RelocationKind::Absolute32 | RelocationKind::Relative32 => 4,
    };

    let offset = relocation.offset as usize;

    if offset + field_width > code_size {
        return Err(TargetError::RelocationOutOfRange { offset: relocation.offset });
    }

    let address = addresses
        .iter()
        .find(|(id, _)| *id == relocation.symbol)
        .map(|(_, address)| *address)
        .ok_or(TargetError::UnknownSymbol { id: relocation.symbol })?;

    let value = address as i128 + relocation.addend as i128;
    let position = code_start + offset;

    let patched = match relocation.kind {
        RelocationKind::Absolute32 => {
            let value: u32 = value
                .try_into()
                .map_err(|_| TargetError::RelocationOverflow { offset: relocation.offset })?;

            output.patch(position, &value.to_le_bytes())
        }

        RelocationKind::Absolute64 => {
            let value: u64 = value
                .try_into()
                .map_err(|_| TargetError::RelocationOverflow { offset: relocation.offset })?;

            output.patch(position, &value.to_le_bytes())
        }

        RelocationKind::Relative32 => {
            let relative: i32 = (value - (position as i128 + 4))
                .try_into()
                .map_err(|_| TargetError::RelocationOverflow { offset: relocation.offset })?;

            output.patch(position, &relative.to_le_bytes())
        }
    };

    debug_assert!(patched, "the relocation range was checked against the code region");

    Ok(())
}

fn pad_with_nops(output: &mut OutputBuffer, code_start: usize, alignment: usize, nop: &[u8]) {
    if alignment < 2 {
        return;
    }

    let misalignment = (output.len() - code_start) % alignment;

    if misalignment == 0 {
        return;
    }

    let mut padding = alignment - misalignment;

    while padding >= nop.len() {
        output.extend(nop);
        padding -= nop.len();
    }

    output.extend_zeroed(padding);
}

fn emit_listing(params: &EmitParams<'_>, request: &EmitRequest<'_>, output: &mut OutputBuffer) {
    let version = request.module.version;

    let mut listing = String::new();
    listing.push_str(&format!("; casm {} listing\n", params.name));
    listing.push_str(&format!(
        "; module {}.{}.{}, {} instruction(s), {} global(s)\n",
        version.major,
        version.minor,
        version.patch,
        request.instructions.len(),
        request.globals.len(),
    ));

    let mut offset = 0;

    for (instruction, lowered) in request.instructions.iter().zip(request.lowered) {
        let bytes =
            lowered.bytes.iter().map(|byte| format!("{byte:02x}")).collect::<Vec<_>>().join(" ");

        listing.push_str(&format!("{offset:08x}  {bytes:<24}  {}\n", render_instruction(instruction)));

        offset += lowered.bytes.len();
    }

    for global in request.globals {
        listing.push_str(&format!(
            "; global `{}`: {} space, {} byte(s)\n",
            global.name, global.address.space, global.size,
        ));
    }

    output.extend(listing.as_bytes());
}

fn render_instruction(instruction: &Instruction) -> String {
    if instruction.operands.is_empty() {
        return instruction.opcode.mnemonic().to_string();
    }

    let operands = instruction
        .operands
        .iter()
        .map(render_operand)
        .collect::<Vec<_>>()
        .join(", ");

    format!("{} {operands}", instruction.opcode.mnemonic())
}

fn render_operand(operand: &Operand) -> String {
    match operand.kind {
        OperandKind::None => "_".to_string(),
        OperandKind::Register => format!("r{}", operand.value),
        OperandKind::Immediate => format!("{}", operand.value),
        OperandKind::Memory => format!("[{:#x}]", operand.value),
        OperandKind::Label => format!("@{:#x}", operand.value),
        OperandKind::Symbol => format!("sym:{}", operand.value),
    }
}

#[cfg(test)]
mod tests {
    use casm_object::coil::{
        Access, MemoryAddress, MemoryOrdering, Space,
    };

    use super::*;

    fn request_with<'a>(
        module: &'a Module,
        globals: &'a [Global],
        lowered: &'a [TargetInstruction],
        relocations: &'a [Relocation],
        format: OutputFormat,
    ) -> EmitRequest<'a> {
        EmitRequest {
            module,
            format,
            functions: &[],
            globals,
            instructions: &[],
            lowered,
            relocations,
        }
    }

    fn one_global(id: u32, size: u32, initializer: Option<Vec<u8>>) -> Global {
        Global {
            id,
            name: bstr::BString::from(format!("g{id}")),
            address: MemoryAddress {
                space: Space::Global,
                access: Access::Normal,
                alignment: AlignmentKind::Explicit,
                alignment_value: 8,
                order: MemoryOrdering::Relaxed,
            },
            type_id: casm_object::coil::type_ids::I64,
            size,
            flags: casm_object::coil::GlobalFlags::EMPTY,
            initializer,
        }
    }

    #[test]
    fn test_emit_object_image_with_relocation() {
        let module = Module::new();
        let globals = [one_global(1, 8, Some(vec![0x11; 8]))];
        // 8 bytes of code, with a 32-bit hole at offset 4.
        let lowered = [TargetInstruction { bytes: vec![0xaa, 0xbb, 0xcc, 0xdd] }, TargetInstruction {
            bytes: vec![0x00, 0x00, 0x00, 0x00],
        }];
        let relocations =
            [Relocation { offset: 4, symbol: 1, kind: RelocationKind::Absolute32, addend: 0 }];

        let request =
            request_with(&module, &globals, &lowered, &relocations, OutputFormat::Object);

        let mut output = OutputBuffer::new();
        emit(&EmitParams { name: "test", nop: &[0x90], pad_align: None }, &request, &mut output)
            .unwrap();

        // Code (8 bytes) then the global at its 8-byte alignment.
        assert_eq!(output.len(), 16);
        // The hole now holds the global's image-relative address.
        assert_eq!(&output.as_slice()[4..8], &8u32.to_le_bytes());
        assert_eq!(&output.as_slice()[8..], &[0x11; 8]);
    }

    #[test]
    fn test_emit_rejects_out_of_range_relocation() {
        let module = Module::new();
        let lowered = [TargetInstruction { bytes: vec![0x00; 4] }];
        let relocations =
            [Relocation { offset: 2, symbol: 1, kind: RelocationKind::Absolute32, addend: 0 }];

        let request = request_with(&module, &[], &lowered, &relocations, OutputFormat::Object);

        let mut output = OutputBuffer::new();
        let result =
            emit(&EmitParams { name: "test", nop: &[0x90], pad_align: None }, &request, &mut output);

        assert!(matches!(result, Err(TargetError::RelocationOutOfRange { offset: 2 })));
    }

    #[test]
    fn test_emit_rejects_unknown_symbol() {
        let module = Module::new();
        let lowered = [TargetInstruction { bytes: vec![0x00; 4] }];
        let relocations =
            [Relocation { offset: 0, symbol: 42, kind: RelocationKind::Absolute32, addend: 0 }];

        let request = request_with(&module, &[], &lowered, &relocations, OutputFormat::Object);

        let mut output = OutputBuffer::new();
        let result =
            emit(&EmitParams { name: "test", nop: &[0x90], pad_align: None }, &request, &mut output);

        assert!(matches!(result, Err(TargetError::UnknownSymbol { id: 42 })));
    }

    #[test]
    fn test_emit_pads_code_with_nops() {
        let module = Module::new();
        let lowered = [TargetInstruction { bytes: vec![0xc3] }];

        let request = request_with(&module, &[], &lowered, &[], OutputFormat::Object);

        let mut output = OutputBuffer::new();
        emit(&EmitParams { name: "test", nop: &[0x90], pad_align: Some(8) }, &request, &mut output)
            .unwrap();

        assert_eq!(output.as_slice(), &[0xc3, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90]);
    }

    #[test]
    fn test_emit_executable_header() {
        let module = Module::new();
        let lowered = [TargetInstruction { bytes: vec![0xc3] }];

        let request = request_with(&module, &[], &lowered, &[], OutputFormat::Executable);

        let mut output = OutputBuffer::new();
        emit(&EmitParams { name: "test", nop: &[0x90], pad_align: None }, &request, &mut output)
            .unwrap();

        let bytes = output.as_slice();

        assert_eq!(&bytes[0..4], b"CASX");
        // Format version.
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        // Entry offset: right after the header.
        assert_eq!(&bytes[8..12], &16u32.to_le_bytes());
        // Image size.
        assert_eq!(&bytes[12..16], &17u32.to_le_bytes());
        assert_eq!(bytes[16], 0xc3);
    }

    #[test]
    fn test_emit_library_header() {
        let module = Module::new();
        let globals = [one_global(1, 8, None)];

        let request = request_with(&module, &globals, &[], &[], OutputFormat::Library);

        let mut output = OutputBuffer::new();
        emit(&EmitParams { name: "test", nop: &[0x90], pad_align: None }, &request, &mut output)
            .unwrap();

        let bytes = output.as_slice();

        assert_eq!(&bytes[0..4], b"CASL");
        // Global count.
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        // The uninitialized global is zeroed storage.
        assert_eq!(&bytes[16..24], &[0u8; 8]);
    }

    #[test]
    fn test_emit_listing() {
        let module = Module::new();
        let instructions = [
            Instruction::new(Opcode::Move, vec![Operand::register(0, 32), Operand::immediate(42, 32)]),
            Instruction::new(Opcode::Return, vec![]),
        ];
        let lowered = [
            TargetInstruction { bytes: vec![0x48, 0xc7, 0xc0, 0x2a, 0x00, 0x00, 0x00] },
            TargetInstruction { bytes: vec![0xc3] },
        ];

        let request = EmitRequest {
            module: &module,
            format: OutputFormat::Assembly,
            functions: &[],
            globals: &[],
            instructions: &instructions,
            lowered: &lowered,
            relocations: &[],
        };

        let mut output = OutputBuffer::new();
        emit(&EmitParams { name: "x86_64", nop: &[0x90], pad_align: None }, &request, &mut output)
            .unwrap();

        let listing = String::from_utf8(output.as_slice().to_vec()).unwrap();

        assert!(listing.starts_with("; casm x86_64 listing\n"));
        assert!(listing.contains("mov r0, 42"));
        assert!(listing.contains("ret"));
    }

    #[test]
    fn test_operand_count_table() {
        assert!(check_operand_count(&Instruction::new(Opcode::Nop, vec![])).is_ok());
        assert!(matches!(
            check_operand_count(&Instruction::new(Opcode::Move, vec![])),
            Err(TargetError::WrongOperandCount { mnemonic: "mov", expected: 2, found: 0 })
        ));
    }

    #[test]
    fn test_output_format_round_trip() {
        for code in 0..4 {
            let format = OutputFormat::from_code(code).unwrap();

            assert_eq!(format.name().parse::<OutputFormat>(), Ok(format));
        }

        assert_eq!(OutputFormat::from_code(4), None);
        assert!("coff".parse::<OutputFormat>().is_err());
    }
}

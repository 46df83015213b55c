//! The AArch64 back-end.
//!
//! Every lowered instruction is one 32-bit word, stored little-endian.
//! Absolute memory operands have no AArch64 encoding, so `load` and `store`
//! are rejected up front by the instruction validator. Branches and calls
//! are emitted with a zeroed imm26, to be fixed up by a later link step.

use casm_object::coil::{Instruction, Opcode, OperandKind};
use log::debug;

use super::{
    check_operand_count, emit, log_ignored_keys, parse_pad_align, DeviceClass, EmitParams,
    EmitRequest, Target, TargetError, TargetInstruction, TargetOps,
};
use crate::{buffer::OutputBuffer, configuration::TargetConfiguration};

const NOP: &[u8] = &[0x1f, 0x20, 0x03, 0xd5];
const REGISTER_COUNT: u64 = 31;

pub(crate) fn descriptor() -> Target {
    Target {
        name: "aarch64",
        device_class: DeviceClass::Cpu,
        version: (1, 0, 0),
        vendor: "generic",
        ops: make_ops,
    }
}

fn make_ops() -> Box<dyn TargetOps> {
    Box::<Aarch64>::default()
}

#[derive(Debug, Default)]
struct Aarch64 {
    pad_align: Option<u32>,
}

impl TargetOps for Aarch64 {
    fn initialize(&mut self) -> Result<(), TargetError> {
        debug!("initializing the aarch64 back-end");

        Ok(())
    }

    fn finalize(&mut self) {
        debug!("finalizing the aarch64 back-end");
    }

    fn validate_instruction(&self, instruction: &Instruction) -> Result<(), TargetError> {
        check_operand_count(instruction)?;

        // No absolute addressing on this target.
        if matches!(instruction.opcode, Opcode::Load | Opcode::Store)
            || instruction.operands.iter().any(|operand| operand.kind == OperandKind::Memory)
        {
            return Err(TargetError::UnsupportedInstruction {
                mnemonic: instruction.opcode.mnemonic(),
            });
        }

        Ok(())
    }

    fn map_instruction(&self, instruction: &Instruction) -> Result<TargetInstruction, TargetError> {
        self.validate_instruction(instruction)?;

        let mnemonic = instruction.opcode.mnemonic();
        let operands = &instruction.operands;

        let word = match instruction.opcode {
            // nop
            Opcode::Nop => 0xd503_201f,
            // hlt #0
            Opcode::Halt => 0xd440_0000,
            // ret
            Opcode::Return => 0xd65f_03c0,

            Opcode::Move => match (operands[0].kind, operands[1].kind) {
                (OperandKind::Register, OperandKind::Immediate) => {
                    let destination = register(operands[0].value)?;
                    let immediate = immediate16(operands[1].value)?;

                    // movz xd, #imm16
                    0xd280_0000 | (u32::from(immediate) << 5) | destination
                }

                (OperandKind::Register, OperandKind::Register) => {
                    let destination = register(operands[0].value)?;
                    let source = register(operands[1].value)?;

                    // orr xd, xzr, xm
                    0xaa00_03e0 | (source << 16) | destination
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },

            Opcode::Add | Opcode::Sub => {
                let is_add = instruction.opcode == Opcode::Add;

                match (operands[0].kind, operands[1].kind) {
                    (OperandKind::Register, OperandKind::Immediate) => {
                        let destination = register(operands[0].value)?;
                        let immediate = immediate12(operands[1].value)?;

                        // add/sub xd, xd, #imm12
                        let base: u32 = if is_add { 0x9100_0000 } else { 0xd100_0000 };

                        base | (immediate << 10) | (destination << 5) | destination
                    }

                    (OperandKind::Register, OperandKind::Register) => {
                        let destination = register(operands[0].value)?;
                        let source = register(operands[1].value)?;

                        // add/sub xd, xd, xm
                        let base: u32 = if is_add { 0x8b00_0000 } else { 0xcb00_0000 };

                        base | (source << 16) | (destination << 5) | destination
                    }

                    _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
                }
            }

            Opcode::Branch | Opcode::Call => match operands[0].kind {
                OperandKind::Label | OperandKind::Symbol => {
                    // b/bl with a zeroed imm26; fixed up post-emit.
                    if instruction.opcode == Opcode::Branch { 0x1400_0000 } else { 0x9400_0000 }
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },

            Opcode::Load | Opcode::Store => {
                // Rejected by `validate_instruction` above.
                return Err(TargetError::UnsupportedInstruction { mnemonic });
            }
        };

        Ok(TargetInstruction { bytes: word.to_le_bytes().to_vec() })
    }

    fn generate_code(
        &mut self,
        request: &EmitRequest<'_>,
        output: &mut OutputBuffer,
    ) -> Result<(), TargetError> {
        emit(&EmitParams { name: "aarch64", nop: NOP, pad_align: self.pad_align }, request, output)
    }

    fn apply_configuration(
        &mut self,
        configuration: &TargetConfiguration,
    ) -> Result<(), TargetError> {
        self.pad_align = parse_pad_align(configuration)?;
        log_ignored_keys("aarch64", configuration, &["pad-align"]);

        Ok(())
    }
}

fn register(index: u64) -> Result<u32, TargetError> {
    if index >= REGISTER_COUNT {
        return Err(TargetError::RegisterOutOfRange { index, count: REGISTER_COUNT });
    }

    Ok(index as u32)
}

fn immediate16(value: u64) -> Result<u16, TargetError> {
    value.try_into().map_err(|_| TargetError::ImmediateTooWide { value, bits: 16 })
}

fn immediate12(value: u64) -> Result<u32, TargetError> {
    if value > 0xfff {
        return Err(TargetError::ImmediateTooWide { value, bits: 12 });
    }

    Ok(value as u32)
}

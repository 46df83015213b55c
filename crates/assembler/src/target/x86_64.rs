//! The x86-64 back-end.
//!
//! Lowered code uses the 64-bit operand size throughout (REX.W). Branches
//! and calls are emitted with a zeroed rel32, to be fixed up by relocations
//! or a later link step.

use casm_object::coil::{Instruction, Opcode, OperandKind};
use log::debug;

use super::{
    check_operand_count, emit, log_ignored_keys, parse_pad_align, DeviceClass, EmitParams,
    EmitRequest, Target, TargetError, TargetInstruction, TargetOps,
};
use crate::{buffer::OutputBuffer, configuration::TargetConfiguration};

const NOP: &[u8] = &[0x90];
const REGISTER_COUNT: u64 = 16;

pub(crate) fn descriptor() -> Target {
    Target {
        name: "x86_64",
        device_class: DeviceClass::Cpu,
        version: (1, 0, 0),
        vendor: "generic",
        ops: make_ops,
    }
}

fn make_ops() -> Box<dyn TargetOps> {
    Box::<X86_64>::default()
}

#[derive(Debug, Default)]
struct X86_64 {
    pad_align: Option<u32>,
}

impl TargetOps for X86_64 {
    fn initialize(&mut self) -> Result<(), TargetError> {
        debug!("initializing the x86_64 back-end");

        Ok(())
    }

    fn finalize(&mut self) {
        debug!("finalizing the x86_64 back-end");
    }

    fn map_instruction(&self, instruction: &Instruction) -> Result<TargetInstruction, TargetError> {
        check_operand_count(instruction)?;

        let mnemonic = instruction.opcode.mnemonic();
        let operands = &instruction.operands;

        let bytes = match instruction.opcode {
            Opcode::Nop => NOP.to_vec(),
            Opcode::Halt => vec![0xf4],
            Opcode::Return => vec![0xc3],

            Opcode::Move => match (operands[0].kind, operands[1].kind) {
                (OperandKind::Register, OperandKind::Immediate) => {
                    let register = register(operands[0].value)?;
                    let immediate = immediate32(operands[1].value)?;

                    // REX.W + C7 /0.
                    let mut bytes = vec![rex(false, register), 0xc7, 0xc0 | (register & 0x07)];
                    bytes.extend_from_slice(&immediate.to_le_bytes());
                    bytes
                }

                (OperandKind::Register, OperandKind::Register) => {
                    let destination = register(operands[0].value)?;
                    let source = register(operands[1].value)?;

                    // REX.W + 89 /r.
                    vec![
                        rex(source >= 8, destination),
                        0x89,
                        0xc0 | ((source & 0x07) << 3) | (destination & 0x07),
                    ]
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },

            Opcode::Add | Opcode::Sub => {
                let extension = if instruction.opcode == Opcode::Add { 0x00 } else { 0x05 };
                let rr_opcode = if instruction.opcode == Opcode::Add { 0x01 } else { 0x29 };

                match (operands[0].kind, operands[1].kind) {
                    (OperandKind::Register, OperandKind::Immediate) => {
                        let register = register(operands[0].value)?;
                        let immediate = immediate32(operands[1].value)?;

                        // REX.W + 81 /0 (add) or /5 (sub).
                        let mut bytes = vec![
                            rex(false, register),
                            0x81,
                            0xc0 | (extension << 3) | (register & 0x07),
                        ];
                        bytes.extend_from_slice(&immediate.to_le_bytes());
                        bytes
                    }

                    (OperandKind::Register, OperandKind::Register) => {
                        let destination = register(operands[0].value)?;
                        let source = register(operands[1].value)?;

                        vec![
                            rex(source >= 8, destination),
                            rr_opcode,
                            0xc0 | ((source & 0x07) << 3) | (destination & 0x07),
                        ]
                    }

                    _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
                }
            }

            Opcode::Load => match (operands[0].kind, operands[1].kind) {
                (OperandKind::Register, OperandKind::Memory) => {
                    absolute_access(0x8b, operands[0].value, operands[1].value)?
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },

            Opcode::Store => match (operands[0].kind, operands[1].kind) {
                (OperandKind::Memory, OperandKind::Register) => {
                    absolute_access(0x89, operands[1].value, operands[0].value)?
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },

            Opcode::Branch | Opcode::Call => match operands[0].kind {
                OperandKind::Label | OperandKind::Symbol => {
                    let opcode = if instruction.opcode == Opcode::Branch { 0xe9 } else { 0xe8 };

                    // rel32 placeholder; fixed up post-emit.
                    vec![opcode, 0x00, 0x00, 0x00, 0x00]
                }

                _ => return Err(TargetError::UnsupportedInstruction { mnemonic }),
            },
        };

        Ok(TargetInstruction { bytes })
    }

    fn generate_code(
        &mut self,
        request: &EmitRequest<'_>,
        output: &mut OutputBuffer,
    ) -> Result<(), TargetError> {
        emit(&EmitParams { name: "x86_64", nop: NOP, pad_align: self.pad_align }, request, output)
    }

    fn apply_configuration(
        &mut self,
        configuration: &TargetConfiguration,
    ) -> Result<(), TargetError> {
        self.pad_align = parse_pad_align(configuration)?;
        log_ignored_keys("x86_64", configuration, &["pad-align"]);

        Ok(())
    }
}

/// `REX.W`, with the `R` extension for the ModRM `reg` field and the `B`
/// extension for the ModRM `rm` field.
fn rex(reg_extended: bool, rm: u8) -> u8 {
    0x48 | u8::from(reg_extended) << 2 | (rm >> 3)
}

fn register(index: u64) -> Result<u8, TargetError> {
    if index >= REGISTER_COUNT {
        return Err(TargetError::RegisterOutOfRange { index, count: REGISTER_COUNT });
    }

    Ok(index as u8)
}

fn immediate32(value: u64) -> Result<u32, TargetError> {
    value.try_into().map_err(|_| TargetError::ImmediateTooWide { value, bits: 32 })
}

/// `mov` between a register and an absolute address: opcode + ModRM with a
/// SIB-encoded disp32.
fn absolute_access(opcode: u8, register_index: u64, address: u64) -> Result<Vec<u8>, TargetError> {
    let register = register(register_index)?;
    let displacement = immediate32(address)?;

    let mut bytes =
        vec![rex(register >= 8, 0), opcode, 0x04 | ((register & 0x07) << 3), 0x25];
    bytes.extend_from_slice(&displacement.to_le_bytes());

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use casm_object::coil::Operand;

    use super::*;

    fn lower(instruction: Instruction) -> Result<Vec<u8>, TargetError> {
        X86_64::default().map_instruction(&instruction).map(|lowered| lowered.bytes)
    }

    #[test]
    fn test_zero_operand_encodings() {
        assert_eq!(lower(Instruction::new(Opcode::Nop, vec![])).unwrap(), &[0x90]);
        assert_eq!(lower(Instruction::new(Opcode::Halt, vec![])).unwrap(), &[0xf4]);
        assert_eq!(lower(Instruction::new(Opcode::Return, vec![])).unwrap(), &[0xc3]);
    }

    #[test]
    fn test_mov_register_immediate() {
        // mov rax, 42
        assert_eq!(
            lower(Instruction::new(
                Opcode::Move,
                vec![Operand::register(0, 64), Operand::immediate(42, 32)],
            ))
            .unwrap(),
            &[0x48, 0xc7, 0xc0, 0x2a, 0x00, 0x00, 0x00]
        );

        // mov r8, 1: the high register flips REX.B.
        assert_eq!(
            lower(Instruction::new(
                Opcode::Move,
                vec![Operand::register(8, 64), Operand::immediate(1, 32)],
            ))
            .unwrap(),
            &[0x49, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_mov_register_register() {
        // mov rcx, rdx
        assert_eq!(
            lower(Instruction::new(
                Opcode::Move,
                vec![Operand::register(1, 64), Operand::register(2, 64)],
            ))
            .unwrap(),
            &[0x48, 0x89, 0xd1]
        );
    }

    #[test]
    fn test_alu_encodings() {
        // add rax, 8
        assert_eq!(
            lower(Instruction::new(
                Opcode::Add,
                vec![Operand::register(0, 64), Operand::immediate(8, 32)],
            ))
            .unwrap(),
            &[0x48, 0x81, 0xc0, 0x08, 0x00, 0x00, 0x00]
        );

        // sub rbx, 1
        assert_eq!(
            lower(Instruction::new(
                Opcode::Sub,
                vec![Operand::register(3, 64), Operand::immediate(1, 32)],
            ))
            .unwrap(),
            &[0x48, 0x81, 0xeb, 0x01, 0x00, 0x00, 0x00]
        );

        // add rcx, rdx
        assert_eq!(
            lower(Instruction::new(
                Opcode::Add,
                vec![Operand::register(1, 64), Operand::register(2, 64)],
            ))
            .unwrap(),
            &[0x48, 0x01, 0xd1]
        );
    }

    #[test]
    fn test_absolute_load_store() {
        // mov rax, [0x1000]
        assert_eq!(
            lower(Instruction::new(
                Opcode::Load,
                vec![
                    Operand::register(0, 64),
                    Operand { kind: OperandKind::Memory, width: 64, value: 0x1000 },
                ],
            ))
            .unwrap(),
            &[0x48, 0x8b, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00]
        );

        // mov [0x1000], rax
        assert_eq!(
            lower(Instruction::new(
                Opcode::Store,
                vec![
                    Operand { kind: OperandKind::Memory, width: 64, value: 0x1000 },
                    Operand::register(0, 64),
                ],
            ))
            .unwrap(),
            &[0x48, 0x89, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00]
        );
    }

    #[test]
    fn test_branch_placeholders() {
        assert_eq!(
            lower(Instruction::new(Opcode::Branch, vec![Operand::label(0x10)])).unwrap(),
            &[0xe9, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            lower(Instruction::new(Opcode::Call, vec![Operand::symbol(1)])).unwrap(),
            &[0xe8, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            lower(Instruction::new(Opcode::Move, vec![])),
            Err(TargetError::WrongOperandCount { .. })
        ));

        assert!(matches!(
            lower(Instruction::new(
                Opcode::Move,
                vec![Operand::register(16, 64), Operand::immediate(0, 32)],
            )),
            Err(TargetError::RegisterOutOfRange { index: 16, .. })
        ));

        assert!(matches!(
            lower(Instruction::new(
                Opcode::Move,
                vec![Operand::register(0, 64), Operand::immediate(u64::MAX, 64)],
            )),
            Err(TargetError::ImmediateTooWide { bits: 32, .. })
        ));

        assert!(matches!(
            lower(Instruction::new(
                Opcode::Branch,
                vec![Operand::register(0, 64)],
            )),
            Err(TargetError::UnsupportedInstruction { mnemonic: "br" })
        ));
    }

    #[test]
    fn test_pad_align_configuration() {
        let mut target = X86_64::default();

        // No configuration: no padding.
        target.apply_configuration(&TargetConfiguration::default()).unwrap();
        assert_eq!(target.pad_align, None);

        let configuration = TargetConfiguration::parse("pad-align = 16\n", "test.conf").unwrap();
        target.apply_configuration(&configuration).unwrap();
        assert_eq!(target.pad_align, Some(16));

        let configuration = TargetConfiguration::parse("pad-align = 3\n", "test.conf").unwrap();
        assert!(matches!(
            target.apply_configuration(&configuration),
            Err(TargetError::InvalidConfiguration { key: "pad-align", .. })
        ));
    }
}

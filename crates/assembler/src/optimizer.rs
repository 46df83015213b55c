//! Optimization levels and the passes they select.
//!
//! Passes run over the decoded instruction stream, between decoding and
//! lowering. They only ever remove instructions; none of them invents new
//! code, so a pass list is safe to run on any structurally valid stream.

use std::{fmt, str::FromStr};

use casm_object::coil::{Instruction, Opcode, OperandKind};
use log::debug;

/// How hard the optimizer tries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// No optimization at all.
    O0,
    /// The default: cheap clean-ups.
    #[default]
    O1,
    /// Everything `O1` does, plus redundant-move elimination.
    O2,
    /// Everything `O2` does, plus unreachable-code trimming.
    O3,
    /// Optimize for size. Currently the `O2` pass list.
    Size,
}

impl OptimizationLevel {
    /// Map a numeric level to a variant. Only 0 to 3 are numeric levels; the
    /// size level has no number.
    pub fn from_level(level: u32) -> Option<Self> {
        match level {
            0 => Some(Self::O0),
            1 => Some(Self::O1),
            2 => Some(Self::O2),
            3 => Some(Self::O3),
            _ => None,
        }
    }

    /// Stable name of the level, as written on a command-line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::O0 => "0",
            Self::O1 => "1",
            Self::O2 => "2",
            Self::O3 => "3",
            Self::Size => "s",
        }
    }

    /// The passes this level runs, in order.
    pub fn passes(&self) -> &'static [Pass] {
        match self {
            Self::O0 => &[],
            Self::O1 => &[Pass::StripNops],
            Self::O2 | Self::Size => &[Pass::StripNops, Pass::DropSelfMoves],
            Self::O3 => &[Pass::StripNops, Pass::DropSelfMoves, Pass::TrimUnreachable],
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "0" => Ok(Self::O0),
            "1" => Ok(Self::O1),
            "2" => Ok(Self::O2),
            "3" => Ok(Self::O3),
            "s" | "size" => Ok(Self::Size),
            _ => Err(format!("`{value}` is not an optimization level; expected 0, 1, 2, 3 or s")),
        }
    }
}

/// One optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Remove `nop` instructions.
    StripNops,
    /// Remove `mov` instructions whose source and destination are the same
    /// register.
    DropSelfMoves,
    /// Remove everything after a final `ret` or `halt`. Skipped as soon as
    /// the stream carries a label operand, since a branch could land in the
    /// trimmed tail.
    TrimUnreachable,
}

impl Pass {
    /// Name of the pass, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StripNops => "strip-nops",
            Self::DropSelfMoves => "drop-self-moves",
            Self::TrimUnreachable => "trim-unreachable",
        }
    }

    /// Run the pass over the decoded stream.
    pub fn run(&self, instructions: &mut Vec<Instruction>) {
        let before = instructions.len();

        match self {
            Self::StripNops => {
                instructions.retain(|instruction| instruction.opcode != Opcode::Nop);
            }

            Self::DropSelfMoves => {
                instructions.retain(|instruction| !is_self_move(instruction));
            }

            Self::TrimUnreachable => {
                let has_labels = instructions.iter().any(|instruction| {
                    instruction
                        .operands
                        .iter()
                        .any(|operand| operand.kind == OperandKind::Label)
                });

                if !has_labels {
                    if let Some(position) = instructions.iter().position(|instruction| {
                        matches!(instruction.opcode, Opcode::Return | Opcode::Halt)
                    }) {
                        instructions.truncate(position + 1);
                    }
                }
            }
        }

        debug!("pass `{}` removed {} instruction(s)", self.name(), before - instructions.len());
    }
}

fn is_self_move(instruction: &Instruction) -> bool {
    instruction.opcode == Opcode::Move
        && instruction.operands.len() == 2
        && instruction.operands[0].kind == OperandKind::Register
        && instruction.operands[0] == instruction.operands[1]
}

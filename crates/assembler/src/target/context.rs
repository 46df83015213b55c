//! The per-assembly target context.

use std::fmt;

use casm_object::coil::Instruction;
use log::debug;

use super::{EmitRequest, Target, TargetError, TargetInstruction, TargetOps};
use crate::{buffer::OutputBuffer, configuration::TargetConfiguration};

/// A live instantiation of a [`Target`]: the descriptor plus the
/// target-private mutable state behind the capability set.
///
/// Creation runs the back-end's `initialize` exactly once; dropping the
/// context runs `finalize` exactly once. The context must outlive every
/// assembler operation that references it, which the assembler guarantees by
/// owning it.
pub struct TargetContext {
    descriptor: &'static Target,
    ops: Box<dyn TargetOps>,
}

impl TargetContext {
    /// Instantiate a target. On initialization failure no context is
    /// produced, and no `finalize` is owed.
    pub fn create(descriptor: &'static Target) -> Result<Self, TargetError> {
        let mut ops = descriptor.operations();
        ops.initialize()?;

        debug!("created a `{}` target context", descriptor.name());

        Ok(Self { descriptor, ops })
    }

    /// The descriptor this context was created from.
    pub fn descriptor(&self) -> &'static Target {
        self.descriptor
    }

    /// Check that an instruction is encodable on this target.
    pub fn validate_instruction(&self, instruction: &Instruction) -> Result<(), TargetError> {
        self.ops.validate_instruction(instruction)
    }

    /// Lower one instruction.
    pub fn map_instruction(
        &self,
        instruction: &Instruction,
    ) -> Result<TargetInstruction, TargetError> {
        self.ops.map_instruction(instruction)
    }

    /// Emit the whole output.
    pub fn generate_code(
        &mut self,
        request: &EmitRequest<'_>,
        output: &mut OutputBuffer,
    ) -> Result<(), TargetError> {
        self.ops.generate_code(request, output)
    }

    /// Apply a configuration bag.
    pub fn apply_configuration(
        &mut self,
        configuration: &TargetConfiguration,
    ) -> Result<(), TargetError> {
        self.ops.apply_configuration(configuration)
    }
}

impl Drop for TargetContext {
    fn drop(&mut self) {
        self.ops.finalize();

        debug!("destroyed the `{}` target context", self.descriptor.name());
    }
}

impl fmt::Debug for TargetContext {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_struct("TargetContext").field("descriptor", &self.descriptor).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{super::registry, *};

    #[test]
    fn test_create_and_drop() {
        let descriptor = registry::get_by_name("x86_64").unwrap();
        let context = TargetContext::create(descriptor).unwrap();

        assert_eq!(context.descriptor().name(), "x86_64");

        // `finalize` runs here, exactly once.
        drop(context);
    }
}

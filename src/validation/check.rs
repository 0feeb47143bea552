/// Instruction-stream validator
///
/// Decodes a compiled unit, walks every method body and hands each
/// statically named call and field access to all configured rules.
use crate::bytecode::classfile::{ClassFile, ClassFormatError};
use crate::bytecode::descriptor::{owner_class_name, MethodDescriptor};
use crate::bytecode::opcodes::{Instruction, Instructions};
use crate::validation::analysis::Analysis;
use crate::validation::rule::{AccessPoint, FieldAccess, MethodCall, Rule};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct BytecodeCheck {
    rules: Vec<Arc<dyn Rule>>,
}

impl BytecodeCheck {
    pub fn with_rules(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Check one class file, reporting into `analysis`. Only a malformed
    /// class file is an error; violations are data.
    pub fn run(&self, analysis: &Analysis, class_bytes: &[u8]) -> Result<(), ClassFormatError> {
        if self.rules.is_empty() {
            return Ok(());
        }
        let class = ClassFile::parse(class_bytes)?;
        let class_name = class.dotted_name();
        log::trace!(
            "Checking {} ({} methods) against {} rules",
            class_name,
            class.methods.len(),
            self.rules.len()
        );

        for method in &class.methods {
            let Some(code) = &method.code else {
                continue;
            };
            let access_point = AccessPoint {
                class_name: class_name.clone(),
                method_name: method.name.clone(),
            };
            for instruction in Instructions::new(code) {
                self.visit_instruction(analysis, &class, &access_point, &instruction?)?;
            }
        }
        Ok(())
    }

    fn visit_instruction(
        &self,
        analysis: &Analysis,
        class: &ClassFile,
        access_point: &AccessPoint,
        instruction: &Instruction<'_>,
    ) -> Result<(), ClassFormatError> {
        if !instruction.is_invoke() && !instruction.is_field_access() {
            return Ok(());
        }
        let Some(index) = instruction.pool_index() else {
            return Err(ClassFormatError::Truncated {
                offset: instruction.offset,
                wanted: 3,
            });
        };
        let member = class.constant_pool.member_ref(index)?;
        let owner = owner_class_name(&member.owner)?;

        if instruction.is_invoke() {
            let call = MethodCall {
                access_point: access_point.clone(),
                owner,
                method: member.name,
                descriptor: MethodDescriptor::parse(&member.descriptor)?,
            };
            for rule in &self.rules {
                rule.visit_call(analysis, &call);
            }
        } else {
            let access = FieldAccess {
                access_point: access_point.clone(),
                owner,
                field: member.name,
            };
            for rule in &self.rules {
                rule.visit_field_access(analysis, &access);
            }
        }
        Ok(())
    }
}

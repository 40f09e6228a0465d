//! The per-method input handed over by the class-file collaborator.

use crate::bytecode::{CodeItem, MethodDescriptor};

/// One entry of the exception table.
///
/// Covers the half-open address range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// First covered address
    pub start: u32,
    /// First address past the covered range
    pub end: u32,
    /// Address of the handler code
    pub handler: u32,
    /// Caught class, `None` for a catch-all (`finally`)
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    /// Returns `true` if the handler covers `offset`.
    #[must_use]
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Bytecode and metadata for a single method.
///
/// `code` is sorted by address. The address of the instruction after `code[i]` is
/// `code[i + 1].offset`; there is no instruction after the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Internal name of the declaring class
    pub class_name: String,
    /// Method name, `<init>` for constructors
    pub name: String,
    /// Parsed method descriptor
    pub descriptor: MethodDescriptor,
    /// `ACC_STATIC`
    pub is_static: bool,
    /// Operand stack limit, in slots
    pub max_stack: u16,
    /// Local variable limit, in slots
    pub max_locals: u16,
    /// Instructions in address order
    pub code: Vec<CodeItem>,
    /// Exception table in priority order
    pub handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Returns `true` for instance initializers.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Index into `code` of the instruction at `offset`.
    #[must_use]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.code.binary_search_by_key(&offset, |item| item.offset).ok()
    }

    /// `Class.name(desc)` for log messages and events.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    #[test]
    fn test_lookup_by_offset() {
        let body = MethodBody {
            class_name: "Foo".to_string(),
            name: "<init>".to_string(),
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            is_static: false,
            max_stack: 1,
            max_locals: 1,
            code: vec![
                CodeItem {
                    offset: 0,
                    insn: Instruction::Nop,
                },
                CodeItem {
                    offset: 3,
                    insn: Instruction::Return(None),
                },
            ],
            handlers: Vec::new(),
        };
        assert!(body.is_constructor());
        assert_eq!(body.index_of(3), Some(1));
        assert_eq!(body.index_of(1), None);
        assert_eq!(body.display_name(), "Foo.<init>()V");
    }

    #[test]
    fn test_handler_range_is_half_open() {
        let handler = ExceptionHandler {
            start: 2,
            end: 8,
            handler: 10,
            catch_type: None,
        };
        assert!(handler.covers(2));
        assert!(handler.covers(7));
        assert!(!handler.covers(8));
    }
}

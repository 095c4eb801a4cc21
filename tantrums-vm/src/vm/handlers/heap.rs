// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Heap pointer opcode handlers: alloc, free, reference and dereference.

use tantrums_core::heap::FreeOutcome;
use tantrums_core::object::{ObjBody, Provenance};
use tantrums_core::value::Value;

use crate::vm::error::{Result, RuntimeError};
use crate::vm::Vm;

impl Vm {
    /// Wrap the top of stack in a fresh pointer cell with full provenance
    /// for diagnostics: type name, line, size and enclosing function.
    pub(crate) fn execute_alloc(&mut self, type_name: u16, auto_manage: bool) -> Result<()> {
        let value = self.stack.pop()?;
        let type_name = self.constant_name(type_name)?;
        let provenance = Provenance {
            alloc_size: std::mem::size_of::<Value>(),
            alloc_line: self.current_line(),
            alloc_type: type_name,
            alloc_func: self.frame().function().name_for_trace().to_string(),
        };
        let depth = self.scope_depth;
        let pointer = self
            .heap
            .new_pointer(value, provenance, depth, auto_manage);
        self.stack.push(Value::Obj(pointer))
    }

    /// Release a pointer's cell. Freeing an already-invalid pointer is a
    /// double-free error; freeing a non-pointer does nothing.
    pub(crate) fn execute_free(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        match self.heap.free_pointer(&value) {
            FreeOutcome::Freed | FreeOutcome::NotAPointer => Ok(()),
            FreeOutcome::DoubleFree => Err(RuntimeError::DoubleFree),
        }
    }

    /// Address-of: wrap the top value in a pointer cell.
    pub(crate) fn execute_ptr_ref(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        let provenance = Provenance {
            alloc_size: std::mem::size_of::<Value>(),
            alloc_line: self.current_line(),
            alloc_type: value.type_name().to_string(),
            alloc_func: self.frame().function().name_for_trace().to_string(),
        };
        let depth = self.scope_depth;
        let auto = self.autofree_default;
        let pointer = self.heap.new_pointer(value, provenance, depth, auto);
        self.stack.push(Value::Obj(pointer))
    }

    pub(crate) fn execute_ptr_deref(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        let Value::Obj(obj) = &value else {
            return Err(RuntimeError::DerefNonPointer);
        };
        let ObjBody::Pointer(pointer) = &obj.body else {
            return Err(RuntimeError::DerefNonPointer);
        };
        let target = {
            let pointer = pointer.borrow();
            match (&pointer.target, pointer.is_valid) {
                (Some(target), true) => target.clone(),
                _ => {
                    return Err(RuntimeError::NullPointerDeref {
                        type_name: pointer.provenance.alloc_type.clone(),
                    });
                }
            }
        };
        self.stack.push(target)
    }

    /// `*p = v`: the value sits below the pointer on the stack. The assigned
    /// value is left behind as the expression result.
    pub(crate) fn execute_ptr_set(&mut self) -> Result<()> {
        let pointer_value = self.stack.pop()?;
        let new_value = self.stack.pop()?;
        let Value::Obj(obj) = &pointer_value else {
            return Err(RuntimeError::DerefNonPointer);
        };
        let ObjBody::Pointer(pointer) = &obj.body else {
            return Err(RuntimeError::DerefNonPointer);
        };
        {
            let mut pointer = pointer.borrow_mut();
            if !pointer.is_valid || pointer.target.is_none() {
                return Err(RuntimeError::NullPointerDeref {
                    type_name: pointer.provenance.alloc_type.clone(),
                });
            }
            pointer.target = Some(new_value.clone());
        }
        self.stack.push(new_value)
    }
}

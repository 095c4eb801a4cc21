// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The `.42ass` bytecode file format.
//!
//! Layout (little-endian throughout):
//!
//! ```text
//! Header:
//!   magic      : "42AS" (4 bytes)
//!   version    : u8
//!
//! Then one top-level function (the script), which recursively contains
//! all other functions as constants.
//!
//! Function:
//!   name_len   : u32 (0 for the top-level script)
//!   name       : name_len bytes
//!   arity      : u32
//!   const_count: u32
//!   constants  : tagged entries (0=int64, 1=float64, 2=u32-length string,
//!                3=bool true, 4=bool false, 5=null, 6=nested function)
//!   code_len   : u32, then code bytes (one opcode byte per instruction
//!                plus little-endian operands)
//!   line_count : u32, then line_count * i32 line numbers
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tantrums_core::chunk::Chunk;
use tantrums_core::object::{Function, ObjBody};
use tantrums_core::opcode::{CastKind, OpCode};
use tantrums_core::value::Value;

pub const MAGIC: &[u8; 4] = b"42AS";
pub const VERSION: u8 = 3;

const CONST_TAG_INT: u8 = 0;
const CONST_TAG_FLOAT: u8 = 1;
const CONST_TAG_STRING: u8 = 2;
const CONST_TAG_TRUE: u8 = 3;
const CONST_TAG_FALSE: u8 = 4;
const CONST_TAG_NULL: u8 = 5;
const CONST_TAG_FUNCTION: u8 = 6;

// Opcode bytes. Stable: changing any of these is a format version bump.
const OP_CONSTANT: u8 = 0;
const OP_NULL: u8 = 1;
const OP_TRUE: u8 = 2;
const OP_FALSE: u8 = 3;
const OP_POP: u8 = 4;
const OP_ADD: u8 = 5;
const OP_SUB: u8 = 6;
const OP_MUL: u8 = 7;
const OP_DIV: u8 = 8;
const OP_MOD: u8 = 9;
const OP_NEGATE: u8 = 10;
const OP_EQ: u8 = 11;
const OP_NEQ: u8 = 12;
const OP_LT: u8 = 13;
const OP_GT: u8 = 14;
const OP_LTE: u8 = 15;
const OP_GTE: u8 = 16;
const OP_NOT: u8 = 17;
const OP_GET_LOCAL: u8 = 18;
const OP_SET_LOCAL: u8 = 19;
const OP_GET_GLOBAL: u8 = 20;
const OP_SET_GLOBAL: u8 = 21;
const OP_DEFINE_GLOBAL: u8 = 22;
const OP_JUMP: u8 = 23;
const OP_JUMP_IF_FALSE: u8 = 24;
const OP_LOOP: u8 = 25;
const OP_CALL: u8 = 26;
const OP_RETURN: u8 = 27;
const OP_LIST_NEW: u8 = 28;
const OP_MAP_NEW: u8 = 29;
const OP_INDEX_GET: u8 = 30;
const OP_INDEX_SET: u8 = 31;
const OP_LEN: u8 = 32;
const OP_ALLOC: u8 = 33;
const OP_FREE: u8 = 34;
const OP_PTR_REF: u8 = 35;
const OP_PTR_DEREF: u8 = 36;
const OP_PTR_SET: u8 = 37;
const OP_CAST: u8 = 38;
const OP_THROW: u8 = 39;
const OP_TRY_BEGIN: u8 = 40;
const OP_TRY_END: u8 = 41;
const OP_ENTER_SCOPE: u8 = 42;
const OP_EXIT_SCOPE: u8 = 43;
const OP_FOR_IN_STEP: u8 = 44;

/// Errors while reading or writing a bytecode file.
#[derive(Debug)]
pub enum BytecodeError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(u8),
    Corrupt(&'static str),
}

impl fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeError::Io(e) => write!(f, "io error: {}", e),
            BytecodeError::BadMagic => write!(f, "not a valid .42ass bytecode file"),
            BytecodeError::UnsupportedVersion(v) => {
                write!(f, "bytecode version {} not supported (expected {})", v, VERSION)
            }
            BytecodeError::Corrupt(what) => write!(f, "corrupt bytecode file: {}", what),
        }
    }
}

impl std::error::Error for BytecodeError {}

impl From<io::Error> for BytecodeError {
    fn from(e: io::Error) -> Self {
        BytecodeError::Io(e)
    }
}

type Result<T> = std::result::Result<T, BytecodeError>;

/// Serialise a compiled function to a byte buffer.
pub fn to_bytes(script: &Function) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    write_function(&mut out, script);
    out
}

/// Write a compiled script to a `.42ass` file.
pub fn save(path: &Path, script: &Function) -> Result<()> {
    let bytes = to_bytes(script);
    fs::write(path, &bytes)?;
    log::debug!("wrote {} bytecode bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Rehydrate a compiled function from a byte buffer.
pub fn from_bytes(data: &[u8]) -> Result<Function> {
    let mut off = 0;
    let magic = read_exact(data, &mut off, 4)?;
    if magic != MAGIC {
        return Err(BytecodeError::BadMagic);
    }
    let version = read_u8(data, &mut off)?;
    if version != VERSION {
        return Err(BytecodeError::UnsupportedVersion(version));
    }
    let function = read_function(data, &mut off)?;
    if off != data.len() {
        return Err(BytecodeError::Corrupt("trailing bytes"));
    }
    Ok(function)
}

/// Load a compiled script from a `.42ass` file.
pub fn load(path: &Path) -> Result<Function> {
    let data = fs::read(path)?;
    from_bytes(&data)
}

// =============================================================================
// Writing
// =============================================================================

fn write_function(out: &mut Vec<u8>, function: &Function) {
    match &function.name {
        Some(name) => {
            write_u32(out, name.len() as u32);
            out.extend_from_slice(name.as_bytes());
        }
        None => write_u32(out, 0),
    }
    write_u32(out, function.arity as u32);

    let chunk = &function.chunk;
    write_u32(out, chunk.constants.len() as u32);
    for constant in &chunk.constants {
        match constant {
            Value::Int(n) => {
                out.push(CONST_TAG_INT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(CONST_TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Bool(true) => out.push(CONST_TAG_TRUE),
            Value::Bool(false) => out.push(CONST_TAG_FALSE),
            Value::Null => out.push(CONST_TAG_NULL),
            Value::Obj(obj) => match &obj.body {
                ObjBody::Str(s) => {
                    out.push(CONST_TAG_STRING);
                    let text = &s.borrow().bytes;
                    write_u32(out, text.len() as u32);
                    out.extend_from_slice(text.as_bytes());
                }
                ObjBody::Function(nested) => {
                    out.push(CONST_TAG_FUNCTION);
                    write_function(out, nested);
                }
                _ => out.push(CONST_TAG_NULL),
            },
        }
    }

    let code = encode_ops(&chunk.code);
    write_u32(out, code.len() as u32);
    out.extend_from_slice(&code);

    write_u32(out, chunk.lines.len() as u32);
    for line in &chunk.lines {
        out.extend_from_slice(&(*line as i32).to_le_bytes());
    }
}

fn encode_ops(ops: &[OpCode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ops.len() * 2);
    for op in ops {
        match *op {
            OpCode::Constant(idx) => op_u16(&mut out, OP_CONSTANT, idx),
            OpCode::Null => out.push(OP_NULL),
            OpCode::True => out.push(OP_TRUE),
            OpCode::False => out.push(OP_FALSE),
            OpCode::Pop => out.push(OP_POP),
            OpCode::Add => out.push(OP_ADD),
            OpCode::Sub => out.push(OP_SUB),
            OpCode::Mul => out.push(OP_MUL),
            OpCode::Div => out.push(OP_DIV),
            OpCode::Mod => out.push(OP_MOD),
            OpCode::Negate => out.push(OP_NEGATE),
            OpCode::Eq => out.push(OP_EQ),
            OpCode::Neq => out.push(OP_NEQ),
            OpCode::Lt => out.push(OP_LT),
            OpCode::Gt => out.push(OP_GT),
            OpCode::Lte => out.push(OP_LTE),
            OpCode::Gte => out.push(OP_GTE),
            OpCode::Not => out.push(OP_NOT),
            OpCode::GetLocal(slot) => op_u8(&mut out, OP_GET_LOCAL, slot),
            OpCode::SetLocal(slot) => op_u8(&mut out, OP_SET_LOCAL, slot),
            OpCode::GetGlobal(idx) => op_u16(&mut out, OP_GET_GLOBAL, idx),
            OpCode::SetGlobal(idx) => op_u16(&mut out, OP_SET_GLOBAL, idx),
            OpCode::DefineGlobal(idx) => op_u16(&mut out, OP_DEFINE_GLOBAL, idx),
            OpCode::Jump(off) => op_i16(&mut out, OP_JUMP, off),
            OpCode::JumpIfFalse(off) => op_i16(&mut out, OP_JUMP_IF_FALSE, off),
            OpCode::Loop(off) => op_i16(&mut out, OP_LOOP, off),
            OpCode::Call(argc) => op_u8(&mut out, OP_CALL, argc),
            OpCode::Return => out.push(OP_RETURN),
            OpCode::ListNew(count) => op_u8(&mut out, OP_LIST_NEW, count),
            OpCode::MapNew(count) => op_u8(&mut out, OP_MAP_NEW, count),
            OpCode::IndexGet => out.push(OP_INDEX_GET),
            OpCode::IndexSet => out.push(OP_INDEX_SET),
            OpCode::Len => out.push(OP_LEN),
            OpCode::Alloc {
                type_name,
                auto_manage,
            } => {
                out.push(OP_ALLOC);
                out.extend_from_slice(&type_name.to_le_bytes());
                out.push(auto_manage as u8);
            }
            OpCode::Free => out.push(OP_FREE),
            OpCode::PtrRef => out.push(OP_PTR_REF),
            OpCode::PtrDeref => out.push(OP_PTR_DEREF),
            OpCode::PtrSet => out.push(OP_PTR_SET),
            OpCode::Cast(kind) => op_u8(&mut out, OP_CAST, kind.as_byte()),
            OpCode::Throw => out.push(OP_THROW),
            OpCode::TryBegin(off) => op_i16(&mut out, OP_TRY_BEGIN, off),
            OpCode::TryEnd => out.push(OP_TRY_END),
            OpCode::EnterScope => out.push(OP_ENTER_SCOPE),
            OpCode::ExitScope => out.push(OP_EXIT_SCOPE),
            OpCode::ForInStep { iter, len, counter } => {
                out.push(OP_FOR_IN_STEP);
                out.push(iter);
                out.push(len);
                out.push(counter);
            }
        }
    }
    out
}

fn op_u8(out: &mut Vec<u8>, op: u8, operand: u8) {
    out.push(op);
    out.push(operand);
}

fn op_u16(out: &mut Vec<u8>, op: u8, operand: u16) {
    out.push(op);
    out.extend_from_slice(&operand.to_le_bytes());
}

fn op_i16(out: &mut Vec<u8>, op: u8, operand: i16) {
    out.push(op);
    out.extend_from_slice(&operand.to_le_bytes());
}

// =============================================================================
// Reading
// =============================================================================

fn read_function(data: &[u8], off: &mut usize) -> Result<Function> {
    let name_len = read_u32(data, off)? as usize;
    let name = if name_len > 0 {
        let bytes = read_exact(data, off, name_len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| BytecodeError::Corrupt("name utf8"))?;
        Some(text.to_string())
    } else {
        None
    };

    let arity = read_u32(data, off)?;
    if arity > u8::MAX as u32 {
        return Err(BytecodeError::Corrupt("arity out of range"));
    }

    let mut chunk = Chunk::new();
    let const_count = read_u32(data, off)? as usize;
    for _ in 0..const_count {
        let tag = read_u8(data, off)?;
        let value = match tag {
            CONST_TAG_INT => Value::Int(read_i64(data, off)?),
            CONST_TAG_FLOAT => Value::Float(read_f64(data, off)?),
            CONST_TAG_STRING => {
                let len = read_u32(data, off)? as usize;
                let bytes = read_exact(data, off, len)?;
                let text =
                    std::str::from_utf8(bytes).map_err(|_| BytecodeError::Corrupt("string utf8"))?;
                Value::string(text)
            }
            CONST_TAG_TRUE => Value::Bool(true),
            CONST_TAG_FALSE => Value::Bool(false),
            CONST_TAG_NULL => Value::Null,
            CONST_TAG_FUNCTION => Value::function(read_function(data, off)?),
            _ => return Err(BytecodeError::Corrupt("unknown constant tag")),
        };
        // Loaded constants bypass deduplication to preserve indices.
        chunk.constants.push(value);
    }

    let code_len = read_u32(data, off)? as usize;
    let code_bytes = read_exact(data, off, code_len)?;
    chunk.code = decode_ops(code_bytes)?;

    let line_count = read_u32(data, off)? as usize;
    if line_count != chunk.code.len() {
        return Err(BytecodeError::Corrupt("line/instruction count mismatch"));
    }
    for _ in 0..line_count {
        let line = read_i32(data, off)?;
        chunk.lines.push(line.max(0) as u32);
    }

    Ok(Function {
        arity: arity as u8,
        name,
        chunk,
    })
}

fn decode_ops(data: &[u8]) -> Result<Vec<OpCode>> {
    let mut ops = Vec::new();
    let mut off = 0;
    while off < data.len() {
        let opcode = read_u8(data, &mut off)?;
        let op = match opcode {
            OP_CONSTANT => OpCode::Constant(read_u16(data, &mut off)?),
            OP_NULL => OpCode::Null,
            OP_TRUE => OpCode::True,
            OP_FALSE => OpCode::False,
            OP_POP => OpCode::Pop,
            OP_ADD => OpCode::Add,
            OP_SUB => OpCode::Sub,
            OP_MUL => OpCode::Mul,
            OP_DIV => OpCode::Div,
            OP_MOD => OpCode::Mod,
            OP_NEGATE => OpCode::Negate,
            OP_EQ => OpCode::Eq,
            OP_NEQ => OpCode::Neq,
            OP_LT => OpCode::Lt,
            OP_GT => OpCode::Gt,
            OP_LTE => OpCode::Lte,
            OP_GTE => OpCode::Gte,
            OP_NOT => OpCode::Not,
            OP_GET_LOCAL => OpCode::GetLocal(read_u8(data, &mut off)?),
            OP_SET_LOCAL => OpCode::SetLocal(read_u8(data, &mut off)?),
            OP_GET_GLOBAL => OpCode::GetGlobal(read_u16(data, &mut off)?),
            OP_SET_GLOBAL => OpCode::SetGlobal(read_u16(data, &mut off)?),
            OP_DEFINE_GLOBAL => OpCode::DefineGlobal(read_u16(data, &mut off)?),
            OP_JUMP => OpCode::Jump(read_i16(data, &mut off)?),
            OP_JUMP_IF_FALSE => OpCode::JumpIfFalse(read_i16(data, &mut off)?),
            OP_LOOP => OpCode::Loop(read_i16(data, &mut off)?),
            OP_CALL => OpCode::Call(read_u8(data, &mut off)?),
            OP_RETURN => OpCode::Return,
            OP_LIST_NEW => OpCode::ListNew(read_u8(data, &mut off)?),
            OP_MAP_NEW => OpCode::MapNew(read_u8(data, &mut off)?),
            OP_INDEX_GET => OpCode::IndexGet,
            OP_INDEX_SET => OpCode::IndexSet,
            OP_LEN => OpCode::Len,
            OP_ALLOC => {
                let type_name = read_u16(data, &mut off)?;
                let auto_manage = read_u8(data, &mut off)? != 0;
                OpCode::Alloc {
                    type_name,
                    auto_manage,
                }
            }
            OP_FREE => OpCode::Free,
            OP_PTR_REF => OpCode::PtrRef,
            OP_PTR_DEREF => OpCode::PtrDeref,
            OP_PTR_SET => OpCode::PtrSet,
            OP_CAST => {
                let tag = read_u8(data, &mut off)?;
                OpCode::Cast(
                    CastKind::from_byte(tag).ok_or(BytecodeError::Corrupt("bad cast tag"))?,
                )
            }
            OP_THROW => OpCode::Throw,
            OP_TRY_BEGIN => OpCode::TryBegin(read_i16(data, &mut off)?),
            OP_TRY_END => OpCode::TryEnd,
            OP_ENTER_SCOPE => OpCode::EnterScope,
            OP_EXIT_SCOPE => OpCode::ExitScope,
            OP_FOR_IN_STEP => {
                let iter = read_u8(data, &mut off)?;
                let len = read_u8(data, &mut off)?;
                let counter = read_u8(data, &mut off)?;
                OpCode::ForInStep { iter, len, counter }
            }
            _ => return Err(BytecodeError::Corrupt("unknown opcode byte")),
        };
        ops.push(op);
    }
    Ok(ops)
}

// =============================================================================
// Little-endian primitives
// =============================================================================

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn read_exact<'a>(data: &'a [u8], off: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = off
        .checked_add(len)
        .ok_or(BytecodeError::Corrupt("length overflow"))?;
    if end > data.len() {
        return Err(BytecodeError::Corrupt("unexpected end of file"));
    }
    let slice = &data[*off..end];
    *off = end;
    Ok(slice)
}

fn read_u8(data: &[u8], off: &mut usize) -> Result<u8> {
    Ok(read_exact(data, off, 1)?[0])
}

fn read_u16(data: &[u8], off: &mut usize) -> Result<u16> {
    let bytes = read_exact(data, off, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_i16(data: &[u8], off: &mut usize) -> Result<i16> {
    let bytes = read_exact(data, off, 2)?;
    Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_i32(data: &[u8], off: &mut usize) -> Result<i32> {
    let bytes = read_exact(data, off, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u32(data: &[u8], off: &mut usize) -> Result<u32> {
    let bytes = read_exact(data, off, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i64(data: &[u8], off: &mut usize) -> Result<i64> {
    let bytes = read_exact(data, off, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(data: &[u8], off: &mut usize) -> Result<f64> {
    let bytes = read_exact(data, off, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function() -> Function {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Value::Int(42)).unwrap();
        chunk.emit(OpCode::Constant(k), 1);
        let s = chunk.add_constant(Value::string("hello")).unwrap();
        chunk.emit(OpCode::Constant(s), 2);
        chunk.emit(OpCode::Add, 2);
        chunk.emit(
            OpCode::Alloc {
                type_name: s,
                auto_manage: true,
            },
            3,
        );
        chunk.emit(OpCode::JumpIfFalse(5), 3);
        chunk.emit(OpCode::Loop(-4), 4);
        chunk.emit(
            OpCode::ForInStep {
                iter: 1,
                len: 2,
                counter: 3,
            },
            4,
        );
        chunk.emit(OpCode::Return, 5);
        Function {
            arity: 2,
            name: Some("sample".to_string()),
            chunk,
        }
    }

    fn assert_functions_equal(a: &Function, b: &Function) {
        assert_eq!(a.arity, b.arity);
        assert_eq!(a.name, b.name);
        assert_eq!(a.chunk.code, b.chunk.code);
        assert_eq!(a.chunk.lines, b.chunk.lines);
        assert_eq!(a.chunk.constants.len(), b.chunk.constants.len());
        for (ca, cb) in a.chunk.constants.iter().zip(&b.chunk.constants) {
            match (ca, cb) {
                (Value::Obj(oa), Value::Obj(ob)) => match (&oa.body, &ob.body) {
                    (ObjBody::Function(fa), ObjBody::Function(fb)) => {
                        assert_functions_equal(fa, fb)
                    }
                    _ => assert!(ca.tantrums_eq(cb)),
                },
                _ => assert!(ca.tantrums_eq(cb)),
            }
        }
    }

    #[test]
    fn roundtrip_preserves_everything() {
        let function = sample_function();
        let bytes = to_bytes(&function);
        let loaded = from_bytes(&bytes).expect("load failed");
        assert_functions_equal(&function, &loaded);
    }

    #[test]
    fn roundtrip_nested_function() {
        let nested = sample_function();
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::function(nested)).unwrap();
        chunk.emit(OpCode::Constant(idx), 1);
        chunk.emit(OpCode::Return, 1);
        let script = Function {
            arity: 0,
            name: None,
            chunk,
        };
        let loaded = from_bytes(&to_bytes(&script)).expect("load failed");
        assert_functions_equal(&script, &loaded);
    }

    #[test]
    fn bad_magic_rejected() {
        let function = sample_function();
        let mut bytes = to_bytes(&function);
        bytes[0] = b'X';
        assert!(matches!(from_bytes(&bytes), Err(BytecodeError::BadMagic)));
    }

    #[test]
    fn wrong_version_rejected() {
        let function = sample_function();
        let mut bytes = to_bytes(&function);
        bytes[4] = VERSION + 1;
        assert!(matches!(
            from_bytes(&bytes),
            Err(BytecodeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn truncated_file_rejected() {
        let function = sample_function();
        let bytes = to_bytes(&function);
        let cut = &bytes[..bytes.len() - 3];
        assert!(from_bytes(cut).is_err());
    }

    #[test]
    fn header_layout() {
        let function = sample_function();
        let bytes = to_bytes(&function);
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(bytes[4], VERSION);
        // name_len for "sample" is 6, little-endian.
        assert_eq!(&bytes[5..9], &6u32.to_le_bytes());
    }
}

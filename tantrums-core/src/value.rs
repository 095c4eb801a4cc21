// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The tagged value type.
//!
//! Five variants: 64-bit integer, double, boolean, null, and a heap object
//! handle. Non-heap variants copy by value; heap values share the object via
//! `Rc`.

use std::fmt;
use std::rc::Rc;

use crate::hash;
use crate::object::{Function, Obj, ObjBody, ObjRef};

/// A Tantrums runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Obj(ObjRef),
}

impl Value {
    /// New immutable string value (unregistered).
    pub fn string(text: &str) -> Value {
        Value::Obj(Obj::string(text))
    }

    /// Wrap a compiled function (unregistered).
    pub fn function(function: Function) -> Value {
        Value::Obj(Obj::function(function))
    }

    /// Only `null` and `false` are falsy.
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    /// Numeric view for arithmetic; non-numeric values read as zero.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            _ => 0.0,
        }
    }

    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    /// The string payload, if this is a string object.
    pub fn as_str_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Obj(o) if matches!(o.body, ObjBody::Str(_)) => Some(o),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        self.as_str_obj().is_some()
    }

    /// Copy out the text of a string value.
    pub fn string_contents(&self) -> Option<String> {
        match self {
            Value::Obj(o) => match &o.body {
                ObjBody::Str(s) => Some(s.borrow().bytes.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Type name for diagnostics and the `type` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Obj(o) => o.type_name(),
        }
    }

    /// Equality contract: numeric equality follows the host rules but
    /// float==int is not permitted; strings compare by content; other
    /// objects compare by identity.
    pub fn tantrums_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Obj(a), Value::Obj(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&a.body, &b.body) {
                    (ObjBody::Str(sa), ObjBody::Str(sb)) => {
                        sa.borrow().bytes == sb.borrow().bytes
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Hash consistent with [`Value::tantrums_eq`]. Strings use their cached
    /// Murmur3 hash; non-string objects hash by pointer identity shifted
    /// right.
    pub fn hash(&self) -> u32 {
        match self {
            Value::Int(n) => hash::hash_i64(*n),
            Value::Float(f) => hash::hash_f64(*f),
            Value::Bool(b) => {
                if *b {
                    0x9e37_79b9
                } else {
                    0x7f4a_7c15
                }
            }
            Value::Null => 0x51_7cc1,
            Value::Obj(o) => match &o.body {
                ObjBody::Str(s) => s.borrow().hash,
                _ => (Rc::as_ptr(o) as usize >> 3) as u32,
            },
        }
    }

    /// Take an informational container reference.
    pub fn incref(&self) {
        if let Value::Obj(o) = self {
            o.header.borrow_mut().refcount += 1;
        }
    }

    /// Release an informational container reference. Never frees; final
    /// release belongs to the reaper or the bulk teardown.
    pub fn decref(&self) {
        if let Value::Obj(o) = self {
            let mut header = o.header.borrow_mut();
            if header.is_manual {
                return;
            }
            header.refcount -= 1;
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Null => write!(f, "null"),
            Value::Obj(o) => match &o.body {
                ObjBody::Str(s) => write!(f, "{}", s.borrow().bytes),
                ObjBody::List(l) => {
                    write!(f, "[")?;
                    for (i, item) in l.borrow().items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", item)?;
                    }
                    write!(f, "]")
                }
                ObjBody::Map(_) => write!(f, "<map>"),
                ObjBody::Function(func) => {
                    write!(f, "<fn {}>", func.name.as_deref().unwrap_or("script"))
                }
                ObjBody::Native(n) => write!(f, "<native {}>", n.name),
                ObjBody::Pointer(_) => write!(f, "<ptr>"),
                ObjBody::Range(r) => write!(f, "range({}, {}, {})", r.start, r.end, r.step),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_int_equality_not_permitted() {
        assert!(!Value::Int(1).tantrums_eq(&Value::Float(1.0)));
        assert!(Value::Int(1).tantrums_eq(&Value::Int(1)));
        assert!(Value::Float(1.5).tantrums_eq(&Value::Float(1.5)));
    }

    #[test]
    fn strings_compare_by_content() {
        let a = Value::string("abc");
        let b = Value::string("abc");
        let c = Value::string("abd");
        assert!(a.tantrums_eq(&b));
        assert!(!a.tantrums_eq(&c));
    }

    #[test]
    fn lists_compare_by_identity() {
        let a = Value::Obj(Obj::list(vec![], crate::object::EscapeState::new(0, true)));
        let b = Value::Obj(Obj::list(vec![], crate::object::EscapeState::new(0, true)));
        assert!(a.tantrums_eq(&a.clone()));
        assert!(!a.tantrums_eq(&b));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Float(7.0).to_string(), "7");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }

    #[test]
    fn refcount_is_advisory() {
        let v = Value::string("x");
        v.incref();
        v.decref();
        v.decref();
        // Dropping to zero (and below) never frees; the object stays usable.
        assert_eq!(v.to_string(), "x");
    }

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(Value::string("key").hash(), Value::string("key").hash());
        assert_eq!(Value::Int(42).hash(), Value::Int(42).hash());
    }
}

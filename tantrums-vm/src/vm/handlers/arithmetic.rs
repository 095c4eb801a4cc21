// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Arithmetic, comparison and cast opcode handlers.

use tantrums_core::opcode::CastKind;
use tantrums_core::value::Value;

use crate::vm::error::{Result, RuntimeError};
use crate::vm::{sequence_elements, Vm};

impl Vm {
    /// `ADD` is overloaded: string concatenation (auto-stringifying the
    /// other side), list/range concatenation into a new list, and numeric
    /// addition with float contamination.
    pub(crate) fn execute_add(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;

        let result = if a.is_string() || b.is_string() {
            let b_text = b.to_string();
            if let Some(a_obj) = a.as_str_obj() {
                Value::Obj(self.heap.concat_strings(a_obj, &b_text))
            } else {
                let a_text = a.to_string();
                Value::Obj(self.heap.concat_text(&a_text, &b_text))
            }
        } else if let (Some(a_obj), Some(b_obj)) = (a.as_obj(), b.as_obj()) {
            match (sequence_elements(a_obj), sequence_elements(b_obj)) {
                (Some(mut items), Some(tail)) => {
                    items.extend(tail);
                    let depth = self.scope_depth;
                    let auto = self.autofree_default;
                    Value::Obj(self.heap.new_list(items, depth, auto))
                }
                _ => numeric_add(&a, &b),
            }
        } else {
            numeric_add(&a, &b)
        };

        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    pub(crate) fn execute_sub(&mut self) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(*y)),
            _ => Value::Float(a.as_number() - b.as_number()),
        };
        self.stack.push(result)
    }

    pub(crate) fn execute_mul(&mut self) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(*y)),
            _ => Value::Float(a.as_number() * b.as_number()),
        };
        self.stack.push(result)
    }

    pub(crate) fn execute_div(&mut self) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                if *y == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Value::Int(x.wrapping_div(*y))
            }
            _ => {
                let divisor = b.as_number();
                if divisor == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Value::Float(a.as_number() / divisor)
            }
        };
        self.stack.push(result)
    }

    /// Modulo: integers directly; floats only when both operands are whole.
    pub(crate) fn execute_mod(&mut self) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                if *y == 0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                Value::Int(x.wrapping_rem(*y))
            }
            _ => {
                let (x, y) = (a.as_number(), b.as_number());
                if x.fract() != 0.0 || y.fract() != 0.0 {
                    return Err(RuntimeError::NonIntegerModulo);
                }
                if y == 0.0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                Value::Float(((x as i64).wrapping_rem(y as i64)) as f64)
            }
        };
        self.stack.push(result)
    }

    pub(crate) fn execute_negate(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        let result = match value {
            Value::Int(n) => Value::Int(n.wrapping_neg()),
            other => Value::Float(-other.as_number()),
        };
        self.stack.push(result)
    }

    pub(crate) fn execute_eq(&mut self, negate: bool) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let equal = a.tantrums_eq(&b);
        self.stack.push(Value::Bool(equal != negate))
    }

    pub(crate) fn execute_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        self.stack
            .push(Value::Bool(op(a.as_number(), b.as_number())))
    }

    pub(crate) fn execute_not(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        match value {
            Value::Bool(b) => self.stack.push(Value::Bool(!b)),
            _ => Err(RuntimeError::NonBooleanOperand("'!'")),
        }
    }

    pub(crate) fn execute_cast(&mut self, kind: CastKind) -> Result<()> {
        let value = self.stack.pop()?;
        let result = match kind {
            CastKind::Int => cast_to_int(&value),
            CastKind::Float => cast_to_float(&value),
            CastKind::Str => {
                if value.is_string() {
                    value
                } else {
                    self.heap.new_string_value(&value.to_string())
                }
            }
            CastKind::Bool => cast_to_bool(&value),
        };
        self.stack.push(result)
    }
}

fn numeric_add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        _ => Value::Float(a.as_number() + b.as_number()),
    }
}

fn cast_to_int(value: &Value) -> Value {
    match value {
        Value::Int(_) => value.clone(),
        Value::Float(f) => Value::Int(*f as i64),
        Value::Bool(b) => Value::Int(if *b { 1 } else { 0 }),
        Value::Obj(_) => match value.string_contents() {
            Some(text) => Value::Int(parse_int_prefix(&text)),
            None => Value::Int(0),
        },
        Value::Null => Value::Int(0),
    }
}

fn cast_to_float(value: &Value) -> Value {
    match value {
        Value::Float(_) => value.clone(),
        Value::Int(n) => Value::Float(*n as f64),
        Value::Obj(_) => match value.string_contents() {
            Some(text) => Value::Float(parse_float_prefix(&text)),
            None => Value::Float(0.0),
        },
        _ => Value::Float(0.0),
    }
}

/// String-to-bool treats the literal words specially; otherwise any
/// non-whitespace content reads as true.
fn cast_to_bool(value: &Value) -> Value {
    match value {
        Value::Bool(_) => value.clone(),
        Value::Null => Value::Bool(false),
        Value::Int(n) => Value::Bool(*n != 0),
        Value::Obj(_) => match value.string_contents() {
            Some(text) => match text.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::Bool(!other.trim().is_empty()),
            },
            None => Value::Bool(true),
        },
        Value::Float(_) => Value::Bool(true),
    }
}

/// Base-10 prefix parse in the strtoll style: leading whitespace and an
/// optional sign, then as many digits as match; 0 when none do.
fn parse_int_prefix(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => {}
            _ => break,
        }
        end = i + c.len_utf8();
    }
    trimmed[..end].parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_prefix_parsing() {
        assert_eq!(parse_int_prefix("42"), 42);
        assert_eq!(parse_int_prefix("  -7abc"), -7);
        assert_eq!(parse_int_prefix("xyz"), 0);
        assert_eq!(parse_int_prefix("+3"), 3);
    }

    #[test]
    fn float_prefix_parsing() {
        assert_eq!(parse_float_prefix("2.5"), 2.5);
        assert_eq!(parse_float_prefix("3.14stuff"), 3.14);
        assert_eq!(parse_float_prefix("nope"), 0.0);
    }

    #[test]
    fn bool_cast_words() {
        assert!(matches!(
            cast_to_bool(&Value::string("true")),
            Value::Bool(true)
        ));
        assert!(matches!(
            cast_to_bool(&Value::string("false")),
            Value::Bool(false)
        ));
        assert!(matches!(
            cast_to_bool(&Value::string("   ")),
            Value::Bool(false)
        ));
        assert!(matches!(
            cast_to_bool(&Value::string("anything")),
            Value::Bool(true)
        ));
    }
}

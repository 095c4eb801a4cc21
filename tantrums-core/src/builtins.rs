// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Built-in native functions.
//!
//! Each builtin is registered in the globals table as a Native object under
//! its canonical name. Natives are called inline by the VM — no call frame —
//! and receive the heap so they can allocate and reach the output sink.

use std::collections::HashMap;
use std::io::BufRead;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::heap::Heap;
use crate::object::{Obj, ObjBody};
use crate::value::Value;

/// Register every builtin into a globals table.
pub fn register_builtins(globals: &mut HashMap<String, Value>) {
    let natives: &[(&'static str, crate::object::NativeFn)] = &[
        ("print", native_print),
        ("input", native_input),
        ("len", native_len),
        ("range", native_range),
        ("type", native_type),
        ("append", native_append),
        // Time API
        ("getCurrentTime", native_get_current_time),
        ("toSeconds", native_to_seconds),
        ("toMilliseconds", native_to_milliseconds),
        ("toMinutes", native_to_minutes),
        ("toHours", native_to_hours),
        // Memory API
        ("getProcessMemory", native_get_process_memory),
        ("getVmMemory", native_get_vm_memory),
        ("getVmPeakMemory", native_get_vm_peak_memory),
        ("bytesToKB", native_bytes_to_kb),
        ("bytesToMB", native_bytes_to_mb),
        ("bytesToGB", native_bytes_to_gb),
    ];
    for (name, function) in natives {
        globals.insert(name.to_string(), Value::Obj(Obj::native(name, *function)));
    }
}

/// Whether a name is one of the registered builtins. The compiler skips
/// signature checks for these.
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "print"
            | "input"
            | "len"
            | "range"
            | "type"
            | "append"
            | "getCurrentTime"
            | "toSeconds"
            | "toMilliseconds"
            | "toMinutes"
            | "toHours"
            | "getProcessMemory"
            | "getVmMemory"
            | "getVmPeakMemory"
            | "bytesToKB"
            | "bytesToMB"
            | "bytesToGB"
    )
}

/// print(...) — space-separated values followed by a newline.
fn native_print(heap: &mut Heap, args: &[Value]) -> Value {
    let text = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    heap.writeln_out(&text);
    Value::Null
}

/// input(prompt) — prints the prompt, reads one line, returns it.
fn native_input(heap: &mut Heap, args: &[Value]) -> Value {
    if let Some(prompt) = args.first().and_then(|v| v.string_contents()) {
        heap.write_out(&prompt);
    }
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Value::Null,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            heap.new_string_value(&line)
        }
    }
}

/// len(x) — length of a string, list, map, or range; 0 otherwise.
fn native_len(_heap: &mut Heap, args: &[Value]) -> Value {
    let Some(v) = args.first() else {
        return Value::Int(0);
    };
    Value::Int(container_len(v).unwrap_or(0))
}

/// Shared with the VM's `Len` opcode.
pub fn container_len(v: &Value) -> Option<i64> {
    match v {
        Value::Obj(o) => match &o.body {
            ObjBody::Str(s) => Some(s.borrow().len() as i64),
            ObjBody::List(l) => Some(l.borrow().items.len() as i64),
            ObjBody::Map(m) => Some(m.borrow().len() as i64),
            ObjBody::Range(r) => Some(r.length),
            _ => None,
        },
        _ => None,
    }
}

/// range([start], end, [step]) — integer range; a zero step is empty.
fn native_range(heap: &mut Heap, args: &[Value]) -> Value {
    fn int_arg(v: &Value) -> Option<i64> {
        match v {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    let parsed = match args {
        [end] => int_arg(end).map(|e| (0, e, 1)),
        [start, end] => int_arg(start).zip(int_arg(end)).map(|(s, e)| (s, e, 1)),
        [start, end, step] => match (int_arg(start), int_arg(end), int_arg(step)) {
            (Some(s), Some(e), Some(st)) => Some((s, e, st)),
            _ => None,
        },
        _ => None,
    };

    let (start, end, step) = parsed.unwrap_or((0, 0, 1));
    Value::Obj(heap.new_range(start, end, step))
}

/// type(x) — the value's type name as a string.
fn native_type(heap: &mut Heap, args: &[Value]) -> Value {
    let name = args.first().map(|v| v.type_name()).unwrap_or("null");
    heap.new_string_value(name)
}

/// append(list, value) — appends in place. The stored value becomes a
/// container entry and so escapes its creation scope.
fn native_append(_heap: &mut Heap, args: &[Value]) -> Value {
    if let [Value::Obj(o), value, ..] = args {
        if let ObjBody::List(l) = &o.body {
            if let Value::Obj(stored) = value {
                stored.mark_escaped();
            }
            l.borrow_mut().append(value.clone());
        }
    }
    Value::Null
}

/// getCurrentTime() — milliseconds since the Unix epoch.
fn native_get_current_time(_heap: &mut Heap, _args: &[Value]) -> Value {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Value::Int(ms)
}

fn int_or_zero(args: &[Value]) -> Option<i64> {
    match args.first() {
        Some(Value::Int(n)) => Some(*n),
        _ => None,
    }
}

/// toSeconds(delta_ms) -> float
fn native_to_seconds(_heap: &mut Heap, args: &[Value]) -> Value {
    match int_or_zero(args) {
        Some(n) => Value::Float(n as f64 / 1000.0),
        None => Value::Float(0.0),
    }
}

/// toMilliseconds(delta_ms) -> int
fn native_to_milliseconds(_heap: &mut Heap, args: &[Value]) -> Value {
    Value::Int(int_or_zero(args).unwrap_or(0))
}

/// toMinutes(delta_ms) -> float
fn native_to_minutes(_heap: &mut Heap, args: &[Value]) -> Value {
    match int_or_zero(args) {
        Some(n) => Value::Float(n as f64 / 60_000.0),
        None => Value::Float(0.0),
    }
}

/// toHours(delta_ms) -> float
fn native_to_hours(_heap: &mut Heap, args: &[Value]) -> Value {
    match int_or_zero(args) {
        Some(n) => Value::Float(n as f64 / 3_600_000.0),
        None => Value::Float(0.0),
    }
}

/// getProcessMemory() — resident set size in bytes, 0 where unsupported.
fn native_get_process_memory(_heap: &mut Heap, _args: &[Value]) -> Value {
    Value::Int(process_rss_bytes())
}

#[cfg(target_os = "linux")]
fn process_rss_bytes() -> i64 {
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let rss_pages: i64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    rss_pages * 4096
}

#[cfg(not(target_os = "linux"))]
fn process_rss_bytes() -> i64 {
    0
}

/// getVmMemory() — bytes currently attributed to the VM heap.
fn native_get_vm_memory(heap: &mut Heap, _args: &[Value]) -> Value {
    Value::Int(heap.bytes_allocated() as i64)
}

/// getVmPeakMemory() — high-water mark of the VM heap.
fn native_get_vm_peak_memory(heap: &mut Heap, _args: &[Value]) -> Value {
    Value::Int(heap.peak_bytes() as i64)
}

fn bytes_conversion(args: &[Value], divisor: f64) -> Value {
    match int_or_zero(args) {
        Some(n) => Value::Float(n as f64 / divisor),
        None => Value::Float(0.0),
    }
}

fn native_bytes_to_kb(_heap: &mut Heap, args: &[Value]) -> Value {
    bytes_conversion(args, 1024.0)
}

fn native_bytes_to_mb(_heap: &mut Heap, args: &[Value]) -> Value {
    bytes_conversion(args, 1024.0 * 1024.0)
}

fn native_bytes_to_gb(_heap: &mut Heap, args: &[Value]) -> Value {
    bytes_conversion(args, 1024.0 * 1024.0 * 1024.0)
}

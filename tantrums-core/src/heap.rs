// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The heap registry and the scope reaper's storage side.
//!
//! Every runtime allocation goes through [`Heap`], which keeps a registry of
//! live objects in allocation order. The registry is the Rust rendition of
//! the intrusive `all_objects` list: scope markers are registry lengths
//! snapshotted at scope entry, and the reaper walks the tail allocated since
//! the marker. Explicit free unlinks in O(n), matching the singly-linked
//! cost profile.
//!
//! The heap also owns the program's output sink so `print` can be captured
//! in tests, and the byte accounting behind `getVmMemory`.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::object::{EscapeState, Obj, ObjBody, ObjRef, Provenance, StrObj};
use crate::value::Value;

/// One reclamation (or leak) record: where the allocation came from and how
/// big it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapRecord {
    pub line: u32,
    pub func: String,
    pub type_name: String,
    pub size: usize,
}

/// Outcome of an explicit free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The pointer's cell was released and the object unlinked.
    Freed,
    /// The pointer was already invalid.
    DoubleFree,
    /// The value was not a pointer; nothing happened.
    NotAPointer,
}

/// The per-VM heap: object registry, byte accounting, and output sink.
pub struct Heap {
    objects: Vec<ObjRef>,
    bytes_allocated: usize,
    peak_bytes: usize,
    out: Box<dyn Write>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// New heap writing program output to stdout.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            bytes_allocated: 0,
            peak_bytes: 0,
            out: Box::new(io::stdout()),
        }
    }

    /// New heap with program output captured; useful in tests.
    pub fn with_captured_output() -> (Self, Captured) {
        let captured = Captured::default();
        let heap = Self {
            objects: Vec::new(),
            bytes_allocated: 0,
            peak_bytes: 0,
            out: Box::new(captured.clone()),
        };
        (heap, captured)
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Number of live registered objects.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// A marker for the current registry position; saved on scope entry.
    pub fn marker(&self) -> usize {
        self.objects.len()
    }

    fn register(&mut self, obj: ObjRef) -> ObjRef {
        self.account_alloc(obj.approx_size());
        self.objects.push(Rc::clone(&obj));
        obj
    }

    fn account_alloc(&mut self, size: usize) {
        self.bytes_allocated += size;
        if self.bytes_allocated > self.peak_bytes {
            self.peak_bytes = self.bytes_allocated;
        }
    }

    fn account_free(&mut self, size: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
    }

    /// Unlink a single object from the registry.
    fn unlink(&mut self, obj: &ObjRef) {
        if let Some(pos) = self.objects.iter().position(|o| Rc::ptr_eq(o, obj)) {
            self.objects.remove(pos);
        }
    }

    /// Register a compiled script function and every object constant
    /// reachable from it, so the registry again holds every live heap
    /// object.
    pub fn adopt_function(&mut self, obj: &ObjRef) {
        self.account_alloc(obj.approx_size());
        self.objects.push(Rc::clone(obj));
        if let ObjBody::Function(f) = &obj.body {
            for constant in &f.chunk.constants {
                if let Value::Obj(inner) = constant {
                    match &inner.body {
                        ObjBody::Function(_) => self.adopt_function(inner),
                        _ => {
                            self.account_alloc(inner.approx_size());
                            self.objects.push(Rc::clone(inner));
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// New immutable string, registered.
    pub fn new_string(&mut self, text: &str) -> ObjRef {
        self.register(Obj::string(text))
    }

    pub fn new_string_value(&mut self, text: &str) -> Value {
        Value::Obj(self.new_string(text))
    }

    /// New list from stack values, tagged with the current scope depth.
    pub fn new_list(&mut self, items: Vec<Value>, depth: u32, auto_manage: bool) -> ObjRef {
        self.register(Obj::list(items, EscapeState::new(depth, auto_manage)))
    }

    /// New empty map tagged with the current scope depth.
    pub fn new_map(&mut self, depth: u32, auto_manage: bool) -> ObjRef {
        self.register(Obj::map(EscapeState::new(depth, auto_manage)))
    }

    /// New pointer wrapping a value cell, with provenance for diagnostics.
    pub fn new_pointer(
        &mut self,
        target: Value,
        provenance: Provenance,
        depth: u32,
        auto_manage: bool,
    ) -> ObjRef {
        self.register(Obj::pointer(
            target,
            provenance,
            EscapeState::new(depth, auto_manage),
        ))
    }

    /// New range object.
    pub fn new_range(&mut self, start: i64, end: i64, step: i64) -> ObjRef {
        self.register(Obj::range(start, end, step))
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// Concatenate two strings, honouring the in-place fast path: a mutable
    /// left operand with refcount one is appended to directly; anything else
    /// produces a fresh mutable clone with growth capacity. A shared mutable
    /// string is never mutated.
    pub fn concat_strings(&mut self, a: &ObjRef, b_text: &str) -> ObjRef {
        if let ObjBody::Str(s) = &a.body {
            let exclusive = {
                let payload = s.borrow();
                payload.is_mutable && a.header.borrow().refcount == 1
            };
            if exclusive {
                let mut payload = s.borrow_mut();
                let old_cap = payload.bytes.capacity();
                payload.bytes.push_str(b_text);
                payload.hash = crate::hash::hash_bytes(payload.bytes.as_bytes());
                let grown = payload.bytes.capacity().saturating_sub(old_cap);
                drop(payload);
                self.account_alloc(grown);
                return Rc::clone(a);
            }
            let text = s.borrow().bytes.clone();
            return self.clone_mutable(&text, b_text);
        }
        unreachable!("concat_strings called on a non-string object")
    }

    /// Concatenate two text fragments into a fresh mutable string, the
    /// result of auto-stringifying a non-string `+` operand.
    pub fn concat_text(&mut self, a: &str, b: &str) -> ObjRef {
        self.clone_mutable(a, b)
    }

    fn clone_mutable(&mut self, base: &str, suffix: &str) -> ObjRef {
        let mut bytes = String::with_capacity((base.len() + suffix.len()).max(8) * 2);
        bytes.push_str(base);
        bytes.push_str(suffix);
        let obj = Rc::new(Obj {
            header: RefCell::new(crate::object::ObjHeader {
                refcount: 1,
                is_manual: false,
                is_marked: false,
            }),
            body: ObjBody::Str(RefCell::new(StrObj {
                hash: crate::hash::hash_bytes(bytes.as_bytes()),
                bytes,
                is_mutable: true,
            })),
        });
        self.register(obj)
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Explicit free of a pointer value: release the cell, invalidate the
    /// pointer, and unlink the object from the registry.
    pub fn free_pointer(&mut self, value: &Value) -> FreeOutcome {
        let Value::Obj(obj) = value else {
            return FreeOutcome::NotAPointer;
        };
        let ObjBody::Pointer(p) = &obj.body else {
            return FreeOutcome::NotAPointer;
        };

        {
            let mut ptr = p.borrow_mut();
            if !ptr.is_valid {
                return FreeOutcome::DoubleFree;
            }
            if let Some(old) = ptr.target.take() {
                old.decref();
            }
            ptr.is_valid = false;
        }
        self.account_free(obj.approx_size());
        self.unlink(obj);
        FreeOutcome::Freed
    }

    /// The scope reaper's storage pass. Walks objects allocated since
    /// `marker` and releases every one that was created deeper than
    /// `new_depth`, never escaped, and is auto-managed. Returns a record per
    /// reclamation for the auto-free report.
    pub fn reap(&mut self, marker: usize, new_depth: u32) -> Vec<ReapRecord> {
        let mut records = Vec::new();
        if marker >= self.objects.len() {
            return records;
        }

        let tail = self.objects.split_off(marker);
        for obj in tail {
            let reapable = matches!(
                obj.escape_state(),
                Some(state) if state.scope_depth > new_depth && !state.escaped && state.auto_manage
            ) && !obj.header.borrow().is_manual;

            if !reapable {
                self.objects.push(obj);
                continue;
            }

            let size = obj.approx_size();
            match &obj.body {
                ObjBody::Pointer(p) => {
                    let mut ptr = p.borrow_mut();
                    if !ptr.is_valid {
                        // Already freed by compiled auto-free bytecode.
                        continue;
                    }
                    if let Some(old) = ptr.target.take() {
                        old.decref();
                    }
                    ptr.is_valid = false;
                    records.push(ReapRecord {
                        line: ptr.provenance.alloc_line,
                        func: ptr.provenance.alloc_func.clone(),
                        type_name: ptr.provenance.alloc_type.clone(),
                        size: ptr.provenance.alloc_size,
                    });
                }
                ObjBody::List(l) => {
                    let mut list = l.borrow_mut();
                    for item in list.items.drain(..) {
                        item.decref();
                    }
                    records.push(ReapRecord {
                        line: 0,
                        func: "<scope>".to_string(),
                        type_name: "list".to_string(),
                        size,
                    });
                }
                ObjBody::Map(m) => {
                    m.borrow_mut().clear();
                    records.push(ReapRecord {
                        line: 0,
                        func: "<scope>".to_string(),
                        type_name: "map".to_string(),
                        size,
                    });
                }
                _ => unreachable!("escape_state() only reports pointer/list/map"),
            }
            self.account_free(size);
        }
        records
    }

    /// Pointers still holding live cells; reported as leaks at teardown.
    pub fn leak_scan(&self) -> Vec<ReapRecord> {
        self.objects
            .iter()
            .filter_map(|obj| match &obj.body {
                ObjBody::Pointer(p) => {
                    let ptr = p.borrow();
                    if ptr.is_valid {
                        Some(ReapRecord {
                            line: ptr.provenance.alloc_line,
                            func: ptr.provenance.alloc_func.clone(),
                            type_name: ptr.provenance.alloc_type.clone(),
                            size: ptr.provenance.alloc_size,
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect()
    }

    /// Bulk teardown: release every remaining object unconditionally.
    pub fn release_all(&mut self) {
        self.objects.clear();
        self.bytes_allocated = 0;
    }

    // =========================================================================
    // Accounting & output
    // =========================================================================

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Write program output (used by `print`).
    pub fn write_out(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
    }

    pub fn writeln_out(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.write_all(b"\n");
        let _ = self.out.flush();
    }
}

/// A writer that captures program output into a shared string buffer.
#[derive(Default, Clone)]
pub struct Captured(Rc<RefCell<String>>);

impl Captured {
    /// Copy out the captured buffer.
    pub fn get(&self) -> String {
        self.0.borrow().clone()
    }

    /// Reset the buffer.
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(line: u32) -> Provenance {
        Provenance {
            alloc_size: std::mem::size_of::<Value>(),
            alloc_line: line,
            alloc_type: "int".to_string(),
            alloc_func: "main".to_string(),
        }
    }

    #[test]
    fn reaper_frees_unescaped_auto_managed() {
        let mut heap = Heap::new();
        let marker = heap.marker();
        let ptr = heap.new_pointer(Value::Int(7), provenance(3), 1, true);
        let records = heap.reap(marker, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line, 3);
        assert_eq!(heap.live_objects(), 0);
        if let ObjBody::Pointer(p) = &ptr.body {
            assert!(!p.borrow().is_valid);
        }
    }

    #[test]
    fn reaper_skips_escaped_objects() {
        let mut heap = Heap::new();
        let marker = heap.marker();
        let ptr = heap.new_pointer(Value::Int(7), provenance(3), 1, true);
        ptr.mark_escaped();
        let records = heap.reap(marker, 0);
        assert!(records.is_empty());
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn reaper_skips_outer_scope_objects() {
        let mut heap = Heap::new();
        heap.new_pointer(Value::Int(1), provenance(1), 1, true);
        let marker = heap.marker();
        heap.new_pointer(Value::Int(2), provenance(2), 2, true);
        let records = heap.reap(marker, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn explicit_free_then_double_free() {
        let mut heap = Heap::new();
        let ptr = Value::Obj(heap.new_pointer(Value::Int(7), provenance(1), 1, true));
        assert_eq!(heap.free_pointer(&ptr), FreeOutcome::Freed);
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.free_pointer(&ptr), FreeOutcome::DoubleFree);
    }

    #[test]
    fn teardown_empties_registry() {
        let mut heap = Heap::new();
        heap.new_string("x");
        heap.new_list(vec![Value::Int(1)], 0, true);
        heap.new_map(0, true);
        assert!(heap.live_objects() > 0);
        heap.release_all();
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn concat_fast_path_mutates_exclusive_mutable() {
        let mut heap = Heap::new();
        let a = heap.new_string("ab");
        // First concat: immutable source, expect a fresh mutable clone.
        let first = heap.concat_strings(&a, "cd");
        assert!(!Rc::ptr_eq(&a, &first));
        // Second concat: exclusive mutable owner, expect in-place append.
        let second = heap.concat_strings(&first, "ef");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(
            Value::Obj(second).string_contents().unwrap(),
            "abcdef".to_string()
        );
    }

    #[test]
    fn concat_never_mutates_shared_mutable() {
        let mut heap = Heap::new();
        let a = heap.new_string("ab");
        let mutable = heap.concat_strings(&a, "cd");
        // Simulate a second holder (e.g. stored in a container).
        Value::Obj(Rc::clone(&mutable)).incref();
        let result = heap.concat_strings(&mutable, "!!");
        assert!(!Rc::ptr_eq(&mutable, &result));
        assert_eq!(
            Value::Obj(mutable).string_contents().unwrap(),
            "abcd".to_string()
        );
        assert_eq!(
            Value::Obj(result).string_contents().unwrap(),
            "abcd!!".to_string()
        );
    }

    #[test]
    fn captured_output() {
        let (mut heap, captured) = Heap::with_captured_output();
        heap.writeln_out("hello");
        assert_eq!(captured.get(), "hello\n");
    }

    #[test]
    fn leak_scan_reports_live_pointers() {
        let mut heap = Heap::new();
        let ptr = Value::Obj(heap.new_pointer(Value::Int(7), provenance(9), 1, true));
        assert_eq!(heap.leak_scan().len(), 1);
        heap.free_pointer(&ptr);
        assert!(heap.leak_scan().is_empty());
    }
}

// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Heap object representation.
//!
//! Every heap entity is an [`Obj`]: a common header (informational refcount,
//! manual flag, marked bit reserved for a future GC pass) plus a typed body.
//! Objects live behind `Rc` handles; the heap registry in [`crate::heap`]
//! tracks every live object in allocation order, standing in for the C-style
//! intrusive `all_objects` list.

use std::cell::RefCell;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::hash;
use crate::value::Value;

/// Shared handle to a heap object.
pub type ObjRef = Rc<Obj>;

/// Signature of a built-in native function.
pub type NativeFn = fn(&mut crate::heap::Heap, &[Value]) -> Value;

/// Common header carried by every heap object.
#[derive(Debug, Clone, Default)]
pub struct ObjHeader {
    /// Informational reference count: bumped on container stores, decremented
    /// symmetrically. Reaching zero never triggers deallocation; final
    /// release happens at scope exit or bulk teardown.
    pub refcount: i32,
    /// Exempt from the scope reaper and any future GC; lifetime is owned by
    /// explicit free.
    pub is_manual: bool,
    /// Reserved for a future mark pass.
    pub is_marked: bool,
}

/// Escape tracking shared by lists, maps and pointers.
#[derive(Debug, Clone)]
pub struct EscapeState {
    /// Monotonic false-to-true: set when the object becomes visible outside
    /// its creation scope.
    pub escaped: bool,
    /// Scope depth at creation; never changes.
    pub scope_depth: u32,
    /// Eligible for the scope reaper when still unescaped at scope exit.
    pub auto_manage: bool,
}

impl EscapeState {
    pub fn new(scope_depth: u32, auto_manage: bool) -> Self {
        Self {
            escaped: false,
            scope_depth,
            auto_manage,
        }
    }
}

/// String payload. Literals are immutable; the first concatenation produces
/// a mutable clone with growth capacity.
#[derive(Debug)]
pub struct StrObj {
    pub bytes: String,
    pub is_mutable: bool,
    pub hash: u32,
}

impl StrObj {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// List payload: a growable array of values.
#[derive(Debug)]
pub struct ListObj {
    pub items: Vec<Value>,
    pub escape: EscapeState,
}

impl ListObj {
    /// Append a value, taking a container reference on it.
    pub fn append(&mut self, value: Value) {
        value.incref();
        self.items.push(value);
    }
}

/// One occupied slot of a map.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
    hash: u32,
}

/// Map payload: an open-addressed hash table over `(Value, Value)` entries
/// with linear probing. Capacity is always a power of two; the table grows
/// at 3/4 load. Iteration order is slot order: implementation-defined but
/// stable within a process run.
#[derive(Debug)]
pub struct MapObj {
    entries: Vec<Option<MapEntry>>,
    count: usize,
    pub escape: EscapeState,
}

impl MapObj {
    pub fn new(escape: EscapeState) -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
            escape,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Insert or replace. Returns true if the key was new.
    pub fn set(&mut self, key: Value, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }
        let hash = key.hash();
        let mask = self.entries.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            match &mut self.entries[idx] {
                slot @ None => {
                    key.incref();
                    value.incref();
                    *slot = Some(MapEntry { key, value, hash });
                    self.count += 1;
                    return true;
                }
                Some(entry) => {
                    if entry.hash == hash && entry.key.tantrums_eq(&key) {
                        entry.value.decref();
                        value.incref();
                        entry.value = value;
                        return false;
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &Value) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let hash = key.hash();
        let mask = self.entries.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            match &self.entries[idx] {
                None => return None,
                Some(entry) => {
                    if entry.hash == hash && entry.key.tantrums_eq(key) {
                        return Some(entry.value.clone());
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// The nth occupied entry in slot order. Backs the for-in iteration
    /// protocol over maps.
    pub fn nth_entry(&self, n: usize) -> Option<&MapEntry> {
        self.entries
            .iter()
            .filter_map(|slot| slot.as_ref())
            .nth(n)
    }

    /// Drop all entries, releasing container references.
    pub fn clear(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot.take() {
                entry.key.decref();
                entry.value.decref();
            }
        }
        self.count = 0;
    }

    fn grow(&mut self) {
        let new_cap = if self.entries.len() < 8 {
            8
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![None; new_cap]);
        let mask = new_cap - 1;
        for entry in old.into_iter().flatten() {
            let mut idx = entry.hash as usize & mask;
            while self.entries[idx].is_some() {
                idx = (idx + 1) & mask;
            }
            self.entries[idx] = Some(entry);
        }
    }
}

/// A compiled function: arity, optional name (None for the top-level
/// script), and its owned bytecode chunk.
#[derive(Debug)]
pub struct Function {
    pub arity: u8,
    pub name: Option<String>,
    pub chunk: Chunk,
}

impl Function {
    pub fn name_for_trace(&self) -> &str {
        self.name.as_deref().unwrap_or("<script>")
    }
}

/// A built-in function exposed to programs.
#[derive(Debug)]
pub struct Native {
    pub function: NativeFn,
    pub name: &'static str,
}

/// Allocation provenance carried by pointers for diagnostics.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub alloc_size: usize,
    pub alloc_line: u32,
    pub alloc_type: String,
    pub alloc_func: String,
}

/// Pointer payload: a typed handle to a single heap-allocated value cell.
/// Invariant: `is_valid` exactly when `target` is `Some`.
#[derive(Debug)]
pub struct PointerObj {
    pub target: Option<Value>,
    pub is_valid: bool,
    pub provenance: Provenance,
    pub escape: EscapeState,
}

/// Integer range with a precomputed length. A zero step yields an empty
/// range, consistently for reads and `len`.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub length: i64,
}

impl Range {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        let length = if step == 0 {
            0
        } else if step > 0 {
            if end > start {
                (end - start + step - 1) / step
            } else {
                0
            }
        } else if start > end {
            (start - end + (-step) - 1) / (-step)
        } else {
            0
        };
        Self {
            start,
            end,
            step,
            length,
        }
    }

    /// The nth element of the range.
    pub fn nth(&self, n: i64) -> Option<i64> {
        if n < 0 || n >= self.length {
            None
        } else {
            Some(self.start + n * self.step)
        }
    }
}

/// Typed body of a heap object.
#[derive(Debug)]
pub enum ObjBody {
    Str(RefCell<StrObj>),
    List(RefCell<ListObj>),
    Map(RefCell<MapObj>),
    Function(Function),
    Native(Native),
    Pointer(RefCell<PointerObj>),
    Range(Range),
}

/// A heap object: header plus body.
#[derive(Debug)]
pub struct Obj {
    pub header: RefCell<ObjHeader>,
    pub body: ObjBody,
}

impl Obj {
    fn with_body(body: ObjBody) -> ObjRef {
        Rc::new(Obj {
            header: RefCell::new(ObjHeader {
                refcount: 1,
                is_manual: false,
                is_marked: false,
            }),
            body,
        })
    }

    /// New immutable string object (unregistered; see [`crate::heap::Heap`]
    /// for registered allocation).
    pub fn string(text: &str) -> ObjRef {
        Self::with_body(ObjBody::Str(RefCell::new(StrObj {
            hash: hash::hash_bytes(text.as_bytes()),
            bytes: text.to_string(),
            is_mutable: false,
        })))
    }

    pub fn list(items: Vec<Value>, escape: EscapeState) -> ObjRef {
        for item in &items {
            item.incref();
        }
        Self::with_body(ObjBody::List(RefCell::new(ListObj { items, escape })))
    }

    pub fn map(escape: EscapeState) -> ObjRef {
        Self::with_body(ObjBody::Map(RefCell::new(MapObj::new(escape))))
    }

    pub fn function(function: Function) -> ObjRef {
        Self::with_body(ObjBody::Function(function))
    }

    pub fn native(name: &'static str, function: NativeFn) -> ObjRef {
        Self::with_body(ObjBody::Native(Native { function, name }))
    }

    pub fn pointer(target: Value, provenance: Provenance, escape: EscapeState) -> ObjRef {
        Self::with_body(ObjBody::Pointer(RefCell::new(PointerObj {
            target: Some(target),
            is_valid: true,
            provenance,
            escape,
        })))
    }

    pub fn range(start: i64, end: i64, step: i64) -> ObjRef {
        Self::with_body(ObjBody::Range(Range::new(start, end, step)))
    }

    /// The escape state of reaper-managed object kinds.
    pub fn escape_state(&self) -> Option<EscapeState> {
        match &self.body {
            ObjBody::List(l) => Some(l.borrow().escape.clone()),
            ObjBody::Map(m) => Some(m.borrow().escape.clone()),
            ObjBody::Pointer(p) => Some(p.borrow().escape.clone()),
            _ => None,
        }
    }

    /// Mark this object escaped, if it carries escape state. Monotonic.
    pub fn mark_escaped(&self) {
        match &self.body {
            ObjBody::List(l) => l.borrow_mut().escape.escaped = true,
            ObjBody::Map(m) => m.borrow_mut().escape.escaped = true,
            ObjBody::Pointer(p) => p.borrow_mut().escape.escaped = true,
            _ => {}
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.body {
            ObjBody::Str(_) => "string",
            ObjBody::List(_) => "list",
            ObjBody::Map(_) => "map",
            ObjBody::Function(_) => "function",
            ObjBody::Native(_) => "native",
            ObjBody::Pointer(_) => "pointer",
            ObjBody::Range(_) => "range",
        }
    }

    /// Approximate heap footprint, used by the byte accounting behind
    /// `getVmMemory`.
    pub fn approx_size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        let payload = match &self.body {
            ObjBody::Str(s) => s.borrow().bytes.capacity(),
            ObjBody::List(l) => l.borrow().items.capacity() * std::mem::size_of::<Value>(),
            ObjBody::Map(m) => m.borrow().capacity() * std::mem::size_of::<Option<MapEntry>>(),
            ObjBody::Function(f) => {
                f.chunk.code.len() * std::mem::size_of::<crate::opcode::OpCode>()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            ObjBody::Native(_) | ObjBody::Range(_) => 0,
            ObjBody::Pointer(_) => std::mem::size_of::<Value>(),
        };
        base + payload
    }
}

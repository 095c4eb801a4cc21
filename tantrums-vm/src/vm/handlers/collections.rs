// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Collection opcode handlers: construction, indexing and iteration.

use tantrums_core::builtins::container_len;
use tantrums_core::object::ObjBody;
use tantrums_core::value::Value;

use crate::vm::error::{Result, RuntimeError};
use crate::vm::{mark_value_escaped, Vm};

impl Vm {
    /// Build a list from the top `count` stack values, tagged with the
    /// current scope depth for the reaper.
    pub(crate) fn execute_list_new(&mut self, count: usize) -> Result<()> {
        let items = self.stack.pop_n(count)?;
        let depth = self.scope_depth;
        let auto = self.autofree_default;
        let list = self.heap.new_list(items, depth, auto);
        self.stack.push(Value::Obj(list))
    }

    /// Build a map from the top `count` key/value pairs.
    pub(crate) fn execute_map_new(&mut self, count: usize) -> Result<()> {
        let mut flat = self.stack.pop_n(count * 2)?;
        let depth = self.scope_depth;
        let auto = self.autofree_default;
        let map_obj = self.heap.new_map(depth, auto);
        {
            let ObjBody::Map(map) = &map_obj.body else {
                unreachable!("new_map returns a map object");
            };
            let mut map = map.borrow_mut();
            let mut drain = flat.drain(..);
            while let (Some(key), Some(value)) = (drain.next(), drain.next()) {
                map.set(key, value);
            }
        }
        self.stack.push(Value::Obj(map_obj))
    }

    /// Index read. Lists and strings index by integer (out of range reads
    /// null, never an error); ranges compute their element; maps look up by
    /// key value.
    pub(crate) fn execute_index_get(&mut self) -> Result<()> {
        let index = self.stack.peek(0)?;
        let object = self.stack.peek(1)?;

        let result = match &object {
            Value::Obj(obj) => match (&obj.body, &index) {
                (ObjBody::List(list), Value::Int(i)) => {
                    let list = list.borrow();
                    if *i < 0 {
                        Value::Null
                    } else {
                        list.items.get(*i as usize).cloned().unwrap_or(Value::Null)
                    }
                }
                (ObjBody::Str(s), Value::Int(i)) => {
                    let one = {
                        let text = s.borrow();
                        if *i < 0 {
                            None
                        } else {
                            text.bytes
                                .as_bytes()
                                .get(*i as usize)
                                .map(|&byte| (byte as char).to_string())
                        }
                    };
                    match one {
                        Some(ch) => self.heap.new_string_value(&ch),
                        None => Value::Null,
                    }
                }
                (ObjBody::Range(r), Value::Int(i)) => {
                    r.nth(*i).map(Value::Int).unwrap_or(Value::Null)
                }
                (ObjBody::Map(map), key) => {
                    map.borrow().get(key).unwrap_or(Value::Null)
                }
                _ => {
                    return Err(RuntimeError::BadIndex {
                        container: object.type_name().to_string(),
                        index: index.type_name().to_string(),
                    });
                }
            },
            _ => {
                return Err(RuntimeError::BadIndex {
                    container: object.type_name().to_string(),
                    index: index.type_name().to_string(),
                });
            }
        };

        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    /// Index write; the stored value escapes its creation scope. The
    /// assigned value is left on the stack as the expression result.
    pub(crate) fn execute_index_set(&mut self) -> Result<()> {
        let value = self.stack.peek(0)?;
        let index = self.stack.peek(1)?;
        let object = self.stack.peek(2)?;

        match &object {
            Value::Obj(obj) => match &obj.body {
                ObjBody::List(list) => {
                    if let Value::Int(i) = index {
                        let mut list = list.borrow_mut();
                        if i >= 0 && (i as usize) < list.items.len() {
                            let old = std::mem::replace(&mut list.items[i as usize], value.clone());
                            old.decref();
                            value.incref();
                            mark_value_escaped(&value);
                        }
                    }
                }
                ObjBody::Map(map) => {
                    map.borrow_mut().set(index.clone(), value.clone());
                    mark_value_escaped(&value);
                }
                _ => {
                    return Err(RuntimeError::BadIndex {
                        container: object.type_name().to_string(),
                        index: index.type_name().to_string(),
                    });
                }
            },
            _ => {
                return Err(RuntimeError::BadIndex {
                    container: object.type_name().to_string(),
                    index: index.type_name().to_string(),
                });
            }
        }

        self.stack.pop_n(3)?;
        self.stack.push(value)
    }

    /// Length of the top value (the for-in lowering computes it once at
    /// loop entry).
    pub(crate) fn execute_len(&mut self) -> Result<()> {
        let value = self.stack.pop()?;
        self.stack
            .push(Value::Int(container_len(&value).unwrap_or(0)))
    }

    /// Fused for-in step. When the counter is below the length: push the
    /// next element and true, advancing the counter. Otherwise push false.
    pub(crate) fn execute_for_in_step(&mut self, iter: u8, len: u8, counter: u8) -> Result<()> {
        let base = self.frame().base;
        let length = match self.stack.get(base + len as usize)? {
            Value::Int(n) => n,
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "int".to_string(),
                    got: other.type_name().to_string(),
                });
            }
        };
        let index = match self.stack.get(base + counter as usize)? {
            Value::Int(n) => n,
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "int".to_string(),
                    got: other.type_name().to_string(),
                });
            }
        };

        if index >= length {
            return self.stack.push(Value::Bool(false));
        }

        let iterable = self.stack.get(base + iter as usize)?;
        let element = self.nth_element(&iterable, index)?;
        self.stack.set(base + counter as usize, Value::Int(index + 1))?;
        self.stack.push(element)?;
        self.stack.push(Value::Bool(true))
    }

    /// The for-in iteration protocol: lists and strings by position, ranges
    /// by arithmetic, maps by their nth occupied entry (yielding the key).
    fn nth_element(&mut self, iterable: &Value, index: i64) -> Result<Value> {
        let Value::Obj(obj) = iterable else {
            return Err(RuntimeError::BadIndex {
                container: iterable.type_name().to_string(),
                index: "int".to_string(),
            });
        };
        let element = match &obj.body {
            ObjBody::List(list) => list
                .borrow()
                .items
                .get(index as usize)
                .cloned()
                .unwrap_or(Value::Null),
            ObjBody::Str(s) => {
                let one = {
                    let text = s.borrow();
                    text.bytes
                        .as_bytes()
                        .get(index as usize)
                        .map(|&byte| (byte as char).to_string())
                };
                match one {
                    Some(ch) => self.heap.new_string_value(&ch),
                    None => Value::Null,
                }
            }
            ObjBody::Range(r) => r.nth(index).map(Value::Int).unwrap_or(Value::Null),
            ObjBody::Map(map) => map
                .borrow()
                .nth_entry(index as usize)
                .map(|entry| entry.key.clone())
                .unwrap_or(Value::Null),
            _ => {
                return Err(RuntimeError::BadIndex {
                    container: iterable.type_name().to_string(),
                    index: "int".to_string(),
                });
            }
        };
        Ok(element)
    }
}

//! Pickle Decoding
//!
//! A small unpickler for the files `pickle.dump` writes when given a
//! `dict` of numpy arrays. It runs the pickle stack machine for protocols
//! 2 through 5 and rebuilds numpy arrays from either of the two encodings
//! numpy uses:
//!
//! - `numpy.core.multiarray._reconstruct` followed by `BUILD` with the
//!   `(version, shape, dtype, is_fortran, raw_bytes)` state (protocol <= 4)
//! - `numpy.core.numeric._frombuffer(buffer, dtype, shape, order)`
//!   (protocol 5)
//!
//! Arbitrary Python objects are rejected with an error naming the callable.

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use crate::error::{Error, Result};

/// Pickle opcodes understood by [`Unpickler`]
mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const BINFLOAT: u8 = b'G';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const APPENDS: u8 = b'e';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const EMPTY_LIST: u8 = b']';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const SETITEMS: u8 = b'u';
    pub const EMPTY_DICT: u8 = b'}';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Highest pickle protocol this decoder accepts
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Element kind of a numpy dtype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Int,
    UInt,
    Bool,
}

/// The subset of numpy dtypes that can be converted to `f64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DType {
    pub kind: ScalarKind,
    /// Item size in bytes
    pub size: usize,
    pub little_endian: bool,
}

impl DType {
    /// Parse a numpy type string such as `f8`, `<f4` or `|u1`
    pub fn parse(descr: &str) -> Option<Self> {
        let (little_endian, body) = match descr.chars().next()? {
            '<' | '|' => (true, &descr[1..]),
            '>' => (false, &descr[1..]),
            '=' => (cfg!(target_endian = "little"), &descr[1..]),
            _ => (cfg!(target_endian = "little"), descr),
        };

        let mut chars = body.chars();
        let kind = match chars.next()? {
            'f' => ScalarKind::Float,
            'i' => ScalarKind::Int,
            'u' => ScalarKind::UInt,
            'b' => ScalarKind::Bool,
            _ => return None,
        };
        let size: usize = chars.as_str().parse().ok()?;

        let supported = match kind {
            ScalarKind::Float => matches!(size, 4 | 8),
            ScalarKind::Int | ScalarKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ScalarKind::Bool => size == 1,
        };

        supported.then_some(Self {
            kind,
            size,
            little_endian,
        })
    }

    /// Apply the byte order character from a dtype `BUILD` state
    pub fn with_byte_order(mut self, order: &str) -> Self {
        match order {
            "<" => self.little_endian = true,
            ">" => self.little_endian = false,
            "=" => self.little_endian = cfg!(target_endian = "little"),
            _ => {}
        }
        self
    }

    /// Decode one element; `bytes` holds exactly `self.size` bytes
    fn read(&self, bytes: &[u8]) -> f64 {
        macro_rules! decode {
            ($ty:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                if self.little_endian {
                    <$ty>::from_le_bytes(buf) as f64
                } else {
                    <$ty>::from_be_bytes(buf) as f64
                }
            }};
        }

        match (self.kind, self.size) {
            (ScalarKind::Float, 8) => decode!(f64, 8),
            (ScalarKind::Float, _) => decode!(f32, 4),
            (ScalarKind::Int, 8) => decode!(i64, 8),
            (ScalarKind::Int, 4) => decode!(i32, 4),
            (ScalarKind::Int, 2) => decode!(i16, 2),
            (ScalarKind::Int, _) => bytes[0] as i8 as f64,
            (ScalarKind::UInt, 8) => decode!(u64, 8),
            (ScalarKind::UInt, 4) => decode!(u32, 4),
            (ScalarKind::UInt, 2) => decode!(u16, 2),
            (ScalarKind::UInt, _) => bytes[0] as f64,
            (ScalarKind::Bool, _) => {
                if bytes[0] != 0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// A decoded pickle value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// Dictionary entries in insertion order
    Dict(Vec<(Value, Value)>),
    Global { module: String, name: String },
    DType(DType),
    /// Array allocated by `_reconstruct`, waiting for its `BUILD` state
    PendingArray,
    Array(ArrayD<f64>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Global { .. } => "global",
            Value::DType(_) => "dtype",
            Value::PendingArray => "ndarray (unbuilt)",
            Value::Array(_) => "ndarray",
        }
    }
}

/// Decode a complete pickle stream into a [`Value`]
pub fn loads(data: &[u8]) -> Result<Value> {
    Unpickler::new(data).load()
}

/// Stack machine executing pickle opcodes
pub struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    /// Memo key each stack slot was stored under, if any
    slot_keys: Vec<Option<u32>>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Unpickler<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            slot_keys: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    /// Run opcodes until `STOP` and return the top of the stack
    pub fn load(&mut self) -> Result<Value> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;

            match opcode {
                op::PROTO => {
                    let version = self.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(Error::pickle(
                            offset,
                            format!("unsupported protocol {}", version),
                        ));
                    }
                }
                op::FRAME => {
                    self.read_u64()?;
                }
                op::STOP => return self.pop(),

                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.push(top);
                }

                op::NONE => self.push(Value::None),
                op::NEWTRUE => self.push(Value::Bool(true)),
                op::NEWFALSE => self.push(Value::Bool(false)),
                op::BININT => {
                    let v = self.read_i32()?;
                    self.push(Value::Int(v as i64));
                }
                op::BININT1 => {
                    let v = self.read_u8()?;
                    self.push(Value::Int(v as i64));
                }
                op::BININT2 => {
                    let v = self.read_u16()?;
                    self.push(Value::Int(v as i64));
                }
                op::LONG1 => {
                    let n = self.read_u8()? as usize;
                    let bytes = self.read_bytes(n)?;
                    let v = decode_long(bytes)
                        .ok_or_else(|| Error::pickle(offset, "integer wider than 64 bits"))?;
                    self.push(Value::Int(v));
                }
                op::BINFLOAT => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(self.read_bytes(8)?);
                    self.push(Value::Float(f64::from_be_bytes(buf)));
                }

                op::SHORT_BINUNICODE => {
                    let n = self.read_u8()? as usize;
                    self.push_str(n, offset)?;
                }
                op::BINUNICODE => {
                    let n = self.read_u32()? as usize;
                    self.push_str(n, offset)?;
                }
                op::BINUNICODE8 => {
                    let n = self.read_len64(offset)?;
                    self.push_str(n, offset)?;
                }

                op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                    let n = self.read_u8()? as usize;
                    self.push_bytes(n)?;
                }
                op::BINSTRING => {
                    let n = self.read_i32()?;
                    if n < 0 {
                        return Err(Error::pickle(offset, "negative string length"));
                    }
                    self.push_bytes(n as usize)?;
                }
                op::BINBYTES => {
                    let n = self.read_u32()? as usize;
                    self.push_bytes(n)?;
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let n = self.read_len64(offset)?;
                    self.push_bytes(n)?;
                }

                op::EMPTY_TUPLE => self.push(Value::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = (opcode - op::TUPLE1 + 1) as usize;
                    if self.stack.len() < n {
                        return Err(Error::pickle(offset, "stack underflow building tuple"));
                    }
                    let items = self.split_off(self.stack.len() - n);
                    self.push(Value::Tuple(items));
                }

                op::EMPTY_LIST => self.push(Value::List(Vec::new())),
                op::APPEND => {
                    let item = self.pop()?;
                    self.with_list(offset, |list| list.push(item))?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.with_list(offset, |list| list.extend(items))?;
                }

                op::EMPTY_DICT => self.push(Value::Dict(Vec::new())),
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.with_dict(offset, |dict| dict.push((key, value)))?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    if items.len() % 2 != 0 {
                        return Err(Error::pickle(offset, "odd number of items for SETITEMS"));
                    }
                    let mut pairs = Vec::with_capacity(items.len() / 2);
                    let mut iter = items.into_iter();
                    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                        pairs.push((k, v));
                    }
                    self.with_dict(offset, |dict| dict.extend(pairs))?;
                }

                op::GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.push(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.push(Value::Global { module, name })
                        }
                        _ => {
                            return Err(Error::pickle(
                                offset,
                                "STACK_GLOBAL expects two strings",
                            ))
                        }
                    }
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let value = reduce(callable, args).map_err(|m| Error::pickle(offset, m))?;
                    self.push(value);
                }
                op::BUILD => {
                    let state = self.pop()?;
                    let key = self.slot_keys.last().copied().flatten();
                    let target = self.pop()?;
                    let value = build(target, state).map_err(|m| Error::pickle(offset, m))?;
                    // the memo holds the object, not a snapshot taken before BUILD
                    if let Some(key) = key {
                        self.memo.insert(key, value.clone());
                    }
                    self.push(value);
                    self.tag_top(key);
                }

                op::BINPUT => {
                    let key = self.read_u8()? as u32;
                    self.memoize(key)?;
                }
                op::LONG_BINPUT => {
                    let key = self.read_u32()?;
                    self.memoize(key)?;
                }
                op::MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memoize(key)?;
                }
                op::BINGET => {
                    let key = self.read_u8()? as u32;
                    self.recall(key, offset)?;
                }
                op::LONG_BINGET => {
                    let key = self.read_u32()?;
                    self.recall(key, offset)?;
                }

                other => {
                    return Err(Error::pickle(
                        offset,
                        format!("unsupported opcode 0x{:02x}", other),
                    ))
                }
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_len64(&mut self, offset: usize) -> Result<usize> {
        let n = self.read_u64()?;
        usize::try_from(n).map_err(|_| Error::pickle(offset, "length does not fit in memory"))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::pickle(self.pos, "unexpected end of stream"))?;
        let data: &'a [u8] = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_line(&mut self) -> Result<String> {
        let start = self.pos;
        let data: &'a [u8] = self.data;
        let len = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::pickle(start, "unterminated line"))?;
        let line = self.read_bytes(len)?;
        self.pos += 1;
        String::from_utf8(line.to_vec()).map_err(|_| Error::pickle(start, "invalid UTF-8 in line"))
    }

    fn push_str(&mut self, n: usize, offset: usize) -> Result<()> {
        let bytes = self.read_bytes(n)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| Error::pickle(offset, "invalid UTF-8 in string"))?;
        self.push(Value::Str(s.to_string()));
        Ok(())
    }

    fn push_bytes(&mut self, n: usize) -> Result<()> {
        let bytes = self.read_bytes(n)?.to_vec();
        self.push(Value::Bytes(bytes));
        Ok(())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
        self.slot_keys.push(None);
    }

    fn pop(&mut self) -> Result<Value> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| Error::pickle(self.pos, "stack underflow"))?;
        self.slot_keys.pop();
        Ok(value)
    }

    fn split_off(&mut self, at: usize) -> Vec<Value> {
        self.slot_keys.truncate(at);
        self.stack.split_off(at)
    }

    fn tag_top(&mut self, key: Option<u32>) {
        if let Some(slot) = self.slot_keys.last_mut() {
            *slot = key;
        }
    }

    fn top(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| Error::pickle(self.pos, "stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| Error::pickle(self.pos, "MARK not found"))?;
        if mark > self.stack.len() {
            return Err(Error::pickle(self.pos, "MARK beyond stack top"));
        }
        Ok(self.split_off(mark))
    }

    fn memoize(&mut self, key: u32) -> Result<()> {
        let top = self.top()?.clone();
        self.memo.insert(key, top);
        self.tag_top(Some(key));
        Ok(())
    }

    fn recall(&mut self, key: u32, offset: usize) -> Result<()> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::pickle(offset, format!("memo key {} not found", key)))?;
        self.push(value);
        self.tag_top(Some(key));
        Ok(())
    }

    fn with_list(&mut self, offset: usize, f: impl FnOnce(&mut Vec<Value>)) -> Result<()> {
        match self.stack.last_mut() {
            Some(Value::List(list)) => {
                f(list);
                Ok(())
            }
            _ => Err(Error::pickle(offset, "append target is not a list")),
        }
    }

    fn with_dict(
        &mut self,
        offset: usize,
        f: impl FnOnce(&mut Vec<(Value, Value)>),
    ) -> Result<()> {
        match self.stack.last_mut() {
            Some(Value::Dict(dict)) => {
                f(dict);
                Ok(())
            }
            _ => Err(Error::pickle(offset, "setitem target is not a dict")),
        }
    }
}

/// Two's complement little-endian integer of up to 8 bytes
fn decode_long(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(i64::from_le_bytes(buf))
}

fn is_numpy(module: &str) -> bool {
    module == "numpy" || module.starts_with("numpy.")
}

/// Apply a `REDUCE` for the handful of callables numpy pickles use
fn reduce(callable: Value, args: Value) -> std::result::Result<Value, String> {
    let (module, name) = match callable {
        Value::Global { module, name } => (module, name),
        other => return Err(format!("cannot call a {}", other.kind())),
    };
    let args = match args {
        Value::Tuple(args) => args,
        other => return Err(format!("REDUCE arguments must be a tuple, got {}", other.kind())),
    };

    match (module.as_str(), name.as_str()) {
        (m, "_reconstruct") if is_numpy(m) => Ok(Value::PendingArray),
        (m, "dtype") if is_numpy(m) => match args.first() {
            Some(Value::Str(descr)) => DType::parse(descr)
                .map(Value::DType)
                .ok_or_else(|| format!("unsupported dtype '{}'", descr)),
            _ => Err("dtype expects a type string".to_string()),
        },
        (m, "_frombuffer") if is_numpy(m) => {
            let mut args = args.into_iter();
            match (args.next(), args.next(), args.next(), args.next()) {
                (Some(Value::Bytes(raw)), Some(Value::DType(dtype)), Some(shape), Some(order)) => {
                    let shape = shape_from(&shape)?;
                    let fortran = matches!(order, Value::Str(ref o) if o == "F");
                    decode_array(dtype, &shape, fortran, &raw).map(Value::Array)
                }
                _ => Err("_frombuffer expects (bytes, dtype, shape, order)".to_string()),
            }
        }
        ("_codecs", "encode") => match args.as_slice() {
            [Value::Str(text), Value::Str(encoding)] if encoding == "latin1" => text
                .chars()
                .map(|c| u8::try_from(c as u32).map_err(|_| "non latin-1 character".to_string()))
                .collect::<std::result::Result<Vec<u8>, String>>()
                .map(Value::Bytes),
            _ => Err("_codecs.encode expects (str, 'latin1')".to_string()),
        },
        _ => Err(format!("unsupported callable {}.{}", module, name)),
    }
}

/// Apply a `BUILD` state to an object produced by [`reduce`]
fn build(target: Value, state: Value) -> std::result::Result<Value, String> {
    let state = match state {
        Value::Tuple(items) => items,
        other => return Err(format!("BUILD state must be a tuple, got {}", other.kind())),
    };

    match target {
        Value::PendingArray => {
            if state.len() != 5 {
                return Err(format!("ndarray state has {} fields, expected 5", state.len()));
            }
            let shape = shape_from(&state[1])?;
            let dtype = match &state[2] {
                Value::DType(dtype) => *dtype,
                other => return Err(format!("ndarray dtype is a {}", other.kind())),
            };
            let fortran = match &state[3] {
                Value::Bool(flag) => *flag,
                Value::Int(flag) => *flag != 0,
                other => return Err(format!("ndarray order flag is a {}", other.kind())),
            };
            match &state[4] {
                Value::Bytes(raw) => decode_array(dtype, &shape, fortran, raw).map(Value::Array),
                other => Err(format!("ndarray data is a {}, expected bytes", other.kind())),
            }
        }
        Value::DType(dtype) => match state.get(1) {
            Some(Value::Str(order)) => Ok(Value::DType(dtype.with_byte_order(order))),
            _ => Ok(Value::DType(dtype)),
        },
        other => Err(format!("cannot BUILD a {}", other.kind())),
    }
}

fn shape_from(value: &Value) -> std::result::Result<Vec<usize>, String> {
    match value {
        Value::Tuple(dims) => dims
            .iter()
            .map(|d| match d {
                Value::Int(n) if *n >= 0 => Ok(*n as usize),
                _ => Err("shape entries must be non-negative integers".to_string()),
            })
            .collect(),
        other => Err(format!("shape must be a tuple, got {}", other.kind())),
    }
}

fn decode_array(
    dtype: DType,
    shape: &[usize],
    fortran: bool,
    raw: &[u8],
) -> std::result::Result<ArrayD<f64>, String> {
    let needed = shape
        .iter()
        .try_fold(dtype.size, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| format!("array of shape {:?} is too large", shape))?;
    if raw.len() != needed {
        return Err(format!(
            "array of shape {:?} needs {} bytes, found {}",
            shape,
            needed,
            raw.len()
        ));
    }

    let values: Vec<f64> = raw.chunks_exact(dtype.size).map(|c| dtype.read(c)).collect();
    let array = if fortran {
        ArrayD::from_shape_vec(IxDyn(shape).f(), values)
    } else {
        ArrayD::from_shape_vec(IxDyn(shape), values)
    };
    array.map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Emits pickle opcodes the way CPython's pickler lays them out
    #[derive(Default)]
    pub(crate) struct PickleWriter {
        pub buf: Vec<u8>,
    }

    impl PickleWriter {
        pub fn proto(mut self, version: u8) -> Self {
            self.buf.extend([op::PROTO, version]);
            self
        }

        pub fn op(mut self, opcode: u8) -> Self {
            self.buf.push(opcode);
            self
        }

        pub fn int(mut self, v: i32) -> Self {
            if (0..256).contains(&v) {
                self.buf.extend([op::BININT1, v as u8]);
            } else {
                self.buf.push(op::BININT);
                self.buf.extend(v.to_le_bytes());
            }
            self
        }

        pub fn unicode(mut self, s: &str) -> Self {
            if s.len() < 256 {
                self.buf.extend([op::SHORT_BINUNICODE, s.len() as u8]);
            } else {
                self.buf.push(op::BINUNICODE);
                self.buf.extend((s.len() as u32).to_le_bytes());
            }
            self.buf.extend(s.as_bytes());
            self
        }

        pub fn bytes(mut self, data: &[u8]) -> Self {
            self.buf.push(op::BINBYTES);
            self.buf.extend((data.len() as u32).to_le_bytes());
            self.buf.extend(data);
            self
        }

        pub fn global(mut self, module: &str, name: &str) -> Self {
            self.buf.push(op::GLOBAL);
            self.buf.extend(module.as_bytes());
            self.buf.push(b'\n');
            self.buf.extend(name.as_bytes());
            self.buf.push(b'\n');
            self
        }

        /// `numpy.dtype(descr, False, True)` with its `BUILD` state
        pub fn dtype(self, descr: &str, order: &str) -> Self {
            self.global("numpy", "dtype")
                .unicode(descr)
                .op(op::NEWFALSE)
                .op(op::NEWTRUE)
                .op(op::TUPLE3)
                .op(op::REDUCE)
                .op(op::MARK)
                .int(3)
                .unicode(order)
                .op(op::NONE)
                .op(op::NONE)
                .op(op::NONE)
                .int(-1)
                .int(-1)
                .int(0)
                .op(op::TUPLE)
                .op(op::BUILD)
        }

        /// An f8 array using the protocol-2 `_reconstruct` layout
        pub fn reconstructed_array(self, shape: &[usize], values: &[f64]) -> Self {
            let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            let latin1: String = raw.iter().map(|&b| b as char).collect();

            let mut w = self
                .global("numpy.core.multiarray", "_reconstruct")
                .global("numpy", "ndarray")
                .int(0)
                .op(op::TUPLE1)
                .global("_codecs", "encode")
                .unicode("b")
                .unicode("latin1")
                .op(op::TUPLE2)
                .op(op::REDUCE)
                .op(op::TUPLE3)
                .op(op::REDUCE)
                .op(op::MARK)
                .int(1)
                .op(op::MARK);
            for &d in shape {
                w = w.int(d as i32);
            }
            w.op(op::TUPLE)
                .dtype("f8", "<")
                .op(op::NEWFALSE)
                .global("_codecs", "encode")
                .unicode(&latin1)
                .unicode("latin1")
                .op(op::TUPLE2)
                .op(op::REDUCE)
                .op(op::TUPLE)
                .op(op::BUILD)
        }

        /// An f8 array using the protocol-5 `_frombuffer` layout
        pub fn frombuffer_array(self, shape: &[usize], values: &[f64]) -> Self {
            let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            let mut w = self
                .unicode("numpy.core.numeric")
                .op(op::MEMOIZE)
                .unicode("_frombuffer")
                .op(op::MEMOIZE)
                .op(op::STACK_GLOBAL)
                .op(op::MEMOIZE)
                .op(op::MARK)
                .bytes(&raw)
                .dtype("f8", "<")
                .op(op::MARK);
            for &d in shape {
                w = w.int(d as i32);
            }
            w.op(op::TUPLE).unicode("C").op(op::TUPLE).op(op::REDUCE)
        }

        pub fn finish(mut self) -> Vec<u8> {
            self.buf.push(op::STOP);
            self.buf
        }
    }

    #[test]
    fn test_scalars_and_containers() {
        let data = PickleWriter::default()
            .proto(4)
            .op(op::EMPTY_LIST)
            .op(op::MARK)
            .int(7)
            .int(-70000)
            .unicode("abc")
            .op(op::NONE)
            .op(op::NEWTRUE)
            .op(op::APPENDS)
            .finish();

        let value = loads(&data).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(7),
                Value::Int(-70000),
                Value::Str("abc".to_string()),
                Value::None,
                Value::Bool(true),
            ])
        );
    }

    #[test]
    fn test_long1_negative() {
        let mut w = PickleWriter::default().proto(2);
        w.buf.extend([op::LONG1, 2, 0x00, 0xff]);
        let value = loads(&w.finish()).unwrap();
        assert_eq!(value, Value::Int(-256));
    }

    #[test]
    fn test_memo_roundtrip() {
        let data = PickleWriter::default()
            .proto(2)
            .unicode("shared")
            .op(op::BINPUT)
            .op(0)
            .op(op::POP)
            .op(op::BINGET)
            .op(0)
            .op(op::BINGET)
            .op(0)
            .op(op::TUPLE2)
            .finish();

        let value = loads(&data).unwrap();
        assert_eq!(
            value,
            Value::Tuple(vec![
                Value::Str("shared".to_string()),
                Value::Str("shared".to_string())
            ])
        );
    }

    #[test]
    fn test_reconstruct_array() {
        let values: Vec<f64> = (0..6).map(|v| v as f64 * 0.5).collect();
        let data = PickleWriter::default()
            .proto(2)
            .reconstructed_array(&[1, 3, 2], &values)
            .finish();

        match loads(&data).unwrap() {
            Value::Array(array) => {
                assert_eq!(array.shape(), &[1, 3, 2]);
                assert_relative_eq!(array[[0, 2, 1]], 2.5);
                assert_relative_eq!(array[[0, 1, 0]], 1.0);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_frombuffer_array() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let data = PickleWriter::default()
            .proto(5)
            .frombuffer_array(&[2, 2], &values)
            .finish();

        match loads(&data).unwrap() {
            Value::Array(array) => {
                assert_eq!(array.shape(), &[2, 2]);
                assert_relative_eq!(array[[1, 0]], 3.0);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_big_endian_f4() {
        let raw: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let data = PickleWriter::default()
            .proto(5)
            .global("numpy.core.numeric", "_frombuffer")
            .op(op::MARK)
            .bytes(&raw)
            .dtype("f4", ">")
            .int(2)
            .op(op::TUPLE1)
            .unicode("C")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .finish();

        match loads(&data).unwrap() {
            Value::Array(array) => {
                assert_relative_eq!(array[[0]], 1.5);
                assert_relative_eq!(array[[1]], -2.0);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_memoized_dtype_keeps_byte_order() {
        let be = |values: &[f64]| -> Vec<u8> {
            values.iter().flat_map(|v| v.to_be_bytes()).collect()
        };
        let data = PickleWriter::default()
            .proto(5)
            .op(op::EMPTY_DICT)
            .op(op::MARK)
            .unicode("x")
            .global("numpy.core.numeric", "_frombuffer")
            .op(op::MARK)
            .bytes(&be(&[1.5, 2.5]))
            // dtype memoized between REDUCE and BUILD, as CPython does
            .global("numpy", "dtype")
            .unicode("f8")
            .op(op::NEWFALSE)
            .op(op::NEWTRUE)
            .op(op::TUPLE3)
            .op(op::REDUCE)
            .op(op::BINPUT)
            .op(2)
            .op(op::MARK)
            .int(3)
            .unicode(">")
            .op(op::NONE)
            .op(op::NONE)
            .op(op::NONE)
            .int(-1)
            .int(-1)
            .int(0)
            .op(op::TUPLE)
            .op(op::BUILD)
            .int(2)
            .op(op::TUPLE1)
            .unicode("C")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .unicode("y")
            .global("numpy.core.numeric", "_frombuffer")
            .op(op::MARK)
            .bytes(&be(&[3.5, 4.5]))
            .op(op::BINGET)
            .op(2)
            .int(2)
            .op(op::TUPLE1)
            .unicode("C")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .op(op::SETITEMS)
            .finish();

        let entries = match loads(&data).unwrap() {
            Value::Dict(entries) => entries,
            other => panic!("expected dict, got {:?}", other),
        };
        assert_eq!(entries.len(), 2);
        let expected = [[1.5, 2.5], [3.5, 4.5]];
        for ((_, value), want) in entries.iter().zip(expected) {
            match value {
                Value::Array(array) => {
                    assert_relative_eq!(array[[0]], want[0]);
                    assert_relative_eq!(array[[1]], want[1]);
                }
                other => panic!("expected array, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_fortran_order() {
        let raw: Vec<u8> = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let data = PickleWriter::default()
            .proto(5)
            .global("numpy._core.numeric", "_frombuffer")
            .op(op::MARK)
            .bytes(&raw)
            .dtype("f8", "<")
            .int(2)
            .int(3)
            .op(op::TUPLE2)
            .unicode("F")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .finish();

        match loads(&data).unwrap() {
            Value::Array(array) => {
                // column-major: first column is [1, 2]
                assert_relative_eq!(array[[0, 0]], 1.0);
                assert_relative_eq!(array[[1, 0]], 2.0);
                assert_relative_eq!(array[[0, 1]], 3.0);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_dtype_parse() {
        let d = DType::parse("f8").unwrap();
        assert_eq!(d.kind, ScalarKind::Float);
        assert_eq!(d.size, 8);

        let d = DType::parse(">i4").unwrap();
        assert!(!d.little_endian);
        assert_eq!(d.kind, ScalarKind::Int);

        assert!(DType::parse("c16").is_none());
        assert!(DType::parse("f2").is_none());
        assert!(DType::parse("O").is_none());
    }

    #[test]
    fn test_unsupported_callable() {
        let data = PickleWriter::default()
            .proto(2)
            .global("os", "system")
            .unicode("echo")
            .op(op::TUPLE1)
            .op(op::REDUCE)
            .finish();

        let err = loads(&data).unwrap_err();
        assert!(err.to_string().contains("os.system"));
    }

    #[test]
    fn test_unknown_opcode_and_truncation() {
        let err = loads(&[op::PROTO, 2, 0xff]).unwrap_err();
        assert!(err.to_string().contains("0xff"));

        let err = loads(&[op::PROTO, 2, op::BININT]).unwrap_err();
        assert!(err.to_string().contains("unexpected end"));
    }

    #[test]
    fn test_array_size_mismatch() {
        let data = PickleWriter::default()
            .proto(5)
            .global("numpy", "_frombuffer")
            .op(op::MARK)
            .bytes(&[0u8; 12])
            .dtype("f8", "<")
            .int(2)
            .op(op::TUPLE1)
            .unicode("C")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .finish();

        assert!(loads(&data).is_err());
    }

    #[test]
    fn test_oversized_shape_is_an_error() {
        let data = PickleWriter::default()
            .proto(5)
            .global("numpy", "_frombuffer")
            .op(op::MARK)
            .bytes(&[0u8; 8])
            .dtype("f8", "<")
            .int(i32::MAX)
            .int(i32::MAX)
            .int(i32::MAX)
            .op(op::TUPLE3)
            .unicode("C")
            .op(op::TUPLE)
            .op(op::REDUCE)
            .finish();

        let err = loads(&data).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}

//! Host values, objects and their property primitives.
//!
//! Objects are owned by a [`Heap`](super::heap::Heap). An [`ObjectRef`] is a
//! strong reference and keeps its object reachable; a [`WeakObject`] never
//! does. Identities are opaque [`ObjectId`]s, never addresses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Thrown;

/// Opaque identity of a host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn from_raw(raw: u64) -> Self {
        ObjectId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// A unique, non-string property key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u64);

impl Symbol {
    pub fn new() -> Self {
        Symbol(NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self::new()
    }
}

/// Native function body backing a callable host object
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, Thrown> + Send + Sync>;

/// What kind of object a cell holds
#[derive(Clone)]
pub enum ObjectKind {
    Plain,
    Array,
    Function(NativeFn),
    /// Auxiliary object used to observe another object's reclamation indirectly
    Companion,
}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Plain => write!(f, "Plain"),
            ObjectKind::Array => write!(f, "Array"),
            ObjectKind::Function(_) => write!(f, "Function"),
            ObjectKind::Companion => write!(f, "Companion"),
        }
    }
}

/// Property key: array index, string name or symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Index(u32),
    String(Arc<str>),
    Symbol(Symbol),
}

impl PropertyKey {
    fn is_length(&self) -> bool {
        matches!(self, PropertyKey::String(name) if &**name == "length")
    }

    /// Canonical array index form of a string, if it has one.
    fn parse_index(name: &str) -> Option<u32> {
        if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
            return None;
        }
        if !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // u32::MAX is not a valid index
        name.parse::<u32>().ok().filter(|index| *index != u32::MAX)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        match PropertyKey::parse_index(name) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::String(Arc::from(name)),
        }
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::from(name.as_str())
    }
}

impl From<u32> for PropertyKey {
    /// `u32::MAX` is not an array index and becomes a string key.
    fn from(index: u32) -> Self {
        if index == u32::MAX {
            PropertyKey::String(Arc::from(index.to_string()))
        } else {
            PropertyKey::Index(index)
        }
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        PropertyKey::Symbol(symbol)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(index) => write!(f, "{}", index),
            PropertyKey::String(name) => write!(f, "{}", name),
            PropertyKey::Symbol(symbol) => write!(f, "Symbol({})", symbol.0),
        }
    }
}

/// A host value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Symbol(Symbol),
    Object(ObjectRef),
}

impl Value {
    /// Whether this value can be weakly observed
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The function object behind this value, if it can be called
    pub fn as_callable(&self) -> Option<&ObjectRef> {
        self.as_object().filter(|object| object.is_callable())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Object(object) if object.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::Symbol(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

/// Exact for ids up to 2^53, far beyond what the process-wide counter
/// hands out in practice.
impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Number(id.0 as f64)
    }
}

#[derive(Default)]
struct PropertyMap {
    entries: Vec<(PropertyKey, Value)>,
}

impl PropertyMap {
    fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn array_len(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|(key, _)| match key {
                PropertyKey::Index(index) => Some(u64::from(*index) + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

pub(crate) struct ObjectCell {
    id: ObjectId,
    kind: ObjectKind,
    properties: Mutex<PropertyMap>,
}

/// Strong reference to a host object
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectCell>);

impl ObjectRef {
    pub(crate) fn new(id: ObjectId, kind: ObjectKind) -> Self {
        ObjectRef(Arc::new(ObjectCell {
            id,
            kind,
            properties: Mutex::new(PropertyMap::default()),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Array)
    }

    pub fn is_companion(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Companion)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            id: self.0.id,
            cell: Arc::downgrade(&self.0),
        }
    }

    /// Read a property; `None` when absent.
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        let properties = self.0.properties.lock();
        if self.is_array() && key.is_length() {
            return Some(Value::Number(properties.array_len() as f64));
        }
        properties
            .position(key)
            .map(|index| properties.entries[index].1.clone())
    }

    /// Write a property, adding it at the end of the insertion order if new.
    pub fn set(&self, key: PropertyKey, value: Value) {
        let mut properties = self.0.properties.lock();
        if self.is_array() && key.is_length() {
            if let Value::Number(len) = value {
                if !len.is_finite() {
                    return;
                }
                let len = len.max(0.0) as u64;
                properties.entries.retain(|(k, _)| match k {
                    PropertyKey::Index(index) => u64::from(*index) < len,
                    _ => true,
                });
            }
            return;
        }
        match properties.position(&key) {
            Some(index) => properties.entries[index].1 = value,
            None => properties.entries.push((key, value)),
        }
    }

    /// Remove a property; returns whether one was removed.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut properties = self.0.properties.lock();
        match properties.position(key) {
            Some(index) => {
                properties.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has(&self, key: &PropertyKey) -> bool {
        if self.is_array() && key.is_length() {
            return true;
        }
        self.0.properties.lock().position(key).is_some()
    }

    /// Own enumerable keys: indices ascending, then names in insertion
    /// order, then symbols in insertion order.
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        let properties = self.0.properties.lock();
        let mut indices: Vec<u32> = Vec::new();
        let mut names = Vec::new();
        let mut symbols = Vec::new();
        for (key, _) in &properties.entries {
            match key {
                PropertyKey::Index(index) => indices.push(*index),
                PropertyKey::String(_) => names.push(key.clone()),
                PropertyKey::Symbol(_) => symbols.push(key.clone()),
            }
        }
        indices.sort_unstable();
        indices
            .into_iter()
            .map(PropertyKey::Index)
            .chain(names)
            .chain(symbols)
            .collect()
    }

    /// Array length; zero for non-arrays.
    pub fn len(&self) -> u64 {
        if !self.is_array() {
            return 0;
        }
        self.0.properties.lock().array_len()
    }

    pub fn is_empty(&self) -> bool {
        self.own_keys().is_empty()
    }

    /// Append to an array, returning the new length.
    ///
    /// Past the last valid index the element lands under a string key.
    pub fn push(&self, value: Value) -> u64 {
        let mut properties = self.0.properties.lock();
        let len = properties.array_len();
        let key = match u32::try_from(len) {
            Ok(index) => PropertyKey::from(index),
            Err(_) => PropertyKey::String(Arc::from(len.to_string())),
        };
        match properties.position(&key) {
            Some(position) => properties.entries[position].1 = value,
            None => properties.entries.push((key, value)),
        }
        len + 1
    }

    /// Invoke a function object.
    pub fn call(&self, args: &[Value]) -> Result<Value, Thrown> {
        match &self.0.kind {
            ObjectKind::Function(body) => body(args),
            _ => Err(Thrown::new(format!("object {} is not a function", self.id()))),
        }
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Ids of objects referenced from this object's properties.
    pub(crate) fn child_ids(&self) -> Vec<ObjectId> {
        self.0
            .properties
            .lock()
            .entries
            .iter()
            .filter_map(|(_, value)| value.as_object().map(ObjectRef::id))
            .collect()
    }

    /// Drop every property; used when the object is swept.
    pub(crate) fn clear_properties(&self) {
        let entries = std::mem::take(&mut self.0.properties.lock().entries);
        drop(entries);
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .finish()
    }
}

/// Non-owning reference to a host object
#[derive(Clone)]
pub struct WeakObject {
    id: ObjectId,
    cell: Weak<ObjectCell>,
}

impl WeakObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Strong reference to the object while the heap still owns it.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.cell.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObject").field("id", &self.id).finish()
    }
}

//! Arena storage and pointer resolution.
//!
//! n8n stores execution data in a compressed form: a flat array of values in
//! which nested values are replaced by digit-only strings pointing at other
//! slots of the same array.
//!
//! ```json
//! [ {"resultData": "1"}, {"runData": "2"}, {"Start": "3"}, ["4"], ... ]
//! ```
//!
//! [`Resolver`] walks such a value and replaces every pointer with the
//! (recursively resolved) slot it refers to.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::TraceError;
use crate::options::TraceOptions;

/// Flat, index-addressable execution data.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawArena")]
pub struct Arena {
  slots: Vec<Value>,
}

/// Wire forms of the arena: the parsed array, or the flatted text n8n keeps
/// in its `data` column.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawArena {
  Slots(Vec<Value>),
  Flatted(String),
}

impl TryFrom<RawArena> for Arena {
  type Error = String;

  fn try_from(raw: RawArena) -> Result<Self, Self::Error> {
    match raw {
      RawArena::Slots(slots) => Ok(Self::new(slots)),
      RawArena::Flatted(text) => {
        Self::from_flatted(&text).map_err(|e| format!("invalid flatted execution data: {}", e))
      }
    }
  }
}

impl Serialize for Arena {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.slots.serialize(serializer)
  }
}

impl Arena {
  pub fn new(slots: Vec<Value>) -> Self {
    Self { slots }
  }

  /// Parse the flatted text form (a JSON array serialized to a string).
  pub fn from_flatted(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text).map(Self::new)
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Value> {
    self.slots.get(index)
  }

  pub fn slots(&self) -> &[Value] {
    &self.slots
  }

  /// Interpret `value` as a pointer into this arena.
  ///
  /// Returns the index only for digit-only strings that land in bounds;
  /// anything else is a literal.
  pub fn pointer(&self, value: &Value) -> Option<usize> {
    let index = pointer_index(value.as_str()?)?;
    (index < self.slots.len()).then_some(index)
  }

  /// Follow a single pointer hop without resolving the target.
  ///
  /// Non-pointer values (inline objects, out-of-range pointers, scalars)
  /// are returned as-is.
  pub fn follow<'a>(&'a self, value: &'a Value) -> &'a Value {
    match self.pointer(value) {
      Some(index) => &self.slots[index],
      None => value,
    }
  }

  /// Find the first object slot that carries `key`.
  pub fn find_entry(&self, key: &str) -> Option<(usize, &Map<String, Value>)> {
    self
      .slots
      .iter()
      .enumerate()
      .find_map(|(index, slot)| match slot {
        Value::Object(map) if map.contains_key(key) => Some((index, map)),
        _ => None,
      })
  }
}

/// Parse a digit-only string as an index.
///
/// Strings that overflow `usize` are never valid slots and are treated as
/// literals by the caller.
pub fn pointer_index(text: &str) -> Option<usize> {
  if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  text.parse().ok()
}

/// Resolve `value` against `arena` with the default options.
pub fn resolve(value: &Value, arena: &Arena) -> Result<Value, TraceError> {
  Resolver::new(arena, &TraceOptions::default()).resolve(value)
}

/// State of one `resolve` call: slots on the current path and the number of
/// slots expanded so far.
#[derive(Default)]
struct Walk {
  path: Vec<usize>,
  visits: usize,
}

/// Path-aware pointer resolver over a single arena.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
  arena: &'a Arena,
  options: &'a TraceOptions,
}

impl<'a> Resolver<'a> {
  pub fn new(arena: &'a Arena, options: &'a TraceOptions) -> Self {
    Self { arena, options }
  }

  pub fn arena(&self) -> &'a Arena {
    self.arena
  }

  /// Fully dereference `value`.
  ///
  /// Fails with [`TraceError::MalformedTrace`] when a pointer leads back to a
  /// slot already on the current path, when the path grows past `max_depth`
  /// hops, or when more than `max_slot_visits` slots get expanded.
  pub fn resolve(&self, value: &Value) -> Result<Value, TraceError> {
    let mut walk = Walk::default();
    self.resolve_in(value, &mut walk, false)
  }

  fn resolve_in(&self, value: &Value, walk: &mut Walk, literal: bool) -> Result<Value, TraceError> {
    match value {
      Value::String(_) if literal => Ok(value.clone()),
      Value::String(_) => match self.arena.pointer(value) {
        Some(index) => self.resolve_slot(index, walk, false),
        None => Ok(value.clone()),
      },
      Value::Object(map) => {
        let mut resolved = Map::with_capacity(map.len());
        for (key, field) in map {
          let field = if !literal && self.is_literal_key(key) {
            self.resolve_literal(field, walk)?
          } else {
            self.resolve_in(field, walk, literal)?
          };
          resolved.insert(key.clone(), field);
        }
        Ok(Value::Object(resolved))
      }
      Value::Array(items) => items
        .iter()
        .map(|item| self.resolve_in(item, walk, literal))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      _ => Ok(value.clone()),
    }
  }

  /// Resolve the value stored under a literal key.
  ///
  /// The container itself may be stored out of line, so a pointer to an
  /// object or array slot is followed once; strings inside stay untouched.
  fn resolve_literal(&self, value: &Value, walk: &mut Walk) -> Result<Value, TraceError> {
    match self.arena.pointer(value) {
      Some(index) if matches!(self.arena.slots[index], Value::Object(_) | Value::Array(_)) => {
        self.resolve_slot(index, walk, true)
      }
      _ => self.resolve_in(value, walk, true),
    }
  }

  fn resolve_slot(&self, index: usize, walk: &mut Walk, literal: bool) -> Result<Value, TraceError> {
    if walk.path.contains(&index) {
      return Err(TraceError::malformed(format!(
        "pointer cycle through slot {}",
        index
      )));
    }
    if walk.path.len() >= self.options.max_depth {
      return Err(TraceError::malformed(format!(
        "pointer chain exceeds {} hops at slot {}",
        self.options.max_depth, index
      )));
    }
    if walk.visits >= self.options.max_slot_visits {
      return Err(TraceError::malformed(format!(
        "value expands to more than {} slots at slot {}",
        self.options.max_slot_visits, index
      )));
    }

    walk.visits += 1;
    walk.path.push(index);
    let resolved = self.resolve_in(&self.arena.slots[index], walk, literal);
    walk.path.pop();
    resolved
  }

  fn is_literal_key(&self, key: &str) -> bool {
    self.options.literal_keys.iter().any(|k| k == key)
  }
}

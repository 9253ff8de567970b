#![forbid(unsafe_code)]

//! What a [`Ref`](super::Ref) can hold.
//!
//! Every cell payload implements [`Payload`]: cloneable, comparable, and
//! shareable across threads. Two flavours exist:
//!
//! - **Static payloads** (`i64`, `String`, `Vec<T>`, maps, sets, ...). The
//!   compiler already guarantees every write has the cell's type, so the only
//!   runtime type check is against kinds declared with
//!   [`RefBuilder::types`](super::RefBuilder::types).
//! - **Dynamic payloads** ([`Value`]). A `Value` cell can hold any shape, so
//!   writes are checked at runtime: against the declared kinds if any, else
//!   against the kind of the value being replaced.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

// ─── ValueKind ───────────────────────────────────────────────────────────────

/// Runtime type tag used by type invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Set,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
        })
    }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// A type that can live inside a [`Ref`](super::Ref).
pub trait Payload: Clone + PartialEq + Send + Sync + 'static {
    /// Whether writes must keep the kind of the value they replace.
    const DYNAMIC: bool = false;

    /// Runtime kind, if this type has a meaningful one.
    fn payload_kind(&self) -> Option<ValueKind> {
        None
    }
}

macro_rules! scalar_payload {
    ($kind:ident: $($ty:ty),+ $(,)?) => {
        $(
            impl Payload for $ty {
                fn payload_kind(&self) -> Option<ValueKind> {
                    Some(ValueKind::$kind)
                }
            }
        )+
    };
}

scalar_payload!(Null: ());
scalar_payload!(Bool: bool);
scalar_payload!(Int: i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
scalar_payload!(Float: f32, f64);
scalar_payload!(Str: char, String, &'static str);

impl<T: Payload> Payload for Option<T> {
    fn payload_kind(&self) -> Option<ValueKind> {
        match self {
            None => Some(ValueKind::Null),
            Some(inner) => inner.payload_kind(),
        }
    }
}

impl<T: Payload> Payload for Vec<T> {
    fn payload_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::List)
    }
}

impl<T: Payload + Ord> Payload for BTreeSet<T> {
    fn payload_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::Set)
    }
}

impl<T: Payload + Eq + Hash> Payload for HashSet<T> {
    fn payload_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::Set)
    }
}

impl<K: Payload + Ord, V: Payload> Payload for BTreeMap<K, V> {
    fn payload_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::Map)
    }
}

impl<K: Payload + Eq + Hash, V: Payload> Payload for HashMap<K, V> {
    fn payload_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::Map)
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

/// One step into a nested [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// Render a path for diagnostics: `$`, `$[0]`, `$.audio.sinks[2]`.
#[must_use]
pub fn render_path(path: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for segment in path {
        match segment {
            PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
        }
    }
    out
}

// ─── Value ───────────────────────────────────────────────────────────────────

/// Dynamically shaped payload.
///
/// Totally ordered (floats compare with `f64::total_cmp`), so values can live
/// in sets and be compared for the equality short-circuit on writes.
/// Serializes to plain JSON; sets serialize as arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Set(_) => ValueKind::Set,
            Self::Map(_) => ValueKind::Map,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; ints widen to floats.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Follow `path` from this value.
    #[must_use]
    pub fn at(&self, path: &[PathSegment]) -> Option<&Value> {
        path.iter().try_fold(self, |node, segment| match (node, segment) {
            (Self::List(items), PathSegment::Index(i)) => items.get(*i),
            (Self::Map(entries), PathSegment::Key(k)) => entries.get(k),
            _ => None,
        })
    }

    /// Follow `path` from this value, mutably.
    pub fn at_mut(&mut self, path: &[PathSegment]) -> Option<&mut Value> {
        path.iter().try_fold(self, |node, segment| match (node, segment) {
            (Self::List(items), PathSegment::Index(i)) => items.get_mut(*i),
            (Self::Map(entries), PathSegment::Key(k)) => entries.get_mut(k),
            _ => None,
        })
    }

    fn rank(&self) -> u8 {
        self.kind() as u8
    }
}

impl Payload for Value {
    const DYNAMIC: bool = true;

    fn payload_kind(&self) -> Option<ValueKind> {
        Some(self.kind())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Set(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(v: BTreeSet<Value>) -> Self {
        Self::Set(v)
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(v: BTreeMap<String, V>) -> Self {
        Self::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn kinds_of_static_payloads() {
        assert_eq!(5i64.payload_kind(), Some(ValueKind::Int));
        assert_eq!("x".to_string().payload_kind(), Some(ValueKind::Str));
        assert_eq!(None::<i32>.payload_kind(), Some(ValueKind::Null));
        assert_eq!(Some(1.5f64).payload_kind(), Some(ValueKind::Float));
        assert_eq!(vec![1u8].payload_kind(), Some(ValueKind::List));
        assert!(!<Vec<u8> as Payload>::DYNAMIC);
        assert!(<Value as Payload>::DYNAMIC);
    }

    #[test]
    fn floats_compare_totally() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert!(Value::Float(-1.0) < Value::Float(2.0));
    }

    #[test]
    fn different_kinds_order_by_kind() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Int(100) < Value::Float(0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn path_navigation() {
        let mut value = map(&[(
            "sinks",
            Value::from(vec![Value::from("hdmi"), Value::from("speakers")]),
        )]);
        let path = [PathSegment::Key("sinks".into()), PathSegment::Index(1)];
        assert_eq!(value.at(&path), Some(&Value::from("speakers")));

        if let Some(slot) = value.at_mut(&path) {
            *slot = Value::from("headphones");
        }
        assert_eq!(value.at(&path).and_then(Value::as_str), Some("headphones"));
        assert_eq!(value.at(&[PathSegment::Index(0)]), None);
    }

    #[test]
    fn render_path_formats_segments() {
        let path = [
            PathSegment::Key("audio".into()),
            PathSegment::Index(2),
            PathSegment::Key("name".into()),
        ];
        assert_eq!(render_path(&path), "$.audio[2].name");
        assert_eq!(render_path(&[]), "$");
    }

    #[test]
    fn json_shape_is_plain() {
        let mut set = BTreeSet::new();
        set.insert(Value::from(2));
        set.insert(Value::from(1));
        let value = map(&[
            ("corners", Value::from(false)),
            ("ids", Value::Set(set)),
            ("name", Value::Null),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"corners":false,"ids":[1,2],"name":null}"#);

        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at(&[PathSegment::Key("ids".into())]).map(Value::kind), Some(ValueKind::List));
    }

    #[test]
    fn display_is_readable() {
        let value = Value::from(vec![Value::from(1), Value::from("a")]);
        assert_eq!(value.to_string(), r#"[1, "a"]"#);
    }
}

//! Core data types shared by every component
//!
//! - [`TypeTag`]: runtime type identity of domain objects and values
//! - [`Value`]: scalar results of dimensions and statistics
//! - [`Element`]: a type-tagged domain object flowing through a retriever chain
//! - [`GroupKey`]: the bucket an aggregated result belongs to

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Settings object attached to retriever levels and processors
pub type Settings = serde_json::Value;

// ============================================================================
// Type Tags
// ============================================================================

const ANY_TYPE_NAME: &str = "Any";

/// Runtime type identity
///
/// Equality and hashing use the name only. Declared supertypes are consulted by
/// [`TypeTag::is_assignable_to`], which backs the lookups that explicitly
/// support interface-based matching.
#[derive(Clone)]
pub struct TypeTag {
    name: Arc<str>,
    supertypes: Arc<[TypeTag]>,
}

impl TypeTag {
    /// Create a type tag without supertypes
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            supertypes: Arc::from(Vec::new()),
        }
    }

    /// Create a type tag that declares the given supertypes
    pub fn with_supertypes(
        name: impl Into<Arc<str>>,
        supertypes: impl IntoIterator<Item = TypeTag>,
    ) -> Self {
        Self {
            name: name.into(),
            supertypes: supertypes.into_iter().collect::<Vec<_>>().into(),
        }
    }

    /// The universal supertype
    pub fn any() -> Self {
        Self::new(ANY_TYPE_NAME)
    }

    /// Common supertype of the numeric tags
    pub fn number() -> Self {
        Self::new("Number")
    }

    /// Tag of [`Value::Float`] results
    pub fn float() -> Self {
        Self::with_supertypes("Float", [Self::number()])
    }

    /// Tag of [`Value::Int`] results
    pub fn int() -> Self {
        Self::with_supertypes("Int", [Self::number()])
    }

    /// Tag of [`Value::Text`] results
    pub fn text() -> Self {
        Self::new("Text")
    }

    /// Tag of [`Value::Bool`] results
    pub fn boolean() -> Self {
        Self::new("Bool")
    }

    /// Tag of [`Value::List`] results
    pub fn list() -> Self {
        Self::new("List")
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared direct supertypes
    pub fn supertypes(&self) -> &[TypeTag] {
        &self.supertypes
    }

    /// Whether this is the universal supertype
    pub fn is_any(&self) -> bool {
        &*self.name == ANY_TYPE_NAME
    }

    /// Whether a value of this type can be used where `other` is expected
    pub fn is_assignable_to(&self, other: &TypeTag) -> bool {
        other.is_any()
            || self == other
            || self.supertypes.iter().any(|s| s.is_assignable_to(other))
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Values
// ============================================================================

/// Scalar value produced by dimensions and statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absent value; skipped by extraction
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Text(String),
    /// Ordered list of values
    List(Vec<Value>),
}

impl Value {
    /// Numeric view of the value, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text view of the value, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type tag matching the variant
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::any(),
            Value::Bool(_) => TypeTag::boolean(),
            Value::Int(_) => TypeTag::int(),
            Value::Float(_) => TypeTag::float(),
            Value::Text(_) => TypeTag::text(),
            Value::List(_) => TypeTag::list(),
        }
    }

    /// Compare two values by magnitude
    ///
    /// Ints and floats compare numerically with each other, texts
    /// lexicographically. Returns `None` for incomparable values.
    pub fn compare_magnitude(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::List(_) => 5,
        }
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

// Total order used for hashing-consistent equality and deterministic sorting.
// Floats compare by `total_cmp`, so equality matches bitwise identity.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            Value::Null => {},
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::List(values) => values.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            },
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Elements
// ============================================================================

/// A type-tagged domain object
///
/// Cheap to clone; the payload is shared.
#[derive(Clone)]
pub struct Element {
    type_tag: TypeTag,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Element {
    /// Wrap a domain object
    pub fn new<T: Any + Send + Sync>(type_tag: TypeTag, payload: T) -> Self {
        Self {
            type_tag,
            payload: Arc::new(payload),
        }
    }

    /// Wrap an already shared domain object
    pub fn from_arc<T: Any + Send + Sync>(type_tag: TypeTag, payload: Arc<T>) -> Self {
        Self { type_tag, payload }
    }

    /// Declared type of the payload
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// Borrow the payload as a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Whether the element may be consumed where `expected` is declared
    pub fn is_instance_of(&self, expected: &TypeTag) -> bool {
        self.type_tag.is_assignable_to(expected)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("type", &self.type_tag)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Group Keys
// ============================================================================

/// Bucket under which aggregated results are collected
///
/// A key holds one value per grouping dimension, in grouping order. The empty
/// key groups everything together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(Vec<Value>);

impl GroupKey {
    /// Key for ungrouped results
    pub fn overall() -> Self {
        Self(Vec::new())
    }

    /// Key with a single component
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Key with one component per grouping dimension
    pub fn compound(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Components of the key
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Whether the key groups everything together
    pub fn is_overall(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("Overall");
        }
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

/// A piece of data tagged with the group it belongs to
#[derive(Debug, Clone)]
pub struct GroupedDataEntry<T> {
    /// Group the data belongs to
    pub key: GroupKey,
    /// The data
    pub data: T,
}

impl<T> GroupedDataEntry<T> {
    /// Create a new entry
    pub fn new(key: GroupKey, data: T) -> Self {
        Self { key, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_type_tag_equality_ignores_supertypes() {
        let named = TypeTag::new("Named");
        let a = TypeTag::with_supertypes("Race", [named]);
        let b = TypeTag::new("Race");
        assert_eq!(a, b);
    }

    #[test]
    fn test_type_tag_assignability() {
        let named = TypeTag::new("Named");
        let race = TypeTag::with_supertypes("Race", [named.clone()]);
        let competitor = TypeTag::new("Competitor");

        assert!(race.is_assignable_to(&race));
        assert!(race.is_assignable_to(&named));
        assert!(race.is_assignable_to(&TypeTag::any()));
        assert!(!named.is_assignable_to(&race));
        assert!(!competitor.is_assignable_to(&named));
    }

    #[test]
    fn test_value_hash_and_eq() {
        let mut set = HashSet::new();
        set.insert(Value::Float(1.5));
        set.insert(Value::Float(1.5));
        set.insert(Value::Int(1));
        set.insert(Value::from("Laser"));
        assert_eq!(set.len(), 3);
        // Int and Float are distinct values even when numerically equal
        assert_ne!(Value::Int(3), Value::Float(3.0));
    }

    #[test]
    fn test_value_magnitude_comparison() {
        assert_eq!(
            Value::Int(3).compare_magnitude(&Value::Float(3.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Float(2.5).compare_magnitude(&Value::Int(3)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare_magnitude(&Value::Int(1)), None);
    }

    #[test]
    fn test_element_downcast() {
        let element = Element::new(TypeTag::new("Boat"), String::from("GER 1"));
        assert_eq!(element.downcast_ref::<String>().map(String::as_str), Some("GER 1"));
        assert!(element.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_group_key_display() {
        assert_eq!(GroupKey::overall().to_string(), "Overall");
        let key = GroupKey::compound(vec![Value::from("Kiel Week"), Value::Int(2024)]);
        assert_eq!(key.to_string(), "Kiel Week | 2024");
    }
}

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A node of a document tree.
///
/// Both the attach-time snapshot and the current state of a tracked entity
/// are converted into this representation before diffing.
#[derive(Debug, Clone)]
pub enum DocValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Array(Vec<DocValue>),
    Document(Document),
}

/// Storage width of an integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerWidth {
    Bits32,
    Bits64,
}

impl DocValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "bool",
            Self::Int32(_) => "int",
            Self::Int64(_) => "long",
            Self::Double(_) => "double",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Document(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_) | Self::Int64(_) | Self::Double(_) | Self::Decimal(_)
        )
    }

    pub fn is_integer(&self) -> bool {
        self.integer_width().is_some()
    }

    pub fn integer_width(&self) -> Option<IntegerWidth> {
        match self {
            Self::Int32(_) => Some(IntegerWidth::Bits32),
            Self::Int64(_) => Some(IntegerWidth::Bits64),
            _ => None,
        }
    }

    /// Integer payload widened to 64 bits. Doubles and decimals are not
    /// coerced.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(f64::from(*i)),
            Self::Int64(i) => Some(*i as f64),
            Self::Double(f) => Some(*f),
            Self::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int32(i) => Some(Decimal::from(*i)),
            Self::Int64(i) => Some(Decimal::from(*i)),
            Self::Double(f) => Decimal::from_f64(*f),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<DocValue>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<DocValue>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Equality as evaluated by a destination equality filter: numbers
    /// compare by value regardless of storage type.
    pub fn filter_eq(&self, other: &DocValue) -> bool {
        match (self, other) {
            (a, b) if a.is_integer() && b.is_integer() => a.as_i64() == b.as_i64(),
            (Self::Decimal(_), b) | (b, Self::Decimal(_)) if b.is_numeric() => {
                self.as_decimal() == other.as_decimal()
            }
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            _ => self == other,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Boolean(b) => Json::Bool(*b),
            Self::Int32(i) => Json::from(*i),
            Self::Int64(i) => Json::from(*i),
            Self::Double(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or_else(|| Json::String(f.to_string())),
            Self::Decimal(d) => Json::String(d.to_string()),
            Self::String(s) => Json::String(s.clone()),
            Self::Array(items) => Json::Array(items.iter().map(DocValue::to_json).collect()),
            Self::Document(doc) => Json::Object(
                doc.iter()
                    .map(|(key, value)| (key.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn doubles_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn double_hash_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0.0f64.to_bits()
    } else {
        f.to_bits()
    }
}

impl PartialEq for DocValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => doubles_equal(*a, *b),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Document(a), Self::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DocValue {}

impl Hash for DocValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int32(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Int64(i) => {
                3u8.hash(state);
                i.hash(state);
            }
            Self::Double(f) => {
                4u8.hash(state);
                double_hash_bits(*f).hash(state);
            }
            Self::Decimal(d) => {
                5u8.hash(state);
                d.normalize().hash(state);
            }
            Self::String(s) => {
                6u8.hash(state);
                s.hash(state);
            }
            Self::Array(items) => {
                7u8.hash(state);
                items.hash(state);
            }
            Self::Document(doc) => {
                8u8.hash(state);
                doc.hash(state);
            }
        }
    }
}

impl fmt::Display for DocValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{}\"", s),
            Self::Decimal(d) => write!(f, "{}", d),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for DocValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for DocValue {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<i64> for DocValue {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for DocValue {
    fn from(f: f64) -> Self {
        Self::Double(f)
    }
}

impl From<Decimal> for DocValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<String> for DocValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for DocValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Uuid> for DocValue {
    fn from(id: Uuid) -> Self {
        Self::String(id.to_string())
    }
}

impl From<Document> for DocValue {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl<T: Into<DocValue>> From<Vec<T>> for DocValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<DocValue>> From<Option<T>> for DocValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for DocValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Boolean(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map_or(Self::Int64(i), Self::Int32)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(DocValue::from).collect()),
            Json::Object(map) => Self::Document(
                map.into_iter()
                    .map(|(key, value)| (key, DocValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&DocValue> for serde_json::Value {
    fn from(value: &DocValue) -> Self {
        value.to_json()
    }
}

/// Insertion-ordered mapping of field name to value.
///
/// Field order is preserved for output but ignored by equality.
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: IndexMap<String, DocValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut DocValue> {
        self.fields.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Inserts or overwrites a field. Overwriting keeps the field position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DocValue>) -> Option<DocValue> {
        self.fields.insert(key.into(), value.into())
    }

    /// Inserts a field at the front, moving it there if it already exists.
    pub fn insert_first(&mut self, key: impl Into<String>, value: impl Into<DocValue>) {
        self.fields.shift_insert(0, key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<DocValue> {
        self.fields.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Looks up a dotted path such as `stats.level`.
    pub fn get_path(&self, path: &str) -> Option<&DocValue> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.as_document()?.get(segment)?;
        }
        Some(current)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .all(|(key, value)| other.fields.get(key) == Some(value))
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        keys.len().hash(state);
        for key in keys {
            key.hash(state);
            self.fields[key].hash(state);
        }
    }
}

impl<K: Into<String>, V: Into<DocValue>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, DocValue);
    type IntoIter = indexmap::map::IntoIter<String, DocValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DocValue::Document(self.clone()).to_json())
    }
}

/// Builds a [`Document`] from `key => value` pairs.
///
/// ```
/// use doctrack::doc;
///
/// let player = doc! { "_id" => "p1", "level" => 3, "items" => vec!["sword"] };
/// assert_eq!(player.len(), 3);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::Document::new();
        $(document.insert($key, $value);)+
        document
    }};
}

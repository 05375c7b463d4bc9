// ============================================================================
// Entity Serializer
// ============================================================================
//
// Converts any `serde::Serialize` entity into a `DocValue` tree. Integer
// widths are preserved (i32 stays Int32, i64 stays Int64) so that the diff
// engine can emit width-correct increments.
//
// ============================================================================

use super::{DocValue, Document, Result, TrackError};
use serde::ser::{self, Serialize};
use std::fmt;

/// Serializes an entity into its document-tree form.
///
/// Fails when the entity does not serialize to a map-like value.
pub fn to_document<T: Serialize + ?Sized>(entity: &T) -> Result<Document> {
    match to_doc_value(entity)? {
        DocValue::Document(doc) => Ok(doc),
        other => Err(TrackError::Serialization(format!(
            "expected a document at the top level, found {}",
            other.type_name()
        ))),
    }
}

/// Serializes any value into a `DocValue`.
pub fn to_doc_value<T: Serialize + ?Sized>(value: &T) -> Result<DocValue> {
    value
        .serialize(ValueSerializer)
        .map_err(|err| TrackError::Serialization(err.0))
}

#[derive(Debug)]
pub struct SerializeError(String);

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SerializeError {}

impl ser::Error for SerializeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

type SerResult<T> = std::result::Result<T, SerializeError>;

struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = VariantSeqSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = VariantMapSerializer;

    fn serialize_bool(self, v: bool) -> SerResult<DocValue> {
        Ok(DocValue::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> SerResult<DocValue> {
        Ok(DocValue::Int32(i32::from(v)))
    }

    fn serialize_i16(self, v: i16) -> SerResult<DocValue> {
        Ok(DocValue::Int32(i32::from(v)))
    }

    fn serialize_i32(self, v: i32) -> SerResult<DocValue> {
        Ok(DocValue::Int32(v))
    }

    fn serialize_i64(self, v: i64) -> SerResult<DocValue> {
        Ok(DocValue::Int64(v))
    }

    fn serialize_u8(self, v: u8) -> SerResult<DocValue> {
        Ok(DocValue::Int32(i32::from(v)))
    }

    fn serialize_u16(self, v: u16) -> SerResult<DocValue> {
        Ok(DocValue::Int32(i32::from(v)))
    }

    fn serialize_u32(self, v: u32) -> SerResult<DocValue> {
        Ok(DocValue::Int64(i64::from(v)))
    }

    fn serialize_u64(self, v: u64) -> SerResult<DocValue> {
        i64::try_from(v)
            .map(DocValue::Int64)
            .map_err(|_| SerializeError(format!("u64 value {v} does not fit in a signed 64-bit field")))
    }

    fn serialize_f32(self, v: f32) -> SerResult<DocValue> {
        Ok(DocValue::Double(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> SerResult<DocValue> {
        Ok(DocValue::Double(v))
    }

    fn serialize_char(self, v: char) -> SerResult<DocValue> {
        Ok(DocValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> SerResult<DocValue> {
        Ok(DocValue::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> SerResult<DocValue> {
        Ok(DocValue::Array(
            v.iter().map(|byte| DocValue::Int32(i32::from(*byte))).collect(),
        ))
    }

    fn serialize_none(self) -> SerResult<DocValue> {
        Ok(DocValue::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> SerResult<DocValue> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> SerResult<DocValue> {
        Ok(DocValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> SerResult<DocValue> {
        Ok(DocValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> SerResult<DocValue> {
        Ok(DocValue::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> SerResult<DocValue> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> SerResult<DocValue> {
        let mut doc = Document::new();
        doc.insert(variant, value.serialize(ValueSerializer)?);
        Ok(DocValue::Document(doc))
    }

    fn serialize_seq(self, len: Option<usize>) -> SerResult<SeqSerializer> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> SerResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> SerResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> SerResult<VariantSeqSerializer> {
        Ok(VariantSeqSerializer {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> SerResult<MapSerializer> {
        Ok(MapSerializer {
            doc: Document::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> SerResult<MapSerializer> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> SerResult<VariantMapSerializer> {
        Ok(VariantMapSerializer {
            variant,
            doc: Document::new(),
        })
    }
}

struct SeqSerializer {
    items: Vec<DocValue>,
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> SerResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<DocValue> {
        Ok(DocValue::Array(self.items))
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<DocValue> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<DocValue> {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqSerializer {
    variant: &'static str,
    items: Vec<DocValue>,
}

impl ser::SerializeTupleVariant for VariantSeqSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> SerResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<DocValue> {
        let mut doc = Document::new();
        doc.insert(self.variant, DocValue::Array(self.items));
        Ok(DocValue::Document(doc))
    }
}

struct MapSerializer {
    doc: Document,
    pending_key: Option<String>,
}

fn map_key(value: DocValue) -> SerResult<String> {
    match value {
        DocValue::String(s) => Ok(s),
        DocValue::Boolean(b) => Ok(b.to_string()),
        DocValue::Int32(i) => Ok(i.to_string()),
        DocValue::Int64(i) => Ok(i.to_string()),
        other => Err(SerializeError(format!(
            "map keys must be strings, found {}",
            other.type_name()
        ))),
    }
}

impl ser::SerializeMap for MapSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> SerResult<()> {
        self.pending_key = Some(map_key(key.serialize(ValueSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> SerResult<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| SerializeError("map value serialized before its key".into()))?;
        self.doc.insert(key, value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<DocValue> {
        Ok(DocValue::Document(self.doc))
    }
}

impl ser::SerializeStruct for MapSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.doc.insert(key, value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<DocValue> {
        Ok(DocValue::Document(self.doc))
    }
}

struct VariantMapSerializer {
    variant: &'static str,
    doc: Document,
}

impl ser::SerializeStructVariant for VariantMapSerializer {
    type Ok = DocValue;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.doc.insert(key, value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<DocValue> {
        let mut outer = Document::new();
        outer.insert(self.variant, DocValue::Document(self.doc));
        Ok(DocValue::Document(outer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Player {
        #[serde(rename = "_id")]
        id: String,
        version: i64,
        level: i32,
        gold: i64,
        items: Vec<String>,
        nickname: Option<String>,
    }

    #[derive(Serialize)]
    enum Status {
        Active,
        Banned { days: u16 },
    }

    #[test]
    fn test_struct_preserves_integer_width() {
        let player = Player {
            id: "p1".into(),
            version: 0,
            level: 3,
            gold: 100,
            items: vec!["sword".into()],
            nickname: None,
        };
        let doc = to_document(&player).unwrap();

        assert_eq!(doc.get("_id"), Some(&DocValue::String("p1".into())));
        assert_eq!(doc.get("version"), Some(&DocValue::Int64(0)));
        assert_eq!(doc.get("level"), Some(&DocValue::Int32(3)));
        assert_eq!(doc.get("gold"), Some(&DocValue::Int64(100)));
        assert_eq!(doc.get("nickname"), Some(&DocValue::Null));
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["_id", "version", "level", "gold", "items", "nickname"]);
    }

    #[test]
    fn test_enums() {
        assert_eq!(
            to_doc_value(&Status::Active).unwrap(),
            DocValue::String("Active".into())
        );
        let banned = to_doc_value(&Status::Banned { days: 3 }).unwrap();
        assert_eq!(banned.as_document().unwrap().get_path("Banned.days"), Some(&DocValue::Int32(3)));
    }

    #[test]
    fn test_map_keys_must_be_stringish() {
        let mut scores = BTreeMap::new();
        scores.insert(1u8, "one");
        let doc = to_document(&scores).unwrap();
        assert_eq!(doc.get("1"), Some(&DocValue::String("one".into())));
    }

    #[test]
    fn test_top_level_scalar_is_rejected() {
        let err = to_document(&42i32).unwrap_err();
        assert!(matches!(err, TrackError::Serialization(_)));
    }

    #[test]
    fn test_u64_overflow_is_rejected() {
        assert!(to_doc_value(&u64::MAX).is_err());
        assert_eq!(to_doc_value(&7u64).unwrap(), DocValue::Int64(7));
    }
}

//! Engine metadata stored with every version root.

use crate::error::CoreResult;
use crate::schema::SchemaDescriptor;
use crate::types::{CollectionId, ObjectId};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Metadata committed alongside each version's page table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Catalog {
    /// Schema the stored objects follow.
    pub schema: SchemaDescriptor,
    /// Next object id to hand out.
    pub next_object_id: u64,
}

impl Catalog {
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(cellar_codec::to_cbor(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(cellar_codec::from_cbor(bytes)?)
    }
}

/// Body of an object page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ObjectRecord {
    pub collection: CollectionId,
    pub values: Vec<Value>,
}

impl ObjectRecord {
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(cellar_codec::to_cbor(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(cellar_codec::from_cbor(bytes)?)
    }
}

/// Page id of an object page.
pub(crate) fn page_id(id: ObjectId) -> u64 {
    id.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, PropertyDescriptor};

    #[test]
    fn catalog_roundtrip() {
        let catalog = Catalog {
            schema: SchemaDescriptor::new().with_type(
                ObjectSchema::new("Book").property(PropertyDescriptor::string("id").primary_key()),
            ),
            next_object_id: 17,
        };
        let decoded = Catalog::decode(&catalog.encode().unwrap()).unwrap();
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn record_keeps_value_variants() {
        let record = ObjectRecord {
            collection: CollectionId::new(2),
            values: vec![
                Value::Null,
                Value::Bool(false),
                Value::Int(-3),
                Value::String("x".into()),
                Value::Ref(ObjectId::new(8)),
            ],
        };
        assert_eq!(ObjectRecord::decode(&record.encode().unwrap()).unwrap(), record);
    }
}

use crate::StoreError;
use bytes::Bytes;
use models::{RegistryKey, RegistryValue};

/// Bidirectional mapping between typed records and their durable byte form.
pub trait Serializer: Send + Sync + 'static {
    fn serialize_key(&self, key: &RegistryKey) -> Result<Bytes, StoreError>;
    fn serialize_value(&self, value: &RegistryValue) -> Result<Bytes, StoreError>;
    fn deserialize_key(&self, bytes: &[u8]) -> Result<RegistryKey, StoreError>;
    fn deserialize_value(&self, bytes: &[u8]) -> Result<RegistryValue, StoreError>;
}

/// The default wire form: JSON objects with a `keytype` discriminator.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize_key(&self, key: &RegistryKey) -> Result<Bytes, StoreError> {
        Ok(Bytes::from(serde_json::to_vec(key)?))
    }

    fn serialize_value(&self, value: &RegistryValue) -> Result<Bytes, StoreError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize_key(&self, bytes: &[u8]) -> Result<RegistryKey, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<RegistryValue, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

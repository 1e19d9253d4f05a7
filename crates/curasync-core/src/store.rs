//! Storage abstractions: object storage, parameter store and secrets store.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Reference to a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
}

impl StoredObject {
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any object with the same key.
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<StoredObject>;
}

/// Trait for key-path-addressed configuration services.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Get the raw value of a parameter.
    async fn get_parameter(&self, name: &str) -> Result<String>;

    /// Get a parameter whose value is a JSON object.
    async fn get_parameter_json(&self, name: &str) -> Result<Map<String, Value>> {
        let raw = self.get_parameter(name).await?;
        parse_json_object(&raw, name)
    }
}

/// Trait for key-path-addressed credential services.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get the secret string stored under `secret_id`.
    async fn get_secret(&self, secret_id: &str) -> Result<String>;

    /// Get a secret whose value is a JSON object.
    async fn get_secret_json(&self, secret_id: &str) -> Result<Map<String, Value>> {
        let raw = self.get_secret(secret_id).await?;
        parse_json_object(&raw, secret_id)
    }
}

/// Parse a stored value as a JSON object.
pub fn parse_json_object(raw: &str, source: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::InvalidInput(format!(
            "value of '{}' is not a JSON object",
            source
        ))),
        Err(e) => Err(Error::InvalidInput(format!(
            "value of '{}' is not valid JSON: {}",
            source, e
        ))),
    }
}

/// Read a required string field from a stored JSON object.
pub fn required_str<'a>(map: &'a Map<String, Value>, key: &str, source: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::NotFound(format!("'{}' in '{}'", key, source)))
}

/// In-memory stores, used for dry runs in tests and local development.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MemoryObjectStore {
        objects: Mutex<Vec<(String, String, Bytes)>>,
    }

    impl MemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// All stored `(bucket, key, body)` triples in write order.
        pub fn objects(&self) -> Vec<(String, String, Bytes)> {
            self.objects.lock().map(|o| o.clone()).unwrap_or_default()
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects().into_iter().map(|(_, key, _)| key).collect()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<StoredObject> {
            let size = body.len() as u64;
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| Error::Internal("object store lock poisoned".to_string()))?;
            objects.retain(|(b, k, _)| !(b == bucket && k == key));
            objects.push((bucket.to_string(), key.to_string(), body));
            Ok(StoredObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size,
                e_tag: None,
            })
        }
    }

    /// A parameter and secret store backed by a map.
    #[derive(Debug, Default, Clone)]
    pub struct MemoryKeyStore {
        values: HashMap<String, String>,
    }

    impl MemoryKeyStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
            self.values.insert(name.into(), value.into());
            self
        }

        fn lookup(&self, name: &str) -> Result<String> {
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))
        }
    }

    #[async_trait]
    impl ParameterStore for MemoryKeyStore {
        async fn get_parameter(&self, name: &str) -> Result<String> {
            self.lookup(name)
        }
    }

    #[async_trait]
    impl SecretStore for MemoryKeyStore {
        async fn get_secret(&self, secret_id: &str) -> Result<String> {
            self.lookup(secret_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryKeyStore, MemoryObjectStore};
    use super::*;

    #[tokio::test]
    async fn test_parameter_json() {
        let store = MemoryKeyStore::new().with(
            "/curation/endpoints",
            r#"{"codeocean_domain": "https://codeocean.example.org"}"#,
        );
        let params = store.get_parameter_json("/curation/endpoints").await.unwrap();
        assert_eq!(
            required_str(&params, "codeocean_domain", "/curation/endpoints").unwrap(),
            "https://codeocean.example.org"
        );
    }

    #[tokio::test]
    async fn test_secret_not_json() {
        let store = MemoryKeyStore::new().with("curation/token", "plain-text");
        let err = store.get_secret_json("curation/token").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let store = MemoryKeyStore::new();
        let err = store.get_parameter("/missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_required_str_rejects_empty() {
        let map = parse_json_object(r#"{"codeocean_api_token": ""}"#, "secret").unwrap();
        assert!(required_str(&map, "codeocean_api_token", "secret").is_err());
    }

    #[tokio::test]
    async fn test_memory_object_store_overwrites() {
        let store = MemoryObjectStore::new();
        store.put("bucket", "a/b.json", Bytes::from_static(b"1")).await.unwrap();
        let stored = store.put("bucket", "a/b.json", Bytes::from_static(b"22")).await.unwrap();
        assert_eq!(stored.size, 2);
        assert_eq!(stored.uri(), "s3://bucket/a/b.json");
        assert_eq!(store.keys(), vec!["a/b.json"]);
    }
}

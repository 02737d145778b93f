//! CacheClient - Cache port 上の型付き読み書き
//!
//! 値は JSON 文字列として保存します。`get_dynamic` は型を知らずに読む
//! 経路で、文字列が JSON オブジェクト/配列に見えれば復元し、そうでなければ
//! 文字列のまま返します。キーが hash なら各フィールドに同じ復元を施した
//! オブジェクトを返します。

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::ports::{Cache, CacheError};

#[derive(Clone)]
pub struct CacheClient {
    cache: Arc<dyn Cache>,
}

impl CacheClient {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub fn inner(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub async fn cache_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let encoded = encode(value)?;
        self.cache.set(key, &encoded).await
    }

    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.cache
            .get(key)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    pub async fn cache_hash_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let encoded = encode(value)?;
        self.cache.hash_set(key, field, &encoded).await
    }

    pub async fn get_hash_value<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<T>, CacheError> {
        self.cache
            .hash_get(key, field)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Read without knowing the stored type.
    pub async fn get_dynamic(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match self.cache.get(key).await {
            Ok(raw) => Ok(raw.map(reconstruct)),
            Err(CacheError::WrongType(_)) => {
                let fields = self.cache.hash_get_all(key).await?;
                let object: Map<String, Value> = fields
                    .into_iter()
                    .map(|(field, raw)| (field, reconstruct(raw)))
                    .collect();
                Ok(Some(Value::Object(object)))
            }
            Err(e) => Err(e),
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|e| CacheError::Encoding(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|e| CacheError::Encoding(e.to_string()))
}

/// `{...}` / `[...]` は JSON として復元を試み、失敗したら文字列のまま
fn reconstruct(raw: String) -> Value {
    let looks_structured = (raw.starts_with('{') && raw.ends_with('}'))
        || (raw.starts_with('[') && raw.ends_with(']'));
    if looks_structured && let Ok(value) = serde_json::from_str::<Value>(&raw) {
        return value;
    }
    Value::String(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryCache;
    use rstest::{fixture, rstest};
    use serde::Deserialize;
    use serde_json::json;

    #[fixture]
    fn client() -> CacheClient {
        CacheClient::new(Arc::new(InMemoryCache::new()))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[rstest]
    #[tokio::test]
    async fn typed_value_roundtrip(client: CacheClient) {
        client.cache_value("p", &Point { x: 1, y: 2 }).await.unwrap();
        let p: Option<Point> = client.get_value("p").await.unwrap();
        assert_eq!(p, Some(Point { x: 1, y: 2 }));

        let missing: Option<Point> = client.get_value("q").await.unwrap();
        assert!(missing.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn decoding_the_wrong_type_is_an_encoding_error(client: CacheClient) {
        client.cache_value("s", "text").await.unwrap();
        let err = client.get_value::<Point>("s").await.unwrap_err();
        assert!(matches!(err, CacheError::Encoding(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn hash_value_roundtrip(client: CacheClient) {
        client.cache_hash_value("h", "a", &vec![1, 2, 3]).await.unwrap();
        let v: Option<Vec<i32>> = client.get_hash_value("h", "a").await.unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[rstest]
    #[case::object("{\"a\": 1}", json!({ "a": 1 }))]
    #[case::list("[1, 2]", json!([1, 2]))]
    #[case::broken_braces("{not json}", json!("{not json}"))]
    #[case::plain("plain", json!("plain"))]
    #[case::number_stays_text("42", json!("42"))]
    #[tokio::test]
    async fn dynamic_read_reconstructs_structures(
        client: CacheClient,
        #[case] raw: &str,
        #[case] expected: Value,
    ) {
        client.inner().set("k", raw).await.unwrap();
        assert_eq!(client.get_dynamic("k").await.unwrap(), Some(expected));
    }

    #[rstest]
    #[tokio::test]
    async fn dynamic_read_of_hash_returns_object(client: CacheClient) {
        client.inner().hash_set("h", "list", "[1]").await.unwrap();
        client.inner().hash_set("h", "name", "add").await.unwrap();

        let v = client.get_dynamic("h").await.unwrap().unwrap();
        assert_eq!(v, json!({ "list": [1], "name": "add" }));
        assert_eq!(client.get_dynamic("nothing").await.unwrap(), None);
    }
}

//! HTTP client wrapper for interacting with Qdrant.

use crate::config::get_config;
use crate::qdrant::types::{
    PointInsert, QdrantError, QueryResponse, QueryResponseResult, ScoredPoint,
};
use reqwest::{Client, Method};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client against an explicit base URL and optional API key.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("docrag/qdrant")
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().map(|value| !value.is_empty()).unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Construct a client using configuration derived from the environment.
    pub fn from_config() -> Result<Self, QdrantError> {
        let config = get_config();
        Self::new(&config.qdrant_url, config.qdrant_api_key.clone())
    }

    /// Create a collection with the specified vector size and cosine distance.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, vector_size, "Collection created");
        })
        .await
    }

    /// Delete a collection and every vector it holds.
    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), QdrantError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{collection_name}"))?
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection deleted");
        })
        .await
    }

    /// Upload points with explicit ids and payloads to the given collection.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<PointInsert>,
    ) -> Result<(), QdrantError> {
        if points.is_empty() {
            return Ok(());
        }

        let point_count = points.len();
        let serialized: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await
    }

    /// Perform a similarity search against a collection, returning scored payloads.
    pub async fn search_points(
        &self,
        collection_name: &str,
        vector: Vec<f32>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });
        let obj = body
            .as_object_mut()
            .expect("query body should remain an object");

        if let Some(threshold) = score_threshold {
            obj.insert("score_threshold".into(), Value::from(threshold));
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points, .. } => points,
        };
        let results = points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect();

        Ok(results)
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::DELETE, Method::POST, Method::PUT, MockServer};
    use reqwest::Client;

    fn service(server: &MockServer) -> QdrantService {
        QdrantService {
            client: Client::builder()
                .user_agent("docrag-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn search_points_emits_expected_request() {
        let server = MockServer::start_async().await;

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/doc-1/points/query");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": [
                        {
                            "id": "0c3ad2d1-2b31-4b7a-9c5d-111111111111",
                            "score": 0.42,
                            "payload": {
                                "content_type": "text",
                                "seq": 0
                            }
                        }
                    ]
                }));
            })
            .await;

        let results = service(&server)
            .search_points("doc-1", vec![0.1, 0.2], 3, Some(0.25))
            .await
            .expect("search request");

        mock.assert();

        assert_eq!(results.len(), 1);
        let hit = &results[0];
        assert_eq!(hit.id, "0c3ad2d1-2b31-4b7a-9c5d-111111111111");
        assert!((hit.score - 0.42).abs() < f32::EPSILON);
        let payload = hit.payload.as_ref().expect("payload");
        assert_eq!(payload["content_type"], Value::String("text".into()));
    }

    #[tokio::test]
    async fn upsert_points_round_trips() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/doc-1/points")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        service(&server)
            .upsert_points(
                "doc-1",
                vec![PointInsert {
                    id: "key-1".into(),
                    vector: vec![0.5, 0.5],
                    payload: json!({ "content_type": "table", "seq": 1 }),
                }],
            )
            .await
            .expect("upsert");

        mock.assert();
    }

    #[tokio::test]
    async fn delete_collection_surfaces_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/doc-1");
                then.status(500).body("broken");
            })
            .await;

        let error = service(&server)
            .delete_collection("doc-1")
            .await
            .expect_err("error");
        assert!(matches!(error, QdrantError::UnexpectedStatus { .. }));
    }
}

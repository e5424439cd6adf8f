//! Schema registry client.
//!
//! [`RegistryClient`] resolves schema ids through the registry REST API
//! (`GET /schemas/ids/{id}`). Wrap it in [`CachedSchemaLookup`] to
//! memoize results.

mod cache;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use bridge_api::{BridgeError, SchemaDefinition, SchemaId, SchemaLookup};

pub use cache::CachedSchemaLookup;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct SchemaByIdResponse {
    schema: String,
    #[serde(default = "default_schema_type", rename = "schemaType")]
    schema_type: String,
}

fn default_schema_type() -> String {
    "AVRO".to_string()
}

/// Async client for the schema registry REST API.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// Build a client for `base_url` (e.g. `http://localhost:8081`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::connect(base_url, format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_schema(&self, id: SchemaId) -> Result<SchemaDefinition, BridgeError> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("GET {url}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BridgeError::NotFound(id));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Transport(format!("GET {url}: {status} {text}")));
        }

        let body: SchemaByIdResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::Transport(format!("GET {url}: invalid response: {e}")))?;

        if !body.schema_type.eq_ignore_ascii_case("AVRO") {
            return Err(BridgeError::Transport(format!(
                "schema {id}: unsupported schema type '{}'",
                body.schema_type
            )));
        }

        tracing::debug!(schema_id = %id, "fetched schema");
        Ok(SchemaDefinition::new(id, body.schema))
    }
}

impl SchemaLookup for RegistryClient {
    fn fetch(
        &self,
        id: SchemaId,
    ) -> Pin<Box<dyn Future<Output = Result<SchemaDefinition, BridgeError>> + Send + '_>> {
        Box::pin(self.get_schema(id))
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

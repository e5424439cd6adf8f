use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use bridge_api::{BridgeError, SchemaDefinition, SchemaId, SchemaLookup};

/// Memoizing decorator over a [`SchemaLookup`].
///
/// A schema body never changes for a given id, so successful lookups
/// are kept forever. Failures are not cached.
pub struct CachedSchemaLookup<L> {
    inner: L,
    cache: RwLock<HashMap<SchemaId, SchemaDefinition>>,
}

impl<L: SchemaLookup> CachedSchemaLookup<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl<L: SchemaLookup> SchemaLookup for CachedSchemaLookup<L> {
    fn fetch(
        &self,
        id: SchemaId,
    ) -> Pin<Box<dyn Future<Output = Result<SchemaDefinition, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if let Some(hit) = self.cache.read().await.get(&id) {
                return Ok(hit.clone());
            }

            let schema = self.inner.fetch(id).await?;
            self.cache.write().await.insert(id, schema.clone());
            tracing::debug!(schema_id = %id, "cached schema");
            Ok(schema)
        })
    }
}

//! Storage-backed memoisation of collaborator resolutions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use skillsmith_merge::{
    CollaboratorError, ReasoningCollaborator, ResolutionRequest, ResolutionResponse,
};
use skillsmith_storage::Storage;

use crate::assembler::sha256_hex;

/// Wraps a collaborator and answers repeated requests from storage.
///
/// Only successful responses are cached; errors always reach the inner
/// collaborator again on the next run. Storage failures degrade to a cache
/// miss.
pub struct CachedCollaborator {
    inner: Arc<dyn ReasoningCollaborator>,
    storage: Arc<Storage>,
    model: String,
}

impl CachedCollaborator {
    pub fn new(
        inner: Arc<dyn ReasoningCollaborator>,
        storage: Arc<Storage>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            storage,
            model: model.into(),
        }
    }
}

/// Cache key: SHA-256 of the request's canonical JSON.
pub fn request_hash(request: &ResolutionRequest) -> Result<String, CollaboratorError> {
    let json = serde_json::to_string(request)
        .map_err(|e| CollaboratorError::Malformed(format!("failed to serialize request: {e}")))?;
    Ok(sha256_hex(json.as_bytes()))
}

#[async_trait]
impl ReasoningCollaborator for CachedCollaborator {
    async fn resolve(
        &self,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResponse, CollaboratorError> {
        let hash = request_hash(request)?;

        match self.storage.get_resolution(&hash, &self.model).await {
            Ok(Some(json)) => match serde_json::from_str::<ResolutionResponse>(&json) {
                Ok(response) => {
                    debug!(identifier = %request.identifier, "resolution cache hit");
                    return Ok(response);
                }
                Err(e) => warn!(identifier = %request.identifier, error = %e, "ignoring corrupt cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "resolution cache unavailable"),
        }

        let response = self.inner.resolve(request).await?;

        match serde_json::to_string(&response) {
            Ok(json) => {
                if let Err(e) = self
                    .storage
                    .set_resolution(&request.identifier, &hash, &self.model, &json)
                    .await
                {
                    warn!(error = %e, "failed to cache resolution");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize resolution"),
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use skillsmith_shared::ConflictKind;
    use uuid::Uuid;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ReasoningCollaborator for Counting {
        async fn resolve(
            &self,
            _request: &ResolutionRequest,
        ) -> Result<ResolutionResponse, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollaboratorError::Transient("busy".into()));
            }
            Ok(ResolutionResponse {
                resolved_description: Some("Rotate the node.".into()),
                resolved_signature: None,
                confidence: 0.9,
            })
        }
    }

    fn request(identifier: &str) -> ResolutionRequest {
        ResolutionRequest {
            identifier: identifier.into(),
            kind: ConflictKind::DescriptionMismatch,
            conflicting_descriptions: vec!["Rotate.".into(), "Spin.".into()],
            conflicting_signatures: Vec::new(),
        }
    }

    async fn storage() -> Arc<Storage> {
        let path = std::env::temp_dir().join(format!("skillsmith_cache_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&path).await.expect("open db"))
    }

    #[tokio::test]
    async fn second_request_is_served_from_storage() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedCollaborator::new(inner.clone(), storage().await, "m1");

        let first = cached.resolve(&request("rotate")).await.expect("first");
        let second = cached.resolve(&request("rotate")).await.expect("second");
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.resolve(&request("scale")).await.expect("other");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn model_is_part_of_the_key() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let storage = storage().await;
        let a = CachedCollaborator::new(inner.clone(), storage.clone(), "m1");
        let b = CachedCollaborator::new(inner.clone(), storage, "m2");

        a.resolve(&request("rotate")).await.expect("a");
        b.resolve(&request("rotate")).await.expect("b");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cached = CachedCollaborator::new(inner.clone(), storage().await, "m1");

        assert!(cached.resolve(&request("rotate")).await.is_err());
        assert!(cached.resolve(&request("rotate")).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = request_hash(&request("rotate")).expect("hash");
        assert_eq!(a, request_hash(&request("rotate")).expect("hash"));
        assert_ne!(a, request_hash(&request("scale")).expect("hash"));
        assert_eq!(a.len(), 64);
    }
}

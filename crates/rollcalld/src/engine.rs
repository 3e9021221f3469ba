use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{
    Candidate, Comparison, DimensionMismatch, Embedding, EnrollError, FaceMatcher, GalleryError,
    IdentifyError, IdentitySummary, IdentityId, MatchResult, ReferenceEntry, Status, VerifyError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Identify(#[from] IdentifyError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine task failed: {0}")]
    TaskFailed(String),
}

/// Clone-safe handle to the matcher.
///
/// Every request runs on tokio's blocking pool so gallery scans never stall
/// the D-Bus executor. Reads are bounded by `timeout`; writes always run to
/// completion so a reported timeout never hides a persisted change.
#[derive(Clone)]
pub struct EngineHandle {
    matcher: Arc<FaceMatcher>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn new(matcher: FaceMatcher, timeout: Duration) -> Self {
        Self {
            matcher: Arc::new(matcher),
            timeout,
        }
    }

    async fn run<T, E, F>(&self, op: &'static str, bounded: bool, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&FaceMatcher) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<EngineError> + Send + 'static,
    {
        let matcher = Arc::clone(&self.matcher);
        let task = tokio::task::spawn_blocking(move || f(matcher.as_ref()));

        let joined = if bounded {
            match tokio::time::timeout(self.timeout, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(op, timeout = ?self.timeout, "request timed out");
                    return Err(EngineError::Timeout(self.timeout));
                }
            }
        } else {
            task.await
        };

        match joined {
            Ok(result) => result.map_err(Into::into),
            Err(e) => {
                tracing::error!(op, error = %e, "engine task panicked or was cancelled");
                Err(EngineError::TaskFailed(e.to_string()))
            }
        }
    }

    pub async fn enroll(
        &self,
        identity_id: IdentityId,
        embedding: Embedding,
    ) -> Result<ReferenceEntry, EngineError> {
        self.run("enroll", false, move |m| m.enroll(identity_id, embedding))
            .await
    }

    pub async fn revoke(&self, identity_id: IdentityId) -> Result<bool, EngineError> {
        self.run("revoke", false, move |m| m.revoke(&identity_id)).await
    }

    pub async fn verify(
        &self,
        probe: Embedding,
        identity_id: IdentityId,
    ) -> Result<MatchResult, EngineError> {
        self.run("verify", true, move |m| m.verify(&probe, &identity_id))
            .await
    }

    pub async fn identify(&self, probe: Embedding) -> Result<MatchResult, EngineError> {
        self.run("identify", true, move |m| m.identify(&probe)).await
    }

    pub async fn rank(&self, probe: Embedding, k: usize) -> Result<Vec<Candidate>, EngineError> {
        self.run("rank", true, move |m| m.rank(&probe, k)).await
    }

    pub fn compare(&self, a: &Embedding, b: &Embedding) -> Result<Comparison, EngineError> {
        Ok(self.matcher.compare(a, b)?)
    }

    pub fn status(&self) -> Result<Status, EngineError> {
        Ok(self.matcher.status()?)
    }

    pub async fn identities(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.run("identities", true, |m| m.identities()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{DecisionPolicy, MemoryStore, Metric};

    fn handle() -> EngineHandle {
        let (matcher, _) = FaceMatcher::open(
            DecisionPolicy::new(Metric::Cosine, 0.9),
            None,
            Box::new(MemoryStore::new()),
        )
        .unwrap();
        EngineHandle::new(matcher, Duration::from_secs(5))
    }

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_identify() {
        let engine = handle();
        engine.enroll(id("A"), emb(&[1.0, 0.0])).await.unwrap();
        engine.enroll(id("B"), emb(&[0.0, 1.0])).await.unwrap();

        let result = engine.identify(emb(&[1.0, 0.0])).await.unwrap();
        assert!(result.matched);
        assert_eq!(result.identity_id, Some(id("A")));

        let result = engine.verify(emb(&[1.0, 0.0]), id("B")).await.unwrap();
        assert!(!result.matched);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let engine = handle();
        engine.enroll(id("A"), emb(&[1.0, 0.0])).await.unwrap();

        let err = engine.verify(emb(&[1.0, 0.0]), id("Z")).await.unwrap_err();
        assert!(matches!(err, EngineError::Verify(VerifyError::UnknownIdentity(_))));

        let err = engine.identify(emb(&[1.0])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Identify(IdentifyError::DimensionMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_timed_out_read_releases_gallery() {
        let (matcher, _) = FaceMatcher::open(
            DecisionPolicy::new(Metric::Cosine, 0.9),
            None,
            Box::new(MemoryStore::new()),
        )
        .unwrap();
        let engine = EngineHandle::new(matcher, Duration::from_millis(20));
        engine.enroll(id("A"), emb(&[1.0, 0.0])).await.unwrap();

        // Holds the read guard well past the deadline.
        let err = engine
            .run("slow", true, |m| {
                let snapshot = m.gallery().snapshot()?;
                std::thread::sleep(Duration::from_millis(200));
                Ok::<_, GalleryError>(snapshot.len())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(20)));

        // The write waits for the abandoned reader to finish, then lands.
        engine.enroll(id("B"), emb(&[0.0, 1.0])).await.unwrap();
        let result = engine.identify(emb(&[0.0, 1.0])).await.unwrap();
        assert_eq!(result.identity_id, Some(id("B")));
        assert_eq!(engine.status().unwrap().enrolled, 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_gallery() {
        let engine = handle();
        engine.enroll(id("A"), emb(&[1.0, 0.0])).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.identify(emb(&[1.0, 0.0])).await
            }));
        }
        for task in tasks {
            let result = task.await.unwrap().unwrap();
            assert_eq!(result.identity_id, Some(id("A")));
        }
        assert!(engine.revoke(id("A")).await.unwrap());
        assert_eq!(engine.status().unwrap().enrolled, 0);
    }
}

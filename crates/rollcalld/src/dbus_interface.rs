use rollcall_core::{Embedding, EnrollError, IdentifyError, IdentityId, VerifyError};
use serde::Serialize;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.rollcall.Matcher1";
pub const OBJECT_PATH: &str = "/org/rollcall/Matcher1";

/// D-Bus interface for the rollcall face matching daemon.
///
/// Bus name: org.rollcall.Matcher1
/// Object path: /org/rollcall/Matcher1
///
/// Embeddings travel as `ad` (array of double). Structured results are
/// returned as JSON strings.
///
/// Identities are compared as strings: on equal scores the smaller string
/// wins, so "10" beats "9". Zero-pad numeric ids to get numeric order.
pub struct MatcherService {
    engine: EngineHandle,
    model_name: String,
}

impl MatcherService {
    pub fn new(engine: EngineHandle, model_name: String) -> Self {
        Self { engine, model_name }
    }
}

#[interface(name = "org.rollcall.Matcher1")]
impl MatcherService {
    /// Enroll or replace the reference embedding for an identity.
    /// Returns the enrollment timestamp (RFC 3339).
    async fn enroll(&self, identity: &str, embedding: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::info!(identity, dimension = embedding.len(), "enroll requested");
        let identity_id = parse_identity(identity)?;
        let embedding = parse_embedding(&embedding)?;
        let entry = self
            .engine
            .enroll(identity_id, embedding)
            .await
            .map_err(to_fdo)?;
        Ok(entry.enrolled_at.to_rfc3339())
    }

    /// Remove an identity. Returns false if it was not enrolled.
    async fn revoke(&self, identity: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity, "revoke requested");
        let identity_id = parse_identity(identity)?;
        self.engine.revoke(identity_id).await.map_err(to_fdo)
    }

    /// 1:1 check of a probe against one identity.
    async fn verify(&self, identity: &str, probe: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::debug!(identity, "verify requested");
        let identity_id = parse_identity(identity)?;
        let probe = parse_embedding(&probe)?;
        let result = self
            .engine
            .verify(probe, identity_id)
            .await
            .map_err(to_fdo)?;
        to_json(&result)
    }

    /// 1:N search of a probe across the whole gallery.
    async fn identify(&self, probe: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::debug!("identify requested");
        let probe = parse_embedding(&probe)?;
        let result = self.engine.identify(probe).await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Score two embeddings against the configured metric and threshold.
    async fn compare(&self, a: Vec<f64>, b: Vec<f64>) -> zbus::fdo::Result<String> {
        let a = parse_embedding(&a)?;
        let b = parse_embedding(&b)?;
        let comparison = self.engine.compare(&a, &b).map_err(to_fdo)?;
        to_json(&comparison)
    }

    /// Best `limit` candidates for a probe, best first.
    async fn rank(&self, probe: Vec<f64>, limit: u32) -> zbus::fdo::Result<String> {
        let probe = parse_embedding(&probe)?;
        let candidates = self
            .engine
            .rank(probe, limit as usize)
            .await
            .map_err(to_fdo)?;
        to_json(&candidates)
    }

    /// Enrolled identities with their enrollment timestamps.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.identities().await.map_err(to_fdo)?;
        to_json(&identities)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().map_err(to_fdo)?;
        to_json(&StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            model: &self.model_name,
            status,
        })
    }
}

#[derive(Serialize)]
struct StatusReport<'a> {
    version: &'static str,
    model: &'a str,
    #[serde(flatten)]
    status: rollcall_core::Status,
}

fn parse_identity(identity: &str) -> zbus::fdo::Result<IdentityId> {
    IdentityId::new(identity).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn parse_embedding(values: &[f64]) -> zbus::fdo::Result<Embedding> {
    Embedding::from_f64(values).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Caller mistakes become `InvalidArgs`; everything else is a daemon-side failure.
fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    let message = err.to_string();
    match err {
        EngineError::DimensionMismatch(_)
        | EngineError::Enroll(EnrollError::DimensionMismatch(_))
        | EngineError::Verify(VerifyError::DimensionMismatch(_))
        | EngineError::Verify(VerifyError::UnknownIdentity(_))
        | EngineError::Identify(IdentifyError::DimensionMismatch(_)) => {
            zbus::fdo::Error::InvalidArgs(message)
        }
        EngineError::Timeout(_) => zbus::fdo::Error::TimedOut(message),
        _ => {
            tracing::error!(error = %message, "request failed");
            zbus::fdo::Error::Failed(message)
        }
    }
}

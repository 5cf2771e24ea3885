//! The inference engine seam.
//!
//! The server never looks inside an engine: it hands over the request payload
//! and frames whatever bytes come back.  Any error is terminal for the session
//! that triggered it; the request is not retried.
//!
//! Three stand-in engines ship with the server so it can run without a real
//! model behind it.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

/// Failure reported by an engine.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A model (or stand-in) that turns a request payload into response bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Runs inference on one payload.
    async fn infer(&self, payload: &[u8]) -> Result<Vec<u8>, InferenceError>;
}

/// Returns `response_size` random bytes for every request.
#[derive(Debug, Clone)]
pub struct RandomBytesEngine {
    response_size: usize,
}

impl RandomBytesEngine {
    pub fn new(response_size: usize) -> Self {
        Self { response_size }
    }
}

#[async_trait]
impl InferenceEngine for RandomBytesEngine {
    async fn infer(&self, _payload: &[u8]) -> Result<Vec<u8>, InferenceError> {
        let mut response = vec![0u8; self.response_size];
        rand::thread_rng().fill(&mut response[..]);
        Ok(response)
    }
}

/// Returns the same bytes for every request.
#[derive(Debug, Clone)]
pub struct FixedResponseEngine {
    response: Vec<u8>,
}

impl FixedResponseEngine {
    pub fn new(response: impl Into<Vec<u8>>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for FixedResponseEngine {
    async fn infer(&self, _payload: &[u8]) -> Result<Vec<u8>, InferenceError> {
        Ok(self.response.clone())
    }
}

/// Commands the canned engine picks from.
pub const CANNED_COMMANDS: [&[u8]; 3] = [b"FD005", b"TR030", b"AS000"];

/// Answers every request with one of [`CANNED_COMMANDS`], chosen at random.
#[derive(Debug, Clone, Default)]
pub struct CannedCommandEngine;

#[async_trait]
impl InferenceEngine for CannedCommandEngine {
    async fn infer(&self, _payload: &[u8]) -> Result<Vec<u8>, InferenceError> {
        let command = CANNED_COMMANDS
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| InferenceError::Failed("no canned commands".to_string()))?;
        Ok(command.to_vec())
    }
}

/// Engine selector used by the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Random,
    Fixed,
    Canned,
}

/// Builds the engine named by `kind`.
///
/// `response_size` applies to [`EngineKind::Random`]; `fixed_response` to
/// [`EngineKind::Fixed`].
pub fn build_engine(
    kind: EngineKind,
    response_size: usize,
    fixed_response: &str,
) -> Arc<dyn InferenceEngine> {
    match kind {
        EngineKind::Random => Arc::new(RandomBytesEngine::new(response_size)),
        EngineKind::Fixed => Arc::new(FixedResponseEngine::new(fixed_response.as_bytes())),
        EngineKind::Canned => Arc::new(CannedCommandEngine),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_random_engine_returns_configured_size() {
        let engine = RandomBytesEngine::new(1024);
        let response = engine.infer(&[0u8; 128]).await.unwrap();
        assert_eq!(response.len(), 1024);
    }

    #[tokio::test]
    async fn test_random_engine_output_varies() {
        // Two 64-byte random draws colliding is astronomically unlikely.
        let engine = RandomBytesEngine::new(64);
        let a = engine.infer(b"").await.unwrap();
        let b = engine.infer(b"").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_fixed_engine_ignores_payload() {
        let engine = FixedResponseEngine::new(b"XXXXX".to_vec());
        assert_eq!(engine.infer(b"one").await.unwrap(), b"XXXXX");
        assert_eq!(engine.infer(&[9u8; 500]).await.unwrap(), b"XXXXX");
    }

    #[tokio::test]
    async fn test_canned_engine_answers_with_known_command() {
        let engine = CannedCommandEngine;
        for _ in 0..20 {
            let response = engine.infer(b"payload").await.unwrap();
            assert!(CANNED_COMMANDS.contains(&response.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_build_engine_selects_variant() {
        let fixed = build_engine(EngineKind::Fixed, 10, "ok");
        assert_eq!(fixed.infer(b"").await.unwrap(), b"ok");

        let random = build_engine(EngineKind::Random, 10, "ok");
        assert_eq!(random.infer(b"").await.unwrap().len(), 10);
    }

    #[test]
    fn test_engine_kind_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            engine: EngineKind,
        }
        let parsed: Wrapper = toml::from_str("engine = \"canned\"").unwrap();
        assert_eq!(parsed.engine, EngineKind::Canned);
    }

    #[tokio::test]
    async fn test_mock_engine_failure_surfaces_as_error() {
        let mut engine = MockInferenceEngine::new();
        engine
            .expect_infer()
            .returning(|_| Err(InferenceError::Failed("model crashed".to_string())));

        let err = engine.infer(b"x").await.unwrap_err();

        assert_eq!(err.to_string(), "inference engine failed: model crashed");
    }
}

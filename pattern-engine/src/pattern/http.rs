//! HTTP client for an external pattern classifier service
//!
//! Wire format:
//!
//! ```text
//! POST {base}/predict   {"signals": {"p1": 2, ...}}
//!   → {"success": true, "pattern": "C", "probability": 0.71,
//!      "probabilities": {"A": 0.02, ...}, "confidence": 0.55}
//! GET  {base}/health
//!   → {"status": "healthy", "model_loaded": true}
//! ```

use super::classifier::{PatternClassifier, RawDistribution};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default request timeout for classifier calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a `/predict` request
#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    signals: &'a BTreeMap<String, f64>,
}

/// Body of a `/predict` response
#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub probabilities: Option<RawDistribution>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of a `/health` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
}

/// Classifier backed by a remote model service
pub struct HttpClassifier {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClassifier {
    /// Create a client against `base_url` (e.g. `http://localhost:5001`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::classifier(&base_url, e.to_string()))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the service health endpoint
    pub async fn health(&self) -> EngineResult<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::classifier(&self.base_url, e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| EngineError::classifier(&self.base_url, e.to_string()))
    }

    /// Extract the distribution from a decoded `/predict` body.
    ///
    /// A body that reports failure, or carries no distribution, means the
    /// service is not usable right now.
    pub fn parse_predict(&self, body: PredictResponse) -> EngineResult<RawDistribution> {
        if body.success == Some(false) || body.error.is_some() {
            return Err(EngineError::classifier(
                &self.base_url,
                body.error
                    .unwrap_or_else(|| "service reported failure".to_string()),
            ));
        }
        match body.probabilities {
            Some(probabilities) => Ok(probabilities),
            None => Err(EngineError::classifier(
                &self.base_url,
                "response carries no probabilities",
            )),
        }
    }
}

#[async_trait]
impl PatternClassifier for HttpClassifier {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn classify(&self, features: &BTreeMap<String, f64>) -> EngineResult<RawDistribution> {
        let url = format!("{}/predict", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&PredictRequest { signals: features })
            .send()
            .await
            .map_err(|e| EngineError::classifier(&self.base_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::classifier(
                &self.base_url,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| EngineError::classifier(&self.base_url, e.to_string()))?;
        debug!(
            classifier = %self.base_url,
            pattern = ?body.pattern,
            probability = ?body.probability,
            "Classifier responded"
        );
        self.parse_predict(body)
    }
}

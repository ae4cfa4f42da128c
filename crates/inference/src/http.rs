//! REST clients for the collaborator services.
//!
//! One [`HttpInferenceClient`] talks to every model service through a shared
//! [`reqwest::Client`], so connection pools are reused across the fan-outs.

use async_trait::async_trait;
use fitline_core::quality_gate::GateFlags;
use serde::Deserialize;

use crate::config::InferenceEndpoints;
use crate::error::InferenceError;
use crate::store::HttpImageStore;
use crate::traits::{
    DetectionWorker, GenerationEngine, PromptWriter, QualityEvaluator, SegmentationWorker,
};
use crate::types::{DetectionResult, EvaluationRequest, GenerationCandidate, SegmentationResult};

/// HTTP implementation of the inference collaborators.
#[derive(Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoints: InferenceEndpoints,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    instruction: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    image_ref: String,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    candidates: Vec<GeneratedImage>,
}

impl HttpInferenceClient {
    /// Build a client whose requests time out after the configured bound.
    pub fn new(endpoints: InferenceEndpoints) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.timeout())
            .build()?;
        Ok(Self { client, endpoints })
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, endpoints: InferenceEndpoints) -> Self {
        Self { client, endpoints }
    }

    /// Image store client sharing this client's connection pool.
    pub fn image_store(&self) -> HttpImageStore {
        HttpImageStore::new(self.client.clone(), self.endpoints.image_store_url.clone())
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        body: &impl serde::Serialize,
    ) -> Result<T, InferenceError> {
        let response = self.client.post(url).json(body).send().await?;
        parse_response(response).await
    }
}

#[async_trait]
impl DetectionWorker for HttpInferenceClient {
    async fn detect(&self, image_ref: &str) -> Result<DetectionResult, InferenceError> {
        let result: DetectionResult = self
            .post_json(
                format!("{}/detect", self.endpoints.detection_url),
                &serde_json::json!({ "image_ref": image_ref }),
            )
            .await?;
        result
            .original_dimensions
            .validate()
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        Ok(result)
    }
}

#[async_trait]
impl SegmentationWorker for HttpInferenceClient {
    async fn segment(&self, image_ref: &str) -> Result<SegmentationResult, InferenceError> {
        self.post_json(
            format!("{}/segment", self.endpoints.segmentation_url),
            &serde_json::json!({ "image_ref": image_ref }),
        )
        .await
    }
}

#[async_trait]
impl PromptWriter for HttpInferenceClient {
    async fn write_prompt(&self, context: &serde_json::Value) -> Result<String, InferenceError> {
        let response: PromptResponse = self
            .post_json(
                format!("{}/prompt", self.endpoints.prompt_writer_url),
                &serde_json::json!({ "context": context }),
            )
            .await?;
        if response.instruction.trim().is_empty() {
            return Err(InferenceError::InvalidResponse(
                "prompt writer returned an empty instruction".to_string(),
            ));
        }
        Ok(response.instruction)
    }
}

#[async_trait]
impl GenerationEngine for HttpInferenceClient {
    async fn generate(
        &self,
        context: &serde_json::Value,
        count: usize,
        tier: &str,
    ) -> Result<Vec<GenerationCandidate>, InferenceError> {
        let response: GenerationResponse = self
            .post_json(
                format!("{}/generate", self.endpoints.generation_url),
                &serde_json::json!({ "context": context, "count": count, "tier": tier }),
            )
            .await?;
        if response.candidates.is_empty() {
            return Err(InferenceError::InvalidResponse(format!(
                "engine tier {tier} returned no candidates"
            )));
        }
        if response.candidates.len() != count {
            tracing::warn!(
                tier,
                requested = count,
                returned = response.candidates.len(),
                "Generation engine returned a different candidate count",
            );
        }
        Ok(response
            .candidates
            .into_iter()
            .take(count)
            .enumerate()
            .map(|(index, c)| GenerationCandidate {
                index,
                image_ref: c.image_ref,
                tier: tier.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl QualityEvaluator for HttpInferenceClient {
    async fn evaluate(
        &self,
        reference_ref: &str,
        candidate_refs: &[String],
        flags: GateFlags,
    ) -> Result<String, InferenceError> {
        let body = EvaluationRequest {
            reference_ref,
            candidate_refs: candidate_refs.iter().map(String::as_str).collect(),
            flags,
        };
        let response = self
            .client
            .post(format!("{}/evaluate", self.endpoints.evaluator_url))
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.text().await?)
    }
}

// ---- response helpers ----

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or an [`InferenceError::Api`] with the status and
/// body text on failure.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(InferenceError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, InferenceError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

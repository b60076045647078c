use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{CaptionCache, BASE_SEGMENT};
use crate::imaging;
use crate::model::BaseCaption;
use crate::settings::Settings;

/// Synthetic caption used when the model call itself fails. Captioning must
/// always produce a caption.
pub const FALLBACK_CAPTION: &str = "an interesting scene";
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Caption used when no model is loaded at all.
pub const UNLOADED_CAPTION: &str = "an image that requires AI analysis";
pub const UNLOADED_CONFIDENCE: f64 = 0.1;

/// Confidence assigned when the model returns text but no likelihood signal.
pub const MISSING_SIGNAL_CONFIDENCE: f64 = 0.5;

/// Boilerplate lead-ins stripped from raw model output. Ordered longest
/// first so the longest match wins; applied at most once.
const LEAD_INS: [&str; 6] = [
    "a picture of",
    "an image of",
    "a photo of",
    "there are",
    "there is",
    "this is",
];

/// Raw output of the opaque captioning model.
#[derive(Debug, Clone)]
pub struct RawCaption {
    pub text: String,
    /// Model-internal likelihood signal, unbounded and optional.
    pub likelihood: Option<f64>,
}

/// The opaque vision-language model, seen only through this seam.
#[async_trait]
pub trait CaptionModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, image: &RgbImage, context: Option<&str>) -> Result<RawCaption>;
}

/// Remote inference endpoint speaking a small JSON protocol: base64 image
/// plus optional conditioning prompt in, generated text plus optional score
/// out.
const MODEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpCaptionModel {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    generated_text: Option<String>,
    score: Option<f64>,
}

impl HttpCaptionModel {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MODEL_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            api_key,
            client,
        }
    }
}

#[async_trait]
impl CaptionModel for HttpCaptionModel {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, image: &RgbImage, context: Option<&str>) -> Result<RawCaption> {
        let png = imaging::to_png_bytes(image)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

        let mut body = json!({ "images": [encoded] });
        if let Some(context) = context {
            body["prompt"] = json!(context);
        }

        // Request-level bound as well, in case the client carries none.
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(MODEL_REQUEST_TIMEOUT)
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("model request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("model endpoint returned HTTP {}", response.status()));
        }

        let payload: InferenceResponse =
            response.json().await.context("undecodable model response")?;
        let text = payload
            .generated_text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow!("model returned no caption text"))?;

        Ok(RawCaption {
            text,
            likelihood: payload.score,
        })
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no caption model loaded")]
    NotLoaded,
    #[error("model inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}

/// Owner of the single shared model instance. The slot is atomically
/// swappable for reloads; inference itself is serialized through one guard
/// so a non-reentrant backend is never entered concurrently. Cache lookups
/// and tone adaptation never take the guard.
pub struct ModelManager {
    slot: ArcSwap<Option<Arc<dyn CaptionModel>>>,
    inference_guard: tokio::sync::Mutex<()>,
    endpoint: String,
    api_key: Option<String>,
}

impl ModelManager {
    pub fn new(settings: &Settings) -> Self {
        let manager = Self {
            slot: ArcSwap::from_pointee(None),
            inference_guard: tokio::sync::Mutex::new(()),
            endpoint: settings.model_endpoint.clone(),
            api_key: settings.model_api_key.clone(),
        };
        manager.load();
        manager
    }

    /// Manager with a fixed model instance and no reload target.
    pub fn with_model(model: Option<Arc<dyn CaptionModel>>) -> Self {
        Self {
            slot: ArcSwap::from_pointee(model),
            inference_guard: tokio::sync::Mutex::new(()),
            endpoint: String::new(),
            api_key: None,
        }
    }

    /// (Re)build the model handle from the configured endpoint. Returns
    /// whether a model is loaded afterwards.
    pub fn load(&self) -> bool {
        if self.endpoint.trim().is_empty() {
            warn!("no model endpoint configured, serving fallback captions");
            self.slot.store(Arc::new(None));
            return false;
        }
        let model: Arc<dyn CaptionModel> = Arc::new(HttpCaptionModel::new(
            self.endpoint.clone(),
            self.api_key.clone(),
        ));
        info!("caption model ready at {}", self.endpoint);
        self.slot.store(Arc::new(Some(model)));
        true
    }

    pub fn is_loaded(&self) -> bool {
        let slot = self.slot.load_full();
        (*slot).is_some()
    }

    pub fn model_name(&self) -> Option<String> {
        let slot = self.slot.load_full();
        (*slot).as_ref().map(|model| model.name().to_string())
    }

    pub async fn generate(
        &self,
        image: &RgbImage,
        context: Option<&str>,
    ) -> Result<RawCaption, ModelError> {
        let slot = self.slot.load_full();
        let model = (*slot).clone().ok_or(ModelError::NotLoaded)?;
        // Single-slot execution: the backend may not be reentrant.
        let _slot = self.inference_guard.lock().await;
        let raw = model.generate(image, context).await?;
        Ok(raw)
    }
}

/// Wraps the opaque model: cache check, normalization, bounded confidence,
/// and a guaranteed caption even when the model is down.
pub struct BaseCaptioner {
    manager: Arc<ModelManager>,
    cache: CaptionCache,
}

impl BaseCaptioner {
    pub fn new(manager: Arc<ModelManager>, cache: CaptionCache) -> Self {
        Self { manager, cache }
    }

    pub async fn caption(&self, image: &RgbImage, fingerprint: &str) -> BaseCaption {
        if let Some(hit) = self
            .cache
            .get::<BaseCaption>(fingerprint, BASE_SEGMENT)
            .await
        {
            info!("base caption cache hit");
            return hit;
        }

        let start = Instant::now();
        let (text, confidence, degraded) = match self.manager.generate(image, None).await {
            Ok(raw) => (
                normalize(&raw.text),
                bounded_confidence(raw.likelihood),
                false,
            ),
            Err(ModelError::NotLoaded) => {
                warn!("caption model not loaded, using generic caption");
                (UNLOADED_CAPTION.to_string(), UNLOADED_CONFIDENCE, true)
            }
            Err(ModelError::Inference(err)) => {
                error!("model inference failed: {err:#}");
                (FALLBACK_CAPTION.to_string(), FALLBACK_CONFIDENCE, true)
            }
        };

        let result = BaseCaption {
            text,
            confidence,
            processing_time: start.elapsed().as_secs_f64(),
            fingerprint: fingerprint.to_string(),
            degraded,
        };
        // Fallback captions are served but never cached: the next request
        // must reach a recovered model instead of a pinned outage artifact.
        if !result.degraded {
            self.cache.put(fingerprint, BASE_SEGMENT, &result).await;
        }
        result
    }

    /// Context-conditioned regeneration. The unconditioned base caption is
    /// computed (or fetched) first and is the fallback if the conditioned
    /// call fails; conditioned output is never cached since it depends on
    /// the free-form context.
    pub async fn caption_with_context(
        &self,
        image: &RgbImage,
        fingerprint: &str,
        context: &str,
    ) -> BaseCaption {
        let base = self.caption(image, fingerprint).await;
        match self.manager.generate(image, Some(context)).await {
            Ok(raw) => BaseCaption {
                text: normalize(&raw.text),
                confidence: bounded_confidence(raw.likelihood),
                degraded: false,
                ..base
            },
            Err(err) => {
                warn!("contextual captioning failed, keeping base caption: {err}");
                base
            }
        }
    }
}

/// Strip one boilerplate lead-in (longest match) and lowercase the first
/// character so the caption embeds mid-sentence in tone templates.
pub fn normalize(raw: &str) -> String {
    let mut caption = raw.trim();
    for lead_in in LEAD_INS {
        if caption.len() >= lead_in.len()
            && caption.as_bytes()[..lead_in.len()].eq_ignore_ascii_case(lead_in.as_bytes())
        {
            // Word boundary required: "this is" must not match "this island".
            // A caption that is nothing but the lead-in is kept as-is; an
            // empty caption would leave templates with dangling punctuation.
            let rest = &caption[lead_in.len()..];
            let stripped = rest.trim_start();
            if rest.starts_with(char::is_whitespace) && !stripped.is_empty() {
                caption = stripped;
                break;
            }
        }
    }

    let mut chars = caption.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() && caption.chars().count() > 1 => {
            format!("{}{}", first.to_lowercase(), chars.as_str())
        }
        _ => caption.to_string(),
    }
}

/// Clamp the model's likelihood signal into [0, 1]; a missing or unusable
/// signal gets a fixed constant instead of an error.
pub fn bounded_confidence(likelihood: Option<f64>) -> f64 {
    match likelihood {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => MISSING_SIGNAL_CONFIDENCE,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted model for tests: fixed output or failure, with a call count.
    pub(crate) struct ScriptedModel {
        response: Result<RawCaption, String>,
        pub calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn ok(text: &str, likelihood: Option<f64>) -> Self {
            Self {
                response: Ok(RawCaption {
                    text: text.to_string(),
                    likelihood,
                }),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CaptionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _image: &RgbImage,
            _context: Option<&str>,
        ) -> Result<RawCaption> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(raw) => Ok(raw.clone()),
                Err(message) => Err(anyhow!("{message}")),
            }
        }
    }
}

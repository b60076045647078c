use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cache::{self, CaptionCache};
use crate::captioner::{BaseCaptioner, ModelManager};
use crate::error::ApiError;
use crate::imaging;
use crate::model::{
    CaptionResponse, HealthResponse, ModelStatusResponse, ReloadResponse, Tone, TonesResponse,
};
use crate::settings::Settings;
use crate::tone::ToneAdapter;

pub struct AppState {
    pub settings: Settings,
    pub cache: CaptionCache,
    pub manager: Arc<ModelManager>,
    pub captioner: BaseCaptioner,
    pub adapter: ToneAdapter,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let cache = CaptionCache::new(settings.cache_capacity, settings.cache_ttl_secs);
        let manager = Arc::new(ModelManager::new(&settings));
        Self::assemble(settings, cache, manager)
    }

    pub fn assemble(settings: Settings, cache: CaptionCache, manager: Arc<ModelManager>) -> Self {
        let captioner = BaseCaptioner::new(manager.clone(), cache.clone());
        let adapter = ToneAdapter::new(&settings);
        Self {
            settings,
            cache,
            manager,
            captioner,
            adapter,
        }
    }
}

/// Tone-adapted payload as cached under (fingerprint, tone). Request id and
/// timestamp are per-request and are assembled freshly around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdaptedPayload {
    caption: String,
    hashtags: Vec<String>,
    confidence: f64,
}

/// The full request pipeline: validate, decode, fingerprint, fetch or
/// compute, adapt, assemble. Only `InvalidInput`-class and internal errors
/// can escape; model, LLM and cache failures are absorbed upstream.
pub async fn process(
    state: &AppState,
    bytes: &[u8],
    tone: Tone,
    context: Option<&str>,
) -> Result<CaptionResponse, ApiError> {
    let start = Instant::now();

    if bytes.is_empty() {
        return Err(ApiError::EmptyInput);
    }
    let image = imaging::prepare(bytes, state.settings.max_image_dim)
        .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
    let fingerprint = cache::fingerprint(&image);

    // Context-conditioned captions depend on free-form text, so only the
    // unconditioned pipeline reads or writes the adapted-result cache.
    if context.is_none() {
        if let Some(hit) = state
            .cache
            .get::<AdaptedPayload>(&fingerprint, tone.as_str())
            .await
        {
            info!(%tone, "adapted caption cache hit");
            return Ok(assemble(hit, tone, start));
        }
    }

    let base = match context {
        Some(context) => {
            state
                .captioner
                .caption_with_context(&image, &fingerprint, context)
                .await
        }
        None => state.captioner.caption(&image, &fingerprint).await,
    };

    let adapted = state
        .adapter
        .adapt(&base.text, tone, state.settings.use_llm_for_tone)
        .await;
    let payload = AdaptedPayload {
        caption: adapted.caption,
        hashtags: adapted.hashtags,
        confidence: base.confidence,
    };

    // Results built on a fallback base caption are never cached either;
    // otherwise a transient outage would pin the synthetic caption for the
    // full TTL across every tone.
    if context.is_none() && !base.degraded {
        state
            .cache
            .put(&fingerprint, tone.as_str(), &payload)
            .await;
    }

    Ok(assemble(payload, tone, start))
}

fn assemble(payload: AdaptedPayload, tone: Tone, start: Instant) -> CaptionResponse {
    CaptionResponse {
        caption: payload.caption,
        tone,
        confidence: payload.confidence,
        processing_time: start.elapsed().as_secs_f64(),
        hashtags: payload.hashtags,
        timestamp: Utc::now(),
        image_id: Uuid::new_v4(),
    }
}

pub async fn handle_caption(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<CaptionResponse>, ApiError> {
    let mut bytes = Vec::new();
    let mut tone = Tone::default();
    let mut context = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::InvalidInput(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?
                    .to_vec();
            }
            "tone" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
                tone = Tone::parse(&value);
            }
            "context" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
                if !value.trim().is_empty() {
                    context = Some(value);
                }
            }
            _ => {}
        }
    }

    let response = process(&state, &bytes, tone, context.as_deref()).await?;
    info!(
        tone = %response.tone,
        processing_time = response.processing_time,
        "caption request completed"
    );
    Ok(Json(response))
}

pub async fn handle_tones() -> Json<TonesResponse> {
    Json(TonesResponse::catalog())
}

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.manager.is_loaded(),
        timestamp: Utc::now(),
    })
}

pub async fn handle_model_status(State(state): State<Arc<AppState>>) -> Json<ModelStatusResponse> {
    Json(ModelStatusResponse {
        loaded: state.manager.is_loaded(),
        model_name: state.manager.model_name(),
    })
}

pub async fn handle_model_reload(State(state): State<Arc<AppState>>) -> Json<ReloadResponse> {
    let success = state.manager.load();
    Json(ReloadResponse {
        success,
        message: if success {
            "Model reloaded successfully"
        } else {
            "Failed to reload model"
        },
    })
}

pub async fn handle_root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Image Caption Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "model_loaded": state.manager.is_loaded(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captioner::test_support::ScriptedModel;
    use crate::imaging::test_support::{png_bytes, test_image};
    use std::sync::atomic::Ordering;

    fn state_with_model(model: Arc<ScriptedModel>, cache: CaptionCache) -> AppState {
        let manager = Arc::new(ModelManager::with_model(Some(model)));
        AppState::assemble(Settings::default(), cache, manager)
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_the_model() {
        let model = Arc::new(ScriptedModel::ok("a dog", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::new(16, 60));

        let err = process(&state, &[], Tone::Casual, None).await.unwrap_err();
        assert!(matches!(err, ApiError::EmptyInput));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_upload_is_invalid_input() {
        let model = Arc::new(ScriptedModel::ok("a dog", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::new(16, 60));

        let err = process(&state, b"plainly not an image", Tone::Casual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn warm_cache_is_idempotent_and_skips_recomputation() {
        let model = Arc::new(ScriptedModel::ok("a photo of a red car", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::new(16, 60));
        let bytes = png_bytes(&test_image(8, 8, [200, 0, 0]));

        let first = process(&state, &bytes, Tone::Casual, None).await.unwrap();
        let second = process(&state, &bytes, Tone::Casual, None).await.unwrap();

        assert_eq!(first.caption, "Check out this red car!");
        assert_eq!(second.caption, first.caption);
        assert_eq!(second.hashtags, first.hashtags);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        // Each response still carries its own identity.
        assert_ne!(first.image_id, second.image_id);
    }

    #[tokio::test]
    async fn distinct_tones_share_the_base_caption() {
        let model = Arc::new(ScriptedModel::ok("a photo of a red car", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::new(16, 60));
        let bytes = png_bytes(&test_image(8, 8, [200, 0, 0]));

        let casual = process(&state, &bytes, Tone::Casual, None).await.unwrap();
        let formal = process(&state, &bytes, Tone::Formal, None).await.unwrap();

        assert_eq!(casual.caption, "Check out this red car!");
        assert_eq!(formal.caption, "The image depicts red car.");
        // Base caption came from the cache the second time around.
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_cache_degrades_to_direct_computation() {
        let model = Arc::new(ScriptedModel::ok("a photo of a red car", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::disabled());
        let bytes = png_bytes(&test_image(8, 8, [200, 0, 0]));

        let first = process(&state, &bytes, Tone::Casual, None).await.unwrap();
        let second = process(&state, &bytes, Tone::Casual, None).await.unwrap();

        assert_eq!(first.caption, "Check out this red car!");
        assert_eq!(second.caption, first.caption);
    }

    #[tokio::test]
    async fn failing_model_still_produces_a_response() {
        let model = Arc::new(ScriptedModel::failing("weights on fire"));
        let state = state_with_model(model, CaptionCache::new(16, 60));
        let bytes = png_bytes(&test_image(8, 8, [0, 200, 0]));

        let response = process(&state, &bytes, Tone::Formal, None).await.unwrap();
        assert_eq!(response.caption, "The image depicts interesting scene.");
        assert_eq!(response.confidence, crate::captioner::FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn model_outage_results_are_not_pinned_in_the_cache() {
        let cache = CaptionCache::new(16, 60);
        let bytes = png_bytes(&test_image(8, 8, [0, 200, 0]));

        // During the outage the request still succeeds, on the fallback.
        let broken_state = state_with_model(
            Arc::new(ScriptedModel::failing("weights on fire")),
            cache.clone(),
        );
        let during_outage = process(&broken_state, &bytes, Tone::Casual, None)
            .await
            .unwrap();
        assert_eq!(during_outage.caption, "Check out this interesting scene!");

        // After recovery the same cache must yield a freshly computed
        // caption, not the outage artifact, for any tone.
        let model = Arc::new(ScriptedModel::ok("a photo of a red car", Some(0.9)));
        let healthy_state = state_with_model(model.clone(), cache);
        let after_recovery = process(&healthy_state, &bytes, Tone::Casual, None)
            .await
            .unwrap();
        assert_eq!(after_recovery.caption, "Check out this red car!");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hashtag_cap_holds_for_long_captions() {
        let model = Arc::new(ScriptedModel::ok(
            "a photo of a crowded market full of fruit stands and bright awnings",
            Some(0.9),
        ));
        let state = state_with_model(model, CaptionCache::new(16, 60));
        let bytes = png_bytes(&test_image(8, 8, [9, 9, 9]));

        let response = process(&state, &bytes, Tone::Marketing, None).await.unwrap();
        assert!(response.hashtags.len() <= 5);
    }

    #[tokio::test]
    async fn context_bypasses_the_adapted_cache() {
        let model = Arc::new(ScriptedModel::ok("a photo of a red car", Some(0.9)));
        let state = state_with_model(model.clone(), CaptionCache::new(16, 60));
        let bytes = png_bytes(&test_image(8, 8, [200, 0, 0]));

        let plain = process(&state, &bytes, Tone::Casual, None).await.unwrap();
        let contextual = process(&state, &bytes, Tone::Casual, Some("at a car show"))
            .await
            .unwrap();

        assert_eq!(plain.caption, contextual.caption);
        // Base hit from cache plus one conditioned regeneration.
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}

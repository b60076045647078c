use image::RgbImage;
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

/// Reserved tone segment for the unadapted base caption.
pub const BASE_SEGMENT: &str = "base";

/// Deterministic digest of decoded pixel content. The dimension prefix keeps
/// equal byte runs at different sizes from colliding.
pub fn fingerprint(image: &RgbImage) -> String {
    let (width, height) = image.dimensions();
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("{width}x{height}:").as_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().to_hex().to_string()
}

/// Content-addressed TTL cache mapping (fingerprint, tone segment) to a
/// JSON-serialized result payload. Strictly an accelerator: every failure
/// mode degrades to a miss, and expired entries are indistinguishable from
/// absent ones.
#[derive(Clone)]
pub struct CaptionCache {
    inner: Cache<String, String>,
}

impl CaptionCache {
    pub fn new(max_capacity: u64, ttl_secs: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .build();
        Self { inner }
    }

    /// Zero-capacity cache where every lookup misses. Used to run the
    /// pipeline with the accelerator effectively unavailable.
    pub fn disabled() -> Self {
        Self::new(0, 1)
    }

    pub async fn get<T: DeserializeOwned>(&self, fingerprint: &str, segment: &str) -> Option<T> {
        let raw = self.inner.get(&Self::key(fingerprint, segment)).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("discarding undecodable cache entry for segment {segment}: {err}");
                None
            }
        }
    }

    /// Best-effort write; replaces any prior entry under the same key.
    pub async fn put<T: Serialize>(&self, fingerprint: &str, segment: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.inner.insert(Self::key(fingerprint, segment), raw).await,
            Err(err) => warn!("failed to serialize cache payload for segment {segment}: {err}"),
        }
    }

    fn key(fingerprint: &str, segment: &str) -> String {
        format!("{fingerprint}:{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::test_support::test_image;
    use crate::model::BaseCaption;

    fn sample_caption() -> BaseCaption {
        BaseCaption {
            text: "dog running in a park".to_string(),
            confidence: 0.85,
            processing_time: 0.2,
            fingerprint: "abc".to_string(),
            degraded: false,
        }
    }

    #[test]
    fn identical_pixels_share_a_fingerprint() {
        let a = test_image(16, 16, [120, 30, 7]);
        let b = test_image(16, 16, [120, 30, 7]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn single_pixel_change_alters_fingerprint() {
        let a = test_image(16, 16, [120, 30, 7]);
        let mut b = a.clone();
        b.get_pixel_mut(3, 5).0 = [121, 30, 7];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn dimensions_participate_in_the_key() {
        // 4x1 and 2x2 solid images have identical raw byte runs.
        let wide = test_image(4, 1, [9, 9, 9]);
        let square = test_image(2, 2, [9, 9, 9]);
        assert_eq!(wide.as_raw(), square.as_raw());
        assert_ne!(fingerprint(&wide), fingerprint(&square));
    }

    #[tokio::test]
    async fn hit_after_put() {
        let cache = CaptionCache::new(64, 60);
        cache.put("fp1", BASE_SEGMENT, &sample_caption()).await;
        let hit: Option<BaseCaption> = cache.get("fp1", BASE_SEGMENT).await;
        assert_eq!(hit.unwrap().text, "dog running in a park");
    }

    #[tokio::test]
    async fn miss_for_unknown_key_and_foreign_segment() {
        let cache = CaptionCache::new(64, 60);
        cache.put("fp1", BASE_SEGMENT, &sample_caption()).await;
        assert!(cache.get::<BaseCaption>("fp2", BASE_SEGMENT).await.is_none());
        assert!(cache.get::<BaseCaption>("fp1", "casual").await.is_none());
    }

    #[tokio::test]
    async fn undecodable_entry_degrades_to_miss() {
        let cache = CaptionCache::new(64, 60);
        cache.put("fp1", BASE_SEGMENT, &sample_caption()).await;
        let miss: Option<Vec<u32>> = cache.get("fp1", BASE_SEGMENT).await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = CaptionCache::disabled();
        cache.put("fp1", BASE_SEGMENT, &sample_caption()).await;
        cache.inner.run_pending_tasks().await;
        assert!(cache.get::<BaseCaption>("fp1", BASE_SEGMENT).await.is_none());
    }
}

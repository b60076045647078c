use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::model::Tone;
use crate::settings::Settings;

/// Fixed style descriptor per tone, used by both the LLM prompt and the
/// rule-based templates.
struct ToneStyle {
    prefix: &'static str,
    style: &'static str,
    example: &'static str,
}

fn style_for(tone: Tone) -> ToneStyle {
    match tone {
        Tone::Formal => ToneStyle {
            prefix: "The image depicts",
            style: "professional and descriptive",
            example: "The image depicts a serene landscape featuring...",
        },
        Tone::Casual => ToneStyle {
            prefix: "Check out this",
            style: "friendly and conversational",
            example: "Check out this awesome sunset over the mountains!",
        },
        Tone::Humorous => ToneStyle {
            prefix: "Plot twist:",
            style: "witty and entertaining",
            example: "Plot twist: The cat is actually the one training the human!",
        },
        Tone::Poetic => ToneStyle {
            prefix: "In this moment captured,",
            style: "lyrical and evocative",
            example: "In this moment captured, nature's symphony plays...",
        },
        Tone::Technical => ToneStyle {
            prefix: "Analysis:",
            style: "precise and detailed",
            example: "Analysis: The composition features a rule-of-thirds layout...",
        },
        Tone::Marketing => ToneStyle {
            prefix: "Discover",
            style: "engaging and persuasive",
            example: "Discover the perfect blend of style and comfort...",
        },
        Tone::Storytelling => ToneStyle {
            prefix: "Once upon a time,",
            style: "narrative and engaging",
            example: "Once upon a time, in a garden where colors danced...",
        },
    }
}

fn tone_tags(tone: Tone) -> [&'static str; 2] {
    match tone {
        Tone::Formal => ["#professional", "#business"],
        Tone::Casual => ["#daily", "#life"],
        Tone::Humorous => ["#funny", "#lol"],
        Tone::Poetic => ["#poetry", "#artistic"],
        Tone::Technical => ["#tech", "#analysis"],
        Tone::Marketing => ["#product", "#trending"],
        Tone::Storytelling => ["#story", "#narrative"],
    }
}

/// Word lists that are content policy rather than structure. Swappable
/// without touching the adaptation logic.
#[derive(Debug, Clone)]
pub struct ToneStyleConfig {
    pub stop_words: Vec<String>,
    pub humor_lead_ins: Vec<String>,
}

impl Default for ToneStyleConfig {
    fn default() -> Self {
        Self {
            stop_words: ["the", "a", "an", "is", "are", "was", "were", "in", "on", "at"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            humor_lead_ins: ["Plot twist: ", "Meanwhile, ", "Spoiler alert: ", "Breaking news: "]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Why the LLM path did not produce a caption. Every variant falls through
/// to the rule-based path; none of them reaches the caller.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm path disabled (no api key configured)")]
    Disabled,
    #[error("request timed out")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed completion response")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adapted {
    pub caption: String,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Option<Vec<CompletionChoice>>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Two-path tone engine: one optional LLM round-trip with a bounded
/// timeout, and a deterministic rule-based transformer that is always
/// available.
pub struct ToneAdapter {
    client: reqwest::Client,
    /// Applied per request as well, so the bound holds even if the client
    /// was built without one.
    timeout: Duration,
    endpoint: String,
    llm_model: String,
    api_key: Option<String>,
    config: ToneStyleConfig,
}

impl ToneAdapter {
    pub fn new(settings: &Settings) -> Self {
        Self::with_config(settings, ToneStyleConfig::default())
    }

    pub fn with_config(settings: &Settings, config: ToneStyleConfig) -> Self {
        let timeout = Duration::from_secs(settings.llm_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout,
            endpoint: settings.llm_endpoint.clone(),
            llm_model: settings.llm_model.clone(),
            api_key: settings.llm_api_key.clone(),
            config,
        }
    }

    /// Produce the styled caption and its hashtags. The return shape is the
    /// same whichever path ran.
    pub async fn adapt(&self, base_caption: &str, tone: Tone, prefer_llm: bool) -> Adapted {
        let caption = if prefer_llm {
            match self.adapt_with_llm(base_caption, tone).await {
                Ok(text) => text,
                Err(LlmError::Disabled) => self.apply_rules(base_caption, tone),
                Err(err) => {
                    warn!("tone LLM unavailable, using rule-based adaptation: {err}");
                    self.apply_rules(base_caption, tone)
                }
            }
        } else {
            self.apply_rules(base_caption, tone)
        };
        let hashtags = self.hashtags(&caption, tone);
        Adapted { caption, hashtags }
    }

    /// One attempt, no retry. The trimmed completion text is the caption.
    async fn adapt_with_llm(&self, base_caption: &str, tone: Tone) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::Disabled)?;
        let style = style_for(tone);
        let prompt = format!(
            "Transform this image caption to have a {tone} tone.\n\
             Original caption: \"{base_caption}\"\n\n\
             Guidelines for {tone} tone:\n\
             - Style: {}\n\
             - Example start: {}\n\n\
             Provide only the adapted caption, nothing else.",
            style.style, style.example
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.llm_model,
                "messages": [
                    {"role": "system", "content": "You are a creative caption writer."},
                    {"role": "user", "content": prompt}
                ],
                "temperature": 0.7,
                "max_tokens": 100
            }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Provider(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LlmError::Provider(format!("HTTP {}", response.status())));
        }

        let payload: CompletionResponse =
            response.json().await.map_err(|_| LlmError::Malformed)?;
        payload
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::Malformed)
    }

    /// Deterministic transformation per tone (humorous excepted, which picks
    /// its lead-in pseudo-randomly but always terminates with text).
    pub fn apply_rules(&self, base_caption: &str, tone: Tone) -> String {
        let caption = strip_leading_article(base_caption.trim());
        let prefix = style_for(tone).prefix;
        match tone {
            Tone::Formal => format!("{prefix} {caption}."),
            Tone::Casual => {
                let mut caption = caption.to_string();
                if !caption.ends_with('!') && !caption.ends_with('?') {
                    caption.push('!');
                }
                format!("{prefix} {caption}")
            }
            Tone::Humorous => {
                let lead_in = self
                    .config
                    .humor_lead_ins
                    .choose(&mut rand::thread_rng())
                    .map(String::as_str)
                    .unwrap_or("Plot twist: ");
                format!("{lead_in}{caption} 😄")
            }
            Tone::Poetic => {
                let words: Vec<&str> = caption.split_whitespace().collect();
                if words.len() > 3 {
                    format!(
                        "{prefix} {},\nWhere {} unfolds...",
                        words[..3].join(" "),
                        words[3..].join(" ")
                    )
                } else {
                    format!("{prefix} {caption}...")
                }
            }
            Tone::Technical => {
                format!("{prefix} {caption}. Technical details: Composition analysis pending.")
            }
            Tone::Marketing => format!("✨ {prefix} {caption} - Your perfect choice awaits!"),
            Tone::Storytelling => {
                format!("{prefix} there was {caption}. And the story continues...")
            }
        }
    }

    /// Up to 3 keyword tags from the caption, then up to 2 tone tags, capped
    /// at 5 total, keywords first.
    pub fn hashtags(&self, caption: &str, tone: Tone) -> Vec<String> {
        let mut tags: Vec<String> = caption
            .split_whitespace()
            .map(|word| {
                word.to_lowercase()
                    .trim_end_matches(['.', ',', '!', '?'])
                    .to_string()
            })
            .filter(|word| !word.is_empty())
            .filter(|word| !self.config.stop_words.iter().any(|stop| stop == word))
            .take(3)
            .map(|word| format!("#{word}"))
            .collect();
        tags.extend(tone_tags(tone).into_iter().map(str::to_string));
        tags.truncate(5);
        tags
    }
}

/// Drop one leading article or demonstrative so templates read naturally.
fn strip_leading_article(caption: &str) -> &str {
    if let Some((first, rest)) = caption.split_once(' ') {
        let rest = rest.trim_start();
        if !rest.is_empty()
            && ["a", "an", "the", "this"]
                .iter()
                .any(|article| first.eq_ignore_ascii_case(article))
        {
            return rest;
        }
    }
    caption
}

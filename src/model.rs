use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stylistic policy applied to a base caption. Closed set; unknown values
/// coming off the wire degrade to the default policy instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Formal,
    #[default]
    Casual,
    Humorous,
    Poetic,
    Technical,
    Marketing,
    Storytelling,
}

impl Tone {
    pub const ALL: [Tone; 7] = [
        Tone::Formal,
        Tone::Casual,
        Tone::Humorous,
        Tone::Poetic,
        Tone::Technical,
        Tone::Marketing,
        Tone::Storytelling,
    ];

    /// Lenient parse: anything unrecognized falls back to the default tone.
    pub fn parse(value: &str) -> Tone {
        match value.trim().to_ascii_lowercase().as_str() {
            "formal" => Tone::Formal,
            "casual" => Tone::Casual,
            "humorous" => Tone::Humorous,
            "poetic" => Tone::Poetic,
            "technical" => Tone::Technical,
            "marketing" => Tone::Marketing,
            "storytelling" => Tone::Storytelling,
            _ => Tone::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Formal => "formal",
            Tone::Casual => "casual",
            Tone::Humorous => "humorous",
            Tone::Poetic => "poetic",
            Tone::Technical => "technical",
            Tone::Marketing => "marketing",
            Tone::Storytelling => "storytelling",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tone::Formal => "Professional and descriptive",
            Tone::Casual => "Friendly and conversational",
            Tone::Humorous => "Witty and entertaining",
            Tone::Poetic => "Lyrical and evocative",
            Tone::Technical => "Precise and detailed",
            Tone::Marketing => "Engaging and persuasive",
            Tone::Storytelling => "Narrative and engaging",
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cleaned output of the captioning model, prior to any tone styling.
/// Immutable once produced; cached under the reserved "base" segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseCaption {
    pub text: String,
    /// Bounded to [0, 1], monotonic in model certainty.
    pub confidence: f64,
    pub processing_time: f64,
    pub fingerprint: String,
    /// Set when the text is a synthetic fallback rather than model output.
    /// Such results are never cached, so a recovered model is consulted
    /// again on the next request. Not serialized: anything read back from
    /// the cache is genuine by construction.
    #[serde(skip)]
    pub degraded: bool,
}

/// Final per-request response record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
    pub tone: Tone,
    pub confidence: f64,
    pub processing_time: f64,
    pub hashtags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub image_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ToneInfo {
    pub value: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TonesResponse {
    pub tones: Vec<ToneInfo>,
}

impl TonesResponse {
    pub fn catalog() -> Self {
        Self {
            tones: Tone::ALL
                .iter()
                .map(|tone| ToneInfo {
                    value: tone.as_str(),
                    description: tone.description(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub loaded: bool,
    pub model_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: &'static str,
}

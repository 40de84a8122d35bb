// Common data models for the fetch pipeline

use serde::{Deserialize, Serialize};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMERIC_RESOLUTION_RE: Regex = Regex::new(r"^(\d+)[pw]$").unwrap();
}

/// Raw encoding as reported by a resolver's inspection call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEncoding {
    /// Resolver-native selector for this single encoding (e.g., "137")
    pub selector: String,
    /// File container (mp4, webm, m4a)
    pub container: String,
    /// Video codec id, `None` or "none" when absent
    pub video_codec: Option<String>,
    /// Audio codec id, `None` or "none" when absent
    pub audio_codec: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    /// Average total bitrate in kbps
    pub bitrate_kbps: Option<f64>,
    /// Exact or approximate size in bytes
    pub approx_size: Option<u64>,
}

impl RawEncoding {
    pub fn has_video(&self) -> bool {
        codec_present(self.video_codec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.audio_codec.as_deref())
    }

    /// Whether the encoding carries any resolution signal at all
    pub fn has_resolution(&self) -> bool {
        self.height.is_some() || self.width.is_some()
    }

    /// Human resolution label, e.g. "720p". Falls back to width ("640w")
    /// when the height is unknown.
    pub fn display_resolution(&self) -> Option<String> {
        match (self.height, self.width) {
            (Some(h), _) => Some(format!("{}p", h)),
            (None, Some(w)) => Some(format!("{}w", w)),
            (None, None) => None,
        }
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.map_or(false, |c| !c.is_empty() && c != "none")
}

/// Shape of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatKind {
    /// Muxed encoding, video and audio in one stream
    VideoAndAudio,
    /// Intermediate only, never presented
    VideoOnly,
    /// Intermediate only, never presented
    AudioOnly,
    /// Video-only + audio-only pair merged at fetch time
    Merged,
    /// Resolver-native selection expression with a reserved label
    Preset,
}

impl FormatKind {
    pub fn is_intermediate(&self) -> bool {
        matches!(self, Self::VideoOnly | Self::AudioOnly)
    }
}

/// Reserved labels used by presets. Never collide with numeric resolutions.
pub const LABEL_BEST: &str = "Best quality";
pub const LABEL_BEST_1080: &str = "Best up to 1080p";
pub const LABEL_BEST_720: &str = "Best up to 720p";
pub const LABEL_AUDIO_ONLY: &str = "Audio only";

// rank layout: [tier:16][resolution:24][bitrate:24]
const RANK_FIELD_MAX: u64 = 0xFF_FFFF;

/// Catalog entry. Immutable once constructed; `rank` is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    selector: String,
    container: String,
    display_resolution: String,
    kind: FormatKind,
    approx_size_bytes: u64,
    bitrate_kbps: Option<f64>,
    rank: u64,
}

impl FormatDescriptor {
    pub fn new(
        selector: impl Into<String>,
        container: impl Into<String>,
        display_resolution: impl Into<String>,
        kind: FormatKind,
        approx_size_bytes: u64,
        bitrate_kbps: Option<f64>,
    ) -> Self {
        let display_resolution = display_resolution.into();
        let rank = compute_rank(kind, &display_resolution, bitrate_kbps);
        Self {
            selector: selector.into(),
            container: container.into(),
            display_resolution,
            kind,
            approx_size_bytes,
            bitrate_kbps,
            rank,
        }
    }

    /// Preset with a reserved label and a resolver-native selection expression
    pub fn preset(label: &str, selector: &str, container: &str) -> Self {
        Self::new(selector, container, label, FormatKind::Preset, 0, None)
    }

    /// Single generic entry offered when inspection produced nothing
    pub fn fallback() -> Self {
        Self::preset(LABEL_BEST, "best", "mp4")
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn display_resolution(&self) -> &str {
        &self.display_resolution
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn approx_size_bytes(&self) -> u64 {
        self.approx_size_bytes
    }

    pub fn bitrate_kbps(&self) -> Option<f64> {
        self.bitrate_kbps
    }

    /// Higher sorts first
    pub fn rank(&self) -> u64 {
        self.rank
    }

    /// Presets whose reserved label marks them as a "best" choice
    pub fn is_best_preset(&self) -> bool {
        self.kind == FormatKind::Preset && self.display_resolution.starts_with("Best")
    }

    /// Numeric value of the resolution label, `None` for reserved labels
    pub fn resolution_value(&self) -> Option<u32> {
        parse_resolution(&self.display_resolution)
    }
}

/// Parse "1080p" / "640w" into a number. Reserved or malformed labels yield `None`.
pub fn parse_resolution(label: &str) -> Option<u32> {
    NUMERIC_RESOLUTION_RE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn compute_rank(kind: FormatKind, label: &str, bitrate_kbps: Option<f64>) -> u64 {
    let tier: u64 = match kind {
        FormatKind::Preset if label.starts_with("Best") => 4,
        FormatKind::VideoAndAudio => 3,
        FormatKind::Merged => 2,
        FormatKind::Preset => 1,
        FormatKind::VideoOnly | FormatKind::AudioOnly => 0,
    };

    // non-numeric labels count as maximal
    let resolution = parse_resolution(label)
        .map_or(RANK_FIELD_MAX, |r| (r as u64).min(RANK_FIELD_MAX - 1));

    let bitrate = bitrate_kbps
        .filter(|b| b.is_finite() && *b > 0.0)
        .map_or(0, |b| (b.round() as u64).clamp(1, RANK_FIELD_MAX));

    (tier << 48) | (resolution << 24) | bitrate
}

/// Result of a resolver inspection call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inspection {
    pub title: String,
    pub encodings: Vec<RawEncoding>,
}

/// Identity of a memoized fetch: the source URL and the selector used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchKey {
    pub source_url: String,
    pub selector: String,
}

impl FetchKey {
    pub fn new(source_url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            selector: selector.into(),
        }
    }
}

// FormatSelector - turns raw resolver encodings into catalog entries
//
// Handles:
// - Dropping encodings without a resolution signal
// - Classifying muxed / video-only / audio-only streams
// - Synthesizing merged video+audio entries from split streams
// - Appending the fixed preset entries

use super::models::{
    FormatDescriptor, FormatKind, RawEncoding, LABEL_AUDIO_ONLY, LABEL_BEST, LABEL_BEST_1080,
    LABEL_BEST_720,
};

/// Separator the resolver understands as "merge these two selectors"
pub const MERGE_SEPARATOR: char = '+';

/// Container requested from the merger for synthesized entries
pub const MERGED_CONTAINER: &str = "mp4";

/// Fixed presets: (reserved label, resolver-native selector, container)
pub const PRESETS: [(&str, &str, &str); 4] = [
    (LABEL_BEST, "bestvideo+bestaudio/best", "mp4"),
    (
        LABEL_BEST_1080,
        "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        "mp4",
    ),
    (
        LABEL_BEST_720,
        "bestvideo[height<=720]+bestaudio/best[height<=720]",
        "mp4",
    ),
    (LABEL_AUDIO_ONLY, "bestaudio/best", "m4a"),
];

pub struct FormatSelector;

impl FormatSelector {
    /// Normalize raw encodings into presentable descriptors.
    ///
    /// Never emits `VideoOnly` or `AudioOnly` entries; those only feed the
    /// merged entries. Presets are appended only when at least one concrete
    /// entry came out; otherwise the result is empty and the caller picks
    /// its own fallback.
    pub fn normalize(raw: &[RawEncoding]) -> Vec<FormatDescriptor> {
        let mut descriptors = Vec::new();

        // Audio-only streams carry no resolution of their own, so they are
        // taken from the full input rather than the resolution-filtered one.
        let best_audio = Self::find_best_audio(raw);

        for encoding in raw {
            let Some(kind) = Self::classify(encoding) else {
                continue;
            };
            let Some(resolution) = encoding.display_resolution() else {
                continue;
            };

            match kind {
                FormatKind::VideoAndAudio => descriptors.push(FormatDescriptor::new(
                    encoding.selector.clone(),
                    encoding.container.clone(),
                    resolution,
                    FormatKind::VideoAndAudio,
                    encoding.approx_size.unwrap_or(0),
                    encoding.bitrate_kbps,
                )),
                FormatKind::VideoOnly => {
                    if let Some(audio) = best_audio {
                        descriptors.push(Self::merge(encoding, audio, resolution));
                    }
                }
                _ => {}
            }
        }

        if descriptors.is_empty() {
            return descriptors;
        }

        descriptors.extend(
            PRESETS
                .iter()
                .map(|(label, selector, container)| FormatDescriptor::preset(label, selector, container)),
        );

        descriptors
    }

    /// Stream shape of a raw encoding, `None` if it carries neither track
    pub fn classify(encoding: &RawEncoding) -> Option<FormatKind> {
        match (encoding.has_video(), encoding.has_audio()) {
            (true, true) => Some(FormatKind::VideoAndAudio),
            (true, false) => Some(FormatKind::VideoOnly),
            (false, true) => Some(FormatKind::AudioOnly),
            (false, false) => None,
        }
    }

    /// Highest-bitrate audio-only encoding; the first one wins a tie
    fn find_best_audio(raw: &[RawEncoding]) -> Option<&RawEncoding> {
        let mut best: Option<&RawEncoding> = None;
        for encoding in raw
            .iter()
            .filter(|e| Self::classify(e) == Some(FormatKind::AudioOnly))
        {
            let bitrate = encoding.bitrate_kbps.unwrap_or(0.0);
            match best {
                Some(current) if current.bitrate_kbps.unwrap_or(0.0) >= bitrate => {}
                _ => best = Some(encoding),
            }
        }
        best
    }

    fn merge(video: &RawEncoding, audio: &RawEncoding, resolution: String) -> FormatDescriptor {
        let size = match (video.approx_size, audio.approx_size) {
            (Some(v), Some(a)) => v + a,
            _ => 0,
        };
        let bitrate = video
            .bitrate_kbps
            .map(|v| v + audio.bitrate_kbps.unwrap_or(0.0));

        FormatDescriptor::new(
            format!("{}{}{}", video.selector, MERGE_SEPARATOR, audio.selector),
            MERGED_CONTAINER,
            resolution,
            FormatKind::Merged,
            size,
            bitrate,
        )
    }

    /// Whether a selector asks the resolver to merge separate streams
    pub fn requires_merge(selector: &str) -> bool {
        selector.contains(MERGE_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_video_format(id: &str, height: u32, size: Option<u64>, tbr: Option<f64>) -> RawEncoding {
        RawEncoding {
            selector: id.to_string(),
            container: "mp4".to_string(),
            video_codec: Some("avc1.640028".to_string()),
            audio_codec: Some("none".to_string()),
            height: Some(height),
            width: Some(height * 16 / 9),
            bitrate_kbps: tbr,
            approx_size: size,
        }
    }

    fn make_audio_format(id: &str, tbr: f64, size: Option<u64>) -> RawEncoding {
        RawEncoding {
            selector: id.to_string(),
            container: "m4a".to_string(),
            video_codec: Some("none".to_string()),
            audio_codec: Some("mp4a.40.2".to_string()),
            height: None,
            width: None,
            bitrate_kbps: Some(tbr),
            approx_size: size,
        }
    }

    fn make_muxed_format(id: &str, height: u32) -> RawEncoding {
        RawEncoding {
            selector: id.to_string(),
            container: "mp4".to_string(),
            video_codec: Some("avc1.42001E".to_string()),
            audio_codec: Some("mp4a.40.2".to_string()),
            height: Some(height),
            width: None,
            bitrate_kbps: None,
            approx_size: Some(1_000),
        }
    }

    fn non_presets(list: &[FormatDescriptor]) -> Vec<&FormatDescriptor> {
        list.iter().filter(|d| d.kind() != FormatKind::Preset).collect()
    }

    #[test]
    fn test_never_emits_intermediate_kinds() {
        let raw = vec![
            make_video_format("137", 1080, Some(100), Some(4000.0)),
            make_video_format("136", 720, None, None),
            make_audio_format("140", 128.0, Some(10)),
            make_audio_format("139", 48.0, Some(5)),
            make_muxed_format("18", 360),
        ];
        let out = FormatSelector::normalize(&raw);
        assert!(out.iter().all(|d| !d.kind().is_intermediate()));
    }

    #[test]
    fn test_discards_encodings_without_resolution() {
        let mut muxed = make_muxed_format("18", 360);
        muxed.height = None;
        muxed.width = None;
        let out = FormatSelector::normalize(&[muxed]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_width_only_encoding_is_kept() {
        let mut muxed = make_muxed_format("18", 360);
        muxed.height = None;
        muxed.width = Some(640);
        let out = FormatSelector::normalize(&[muxed]);
        assert_eq!(non_presets(&out)[0].display_resolution(), "640w");
    }

    #[test]
    fn test_merges_each_video_with_best_audio() {
        let raw = vec![
            make_video_format("137", 1080, Some(100), Some(4000.0)),
            make_video_format("136", 720, Some(50), Some(2000.0)),
            make_audio_format("139", 48.0, Some(5)),
            make_audio_format("140", 128.0, Some(10)),
        ];
        let out = FormatSelector::normalize(&raw);
        let merged = non_presets(&out);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].selector(), "137+140");
        assert_eq!(merged[0].display_resolution(), "1080p");
        assert_eq!(merged[0].approx_size_bytes(), 110);
        assert_eq!(merged[0].container(), MERGED_CONTAINER);
        assert_eq!(merged[1].selector(), "136+140");
        assert_eq!(merged[1].kind(), FormatKind::Merged);
    }

    #[test]
    fn test_merged_size_unknown_when_either_side_unknown() {
        let raw = vec![
            make_video_format("137", 1080, None, None),
            make_audio_format("140", 128.0, Some(10)),
        ];
        let out = FormatSelector::normalize(&raw);
        assert_eq!(non_presets(&out)[0].approx_size_bytes(), 0);
    }

    #[test]
    fn test_video_only_without_audio_is_dropped() {
        let raw = vec![make_video_format("137", 1080, Some(100), None)];
        let out = FormatSelector::normalize(&raw);
        assert!(out.is_empty());
    }

    #[test]
    fn test_presets_follow_concrete_entries() {
        let out = FormatSelector::normalize(&[make_muxed_format("18", 360)]);
        let labels: Vec<&str> = out.iter().map(|d| d.display_resolution()).collect();
        assert_eq!(
            labels,
            vec!["360p", LABEL_BEST, LABEL_BEST_1080, LABEL_BEST_720, LABEL_AUDIO_ONLY]
        );
        assert!(out[1..].iter().all(|d| d.kind() == FormatKind::Preset));
    }

    #[test]
    fn test_empty_when_nothing_usable() {
        assert!(FormatSelector::normalize(&[]).is_empty());

        let storyboard = RawEncoding {
            selector: "sb0".to_string(),
            container: "mhtml".to_string(),
            video_codec: Some("none".to_string()),
            audio_codec: Some("none".to_string()),
            height: Some(90),
            width: Some(160),
            ..Default::default()
        };
        let audio_only = make_audio_format("140", 128.0, Some(10));
        assert!(FormatSelector::normalize(&[storyboard, audio_only]).is_empty());
    }

    #[test]
    fn test_requires_merge() {
        assert!(FormatSelector::requires_merge("137+140"));
        assert!(FormatSelector::requires_merge("bestvideo+bestaudio/best"));
        assert!(!FormatSelector::requires_merge("22"));
    }
}

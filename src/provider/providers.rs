//! The known embed providers and how each one addresses a title.

use super::{Codec, Delivery, ProviderError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "autoembed")]
    AutoEmbed,
    #[serde(rename = "2embed")]
    TwoEmbed,
    #[serde(rename = "multiembed")]
    MultiEmbed,
    #[serde(rename = "embedsu")]
    EmbedSu,
}

/// Static description of one provider's catalogue entry point.
pub struct ProviderSpec {
    pub prefix: &'static str,
    pub display_name: &'static str,
    pub priority: u8,
    pub default_base_url: &'static str,
    pub quality: &'static str,
    pub score: f64,
    pub delivery: Delivery,
    pub codec: Codec,
    build_url: fn(&str, &str) -> String,
}

static AUTOEMBED: ProviderSpec = ProviderSpec {
    prefix: "autoembed",
    display_name: "AutoEmbed",
    priority: 1,
    default_base_url: "https://autoembed.co",
    quality: "1080p",
    score: 85.0,
    delivery: Delivery::LicensedEmbed,
    codec: Codec::H264,
    build_url: |base, key| format!("{}/movie/tmdb/{}", base, key),
};

static TWO_EMBED: ProviderSpec = ProviderSpec {
    prefix: "2embed",
    display_name: "2Embed",
    priority: 2,
    default_base_url: "https://www.2embed.cc",
    quality: "720p",
    score: 75.0,
    delivery: Delivery::LicensedEmbed,
    codec: Codec::H264,
    build_url: |base, key| format!("{}/embed/tmdb/movie?id={}", base, key),
};

static MULTIEMBED: ProviderSpec = ProviderSpec {
    prefix: "multiembed",
    display_name: "MultiEmbed",
    priority: 3,
    default_base_url: "https://multiembed.mov",
    quality: "720p",
    score: 70.0,
    delivery: Delivery::LicensedEmbed,
    codec: Codec::H264,
    build_url: |base, key| format!("{}/?video_id={}&tmdb=1", base, key),
};

static EMBEDSU: ProviderSpec = ProviderSpec {
    prefix: "embedsu",
    display_name: "EmbedSu",
    priority: 4,
    default_base_url: "https://embed.su",
    quality: "720p",
    score: 65.0,
    delivery: Delivery::LicensedEmbed,
    codec: Codec::H264,
    build_url: |base, key| format!("{}/embed/movie/{}", base, key),
};

impl Provider {
    /// All providers in priority order.
    pub const ALL: [Provider; 4] = [
        Provider::AutoEmbed,
        Provider::TwoEmbed,
        Provider::MultiEmbed,
        Provider::EmbedSu,
    ];

    pub fn spec(&self) -> &'static ProviderSpec {
        match self {
            Provider::AutoEmbed => &AUTOEMBED,
            Provider::TwoEmbed => &TWO_EMBED,
            Provider::MultiEmbed => &MULTIEMBED,
            Provider::EmbedSu => &EMBEDSU,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().prefix
    }

    pub fn priority(&self) -> u8 {
        self.spec().priority
    }

    pub fn parse(s: &str) -> Option<Self> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s || p.spec().display_name.eq_ignore_ascii_case(s))
    }

    /// Embed URL for `key` under `base_url` (no trailing slash expected).
    pub fn stream_url(&self, base_url: &str, key: &str) -> String {
        (self.spec().build_url)(base_url.trim_end_matches('/'), key)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque per-provider handle, rendered as `<prefix>-<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRef {
    pub provider: Provider,
    pub key: String,
}

impl ProviderRef {
    pub fn new(provider: Provider, key: impl Into<String>) -> Self {
        Self {
            provider,
            key: key.into(),
        }
    }

    /// Splits on the first `-`; provider prefixes never contain one.
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        let (prefix, key) = s
            .split_once('-')
            .ok_or_else(|| ProviderError::InvalidRef(s.to_string()))?;
        if key.is_empty() {
            return Err(ProviderError::InvalidRef(s.to_string()));
        }
        let provider = Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == prefix)
            .ok_or_else(|| ProviderError::UnknownProvider(prefix.to_string()))?;
        Ok(Self::new(provider, key))
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.provider.as_str(), self.key)
    }
}

impl Serialize for ProviderRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_follow_declaration_order() {
        let priorities: Vec<u8> = Provider::ALL.iter().map(|p| p.priority()).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stream_urls() {
        assert_eq!(
            Provider::AutoEmbed.stream_url("https://autoembed.co", "603"),
            "https://autoembed.co/movie/tmdb/603"
        );
        assert_eq!(
            Provider::TwoEmbed.stream_url("https://www.2embed.cc/", "603"),
            "https://www.2embed.cc/embed/tmdb/movie?id=603"
        );
        assert_eq!(
            Provider::MultiEmbed.stream_url("https://multiembed.mov", "603"),
            "https://multiembed.mov/?video_id=603&tmdb=1"
        );
        assert_eq!(
            Provider::EmbedSu.stream_url("https://embed.su", "603"),
            "https://embed.su/embed/movie/603"
        );
    }

    #[test]
    fn test_provider_ref_display_and_parse() {
        let r = ProviderRef::new(Provider::TwoEmbed, "603");
        assert_eq!(r.to_string(), "2embed-603");
        assert_eq!(ProviderRef::parse("2embed-603").unwrap(), r);

        let imdb = ProviderRef::parse("embedsu-tt0133093").unwrap();
        assert_eq!(imdb.provider, Provider::EmbedSu);
        assert_eq!(imdb.key, "tt0133093");

        let dashed = ProviderRef::parse("autoembed-Spider-Man").unwrap();
        assert_eq!(dashed.key, "Spider-Man");
    }

    #[test]
    fn test_provider_ref_parse_errors() {
        assert!(matches!(
            ProviderRef::parse("nodash"),
            Err(ProviderError::InvalidRef(_))
        ));
        assert!(matches!(
            ProviderRef::parse("autoembed-"),
            Err(ProviderError::InvalidRef(_))
        ));
        assert!(matches!(
            ProviderRef::parse("vidsrc-603"),
            Err(ProviderError::UnknownProvider(p)) if p == "vidsrc"
        ));
    }

    #[test]
    fn test_parse_accepts_display_names() {
        assert_eq!(Provider::parse("2Embed"), Some(Provider::TwoEmbed));
        assert_eq!(Provider::parse("multiembed"), Some(Provider::MultiEmbed));
        assert_eq!(Provider::parse("other"), None);
    }
}

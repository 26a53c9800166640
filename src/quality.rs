//! Canonical stream quality vocabulary.
//!
//! Every quality label coming from a provider is normalized into one of six
//! ordered grades. All ranking decisions in the pipeline go through [`Quality::rank`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Quality grades, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "CAM")]
    Cam,
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(rename = "1440p")]
    Qhd1440,
    #[serde(rename = "2160p")]
    Uhd2160,
}

const ALL_QUALITIES: [Quality; 6] = [
    Quality::Cam,
    Quality::Sd,
    Quality::Hd720,
    Quality::FullHd1080,
    Quality::Qhd1440,
    Quality::Uhd2160,
];

impl Quality {
    /// All grades in ascending order.
    pub fn all() -> &'static [Quality] {
        &ALL_QUALITIES
    }

    /// Maps any provider label to a grade. Never fails.
    ///
    /// Matching is a case-insensitive token search with separators ignored, so
    /// `"Full HD"`, `"full-hd"` and `"FHD"` all land on 1080p. Higher tiers are
    /// checked before lower ones because their tokens contain `HD`.
    /// Unrecognized input collapses to [`Quality::Sd`], which means two distinct
    /// low-grade labels can end up in the same bucket.
    pub fn normalize(raw: &str) -> Quality {
        let compact: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if compact.is_empty() {
            return Quality::Sd;
        }

        let has = |tokens: &[&str]| tokens.iter().any(|t| compact.contains(t));

        if has(&["CAM", "TELESYNC"]) {
            Quality::Cam
        } else if has(&["2160", "4K", "UHD"]) {
            Quality::Uhd2160
        } else if has(&["1440", "2K", "QHD"]) {
            Quality::Qhd1440
        } else if has(&["1080", "FULLHD", "FHD"]) {
            Quality::FullHd1080
        } else if has(&["720", "HD"]) {
            Quality::Hd720
        } else {
            Quality::Sd
        }
    }

    /// Position in the ordered vocabulary.
    pub fn rank(self) -> u8 {
        match self {
            Quality::Cam => 0,
            Quality::Sd => 1,
            Quality::Hd720 => 2,
            Quality::FullHd1080 => 3,
            Quality::Qhd1440 => 4,
            Quality::Uhd2160 => 5,
        }
    }

    pub fn compare(self, other: Quality) -> Ordering {
        self.rank().cmp(&other.rank())
    }

    pub fn is_better(self, other: Quality) -> bool {
        self.rank() > other.rank()
    }

    pub fn meets_minimum(self, minimum: Quality) -> bool {
        self.rank() >= minimum.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Cam => "CAM",
            Quality::Sd => "SD",
            Quality::Hd720 => "720p",
            Quality::FullHd1080 => "1080p",
            Quality::Qhd1440 => "1440p",
            Quality::Uhd2160 => "2160p",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Quality::Cam => "CAM",
            Quality::Sd => "SD (480p)",
            Quality::Hd720 => "HD (720p)",
            Quality::FullHd1080 => "Full HD (1080p)",
            Quality::Qhd1440 => "2K (1440p)",
            Quality::Uhd2160 => "4K UHD (2160p)",
        }
    }

    /// Strict parse of a canonical label, used for stored values and settings.
    pub fn parse(s: &str) -> Option<Quality> {
        ALL_QUALITIES
            .iter()
            .copied()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::parse(s).ok_or_else(|| format!("Unknown quality: {}", s))
    }
}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quality {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(*other)
    }
}

/// Anything that can be ranked by quality and provider confidence.
pub trait Ranked {
    fn quality(&self) -> Quality;
    fn score(&self) -> f64;
}

/// Highest quality wins, then highest score. On a full tie the earliest element wins.
pub fn pick_best<T: Ranked>(candidates: &[T]) -> Option<&T> {
    let mut best: Option<&T> = None;
    for candidate in candidates {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let ordering = candidate
                    .quality()
                    .compare(current.quality())
                    .then_with(|| {
                        candidate
                            .score()
                            .partial_cmp(&current.score())
                            .unwrap_or(Ordering::Equal)
                    });
                if ordering == Ordering::Greater {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        name: &'static str,
        quality: Quality,
        score: f64,
    }

    impl Ranked for Item {
        fn quality(&self) -> Quality {
            self.quality
        }
        fn score(&self) -> f64 {
            self.score
        }
    }

    fn item(name: &'static str, quality: Quality, score: f64) -> Item {
        Item {
            name,
            quality,
            score,
        }
    }

    #[test]
    fn test_normalize_known_labels() {
        assert_eq!(Quality::normalize("4K"), Quality::Uhd2160);
        assert_eq!(Quality::normalize("uhd"), Quality::Uhd2160);
        assert_eq!(Quality::normalize("2160p"), Quality::Uhd2160);
        assert_eq!(Quality::normalize("1440p"), Quality::Qhd1440);
        assert_eq!(Quality::normalize("2K"), Quality::Qhd1440);
        assert_eq!(Quality::normalize("FullHD"), Quality::FullHd1080);
        assert_eq!(Quality::normalize("Full HD"), Quality::FullHd1080);
        assert_eq!(Quality::normalize("1080p"), Quality::FullHd1080);
        assert_eq!(Quality::normalize("HD"), Quality::Hd720);
        assert_eq!(Quality::normalize("720p"), Quality::Hd720);
        assert_eq!(Quality::normalize("480p"), Quality::Sd);
        assert_eq!(Quality::normalize("SD"), Quality::Sd);
        assert_eq!(Quality::normalize("HDCAM"), Quality::Cam);
        assert_eq!(Quality::normalize("cam"), Quality::Cam);
    }

    #[test]
    fn test_normalize_is_total() {
        for raw in ["", "   ", "garbage", "???", "日本語", "\n\t", "p", "0"] {
            let q = Quality::normalize(raw);
            assert!(Quality::all().contains(&q), "{raw:?} -> {q:?}");
        }
        assert_eq!(Quality::normalize(""), Quality::Sd);
        assert_eq!(Quality::normalize("unknown"), Quality::Sd);
    }

    #[test]
    fn test_rank_is_strictly_monotonic() {
        let ranks: Vec<u8> = Quality::all().iter().map(|q| q.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
        assert!(Quality::Cam < Quality::Sd);
        assert!(Quality::Qhd1440 < Quality::Uhd2160);
    }

    #[test]
    fn test_meets_minimum_is_reflexive() {
        for q in Quality::all() {
            assert!(q.meets_minimum(*q));
        }
        assert!(Quality::FullHd1080.meets_minimum(Quality::Hd720));
        assert!(!Quality::Sd.meets_minimum(Quality::Hd720));
    }

    #[test]
    fn test_is_better_is_antisymmetric() {
        for a in Quality::all() {
            for b in Quality::all() {
                assert!(!(a.is_better(*b) && b.is_better(*a)));
                if a.rank() == b.rank() {
                    assert!(!a.is_better(*b));
                }
            }
        }
    }

    #[test]
    fn test_compare() {
        assert_eq!(Quality::Hd720.compare(Quality::Sd), Ordering::Greater);
        assert_eq!(Quality::Hd720.compare(Quality::Hd720), Ordering::Equal);
        assert_eq!(Quality::Cam.compare(Quality::Uhd2160), Ordering::Less);
    }

    #[test]
    fn test_pick_best_empty_and_single() {
        let empty: Vec<Item> = Vec::new();
        assert!(pick_best(&empty).is_none());

        let single = vec![item("only", Quality::Cam, 1.0)];
        assert_eq!(pick_best(&single).unwrap().name, "only");
    }

    #[test]
    fn test_pick_best_prefers_quality_then_score() {
        let items = vec![
            item("a", Quality::Hd720, 99.0),
            item("b", Quality::FullHd1080, 50.0),
            item("c", Quality::FullHd1080, 80.0),
        ];
        assert_eq!(pick_best(&items).unwrap().name, "c");
    }

    #[test]
    fn test_pick_best_tie_keeps_first() {
        let items = vec![
            item("first", Quality::Hd720, 70.0),
            item("second", Quality::Hd720, 70.0),
        ];
        assert_eq!(pick_best(&items).unwrap().name, "first");
    }

    #[test]
    fn test_pick_best_returns_member_of_input() {
        let items = vec![
            item("x", Quality::Sd, 10.0),
            item("y", Quality::Uhd2160, f64::NAN),
            item("z", Quality::Uhd2160, 5.0),
        ];
        let best = pick_best(&items).unwrap();
        assert!(items.iter().any(|i| std::ptr::eq(i, best)));
        assert_eq!(best.quality, Quality::Uhd2160);
    }

    #[test]
    fn test_parse_and_display() {
        for q in Quality::all() {
            assert_eq!(Quality::parse(q.as_str()), Some(*q));
            assert_eq!(q.to_string().parse::<Quality>().unwrap(), *q);
        }
        assert_eq!(Quality::parse("1080P"), Some(Quality::FullHd1080));
        assert!(Quality::parse("FullHD").is_none());
        assert_eq!(Quality::Uhd2160.display_name(), "4K UHD (2160p)");
    }

    #[test]
    fn test_serde_uses_canonical_labels() {
        let json = serde_json::to_string(&Quality::FullHd1080).unwrap();
        assert_eq!(json, "\"1080p\"");
        let q: Quality = serde_json::from_str("\"CAM\"").unwrap();
        assert_eq!(q, Quality::Cam);
    }
}

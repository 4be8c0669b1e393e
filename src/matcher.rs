//! Keyword matching against transcript text
//!
//! Matching is substring containment over a normalized form (lowercase, all
//! whitespace removed). The first trigger in configuration order wins, so a
//! short keyword can shadow a longer one that contains it ("go" matches
//! inside "mango"). Order the configuration accordingly.

use serde::{Deserialize, Serialize};

/// A configured keyword and the volume it plays at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Keyword as written in the configuration
    pub keyword: String,

    /// Normalized keyword used for matching
    #[serde(skip)]
    normalized: String,

    /// Playback volume in `[0, 2]`
    pub volume: f64,
}

impl Trigger {
    /// Create a trigger, normalizing the keyword for matching
    #[must_use]
    pub fn new(keyword: impl Into<String>, volume: f64) -> Self {
        let keyword = keyword.into();
        let normalized = normalize(&keyword);
        Self {
            keyword,
            normalized,
            volume: crate::playback::clamp_volume(volume),
        }
    }

    /// Normalized keyword
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Rebuild the normalized form after deserialization
    #[must_use]
    pub fn renormalized(self) -> Self {
        Self::new(self.keyword, self.volume)
    }
}

/// Lowercase and strip all whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Find the first trigger whose keyword occurs in `text`
#[must_use]
pub fn match_keyword<'a>(text: &str, triggers: &'a [Trigger]) -> Option<&'a Trigger> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }

    triggers
        .iter()
        .find(|t| !t.normalized.is_empty() && normalized.contains(&t.normalized))
}

/// Triggers for display, one per keyword regardless of case
///
/// Matching still uses the full list.
#[must_use]
pub fn display_triggers(triggers: &[Trigger]) -> Vec<Trigger> {
    let mut seen = std::collections::HashSet::new();
    triggers
        .iter()
        .filter(|t| seen.insert(t.keyword.trim().to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<Trigger> {
        vec![
            Trigger::new("good morning", 1.0),
            Trigger::new("bell", 0.5),
            Trigger::new("go", 1.5),
        ]
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize("  Good\tMor ning\n"), "goodmorning");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn matches_ignoring_spacing() {
        let triggers = table();
        let hit = match_keyword("GoodMorning everyone", &triggers).unwrap();
        assert_eq!(hit.keyword, "good morning");

        let hit = match_keyword("ring the b e l l", &triggers).unwrap();
        assert_eq!(hit.keyword, "bell");
    }

    #[test]
    fn first_configured_trigger_wins() {
        let triggers = table();
        // Both "bell" and "go" occur; "bell" is configured first
        let hit = match_keyword("go ring the bell", &triggers).unwrap();
        assert_eq!(hit.keyword, "bell");
    }

    #[test]
    fn substring_overlap_is_reported_as_match() {
        let triggers = table();
        let hit = match_keyword("I like mango", &triggers).unwrap();
        assert_eq!(hit.keyword, "go");
    }

    #[test]
    fn no_match() {
        assert!(match_keyword("nothing here", &table()).is_none());
        assert!(match_keyword("   ", &table()).is_none());
        assert!(match_keyword("anything", &[]).is_none());
    }

    #[test]
    fn empty_keyword_never_matches() {
        let triggers = vec![Trigger::new("  ", 1.0)];
        assert!(match_keyword("hello", &triggers).is_none());
    }

    #[test]
    fn matching_is_deterministic() {
        let triggers = table();
        for text in ["go", "bell go", "xyz", "Good morning bell"] {
            assert_eq!(
                match_keyword(text, &triggers),
                match_keyword(text, &triggers)
            );
        }
    }

    #[test]
    fn display_dedupes_by_keyword() {
        let triggers = vec![
            Trigger::new("Bell", 1.0),
            Trigger::new("bell", 0.2),
            Trigger::new("horn", 1.0),
        ];
        let shown = display_triggers(&triggers);
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].keyword, "Bell");
        assert_eq!(shown[1].keyword, "horn");
    }

    #[test]
    fn trigger_volume_is_clamped() {
        assert!((Trigger::new("a", 9.0).volume - 2.0).abs() < f64::EPSILON);
        assert!(Trigger::new("a", -1.0).volume.abs() < f64::EPSILON);
    }

    #[test]
    fn deserialized_trigger_renormalizes() {
        let t: Trigger = serde_json::from_str(r#"{"keyword":"Big Bell","volume":1.0}"#).unwrap();
        assert_eq!(t.normalized(), "");
        assert_eq!(t.renormalized().normalized(), "bigbell");
    }
}

// Text cleanup module
// Strips store decorations such as "[Explicit]" from scrobbled metadata

use crate::config::CleanupConfig;
use crate::scrobbler::ScrobbleData;
use regex::Regex;

pub struct TextCleaner {
    patterns: Vec<Regex>,
}

impl TextCleaner {
    /// Compile the configured patterns; invalid ones are skipped
    pub fn new(config: &CleanupConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let patterns = config
            .patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Invalid regex pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Remove every pattern from the text
    pub fn clean(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }

        let mut result = text.to_string();
        for pattern in &self.patterns {
            result = pattern.replace_all(&result, "").into_owned();
        }

        result.trim().to_string()
    }

    /// Clean artist, track and album of a scrobble payload
    pub fn clean_scrobble(&self, data: ScrobbleData) -> ScrobbleData {
        ScrobbleData {
            artist: self.clean(&data.artist),
            track: self.clean(&data.track),
            album: data.album.map(|album| self.clean(&album)),
            duration: data.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns_strip_explicit_markers() {
        let cleaner = TextCleaner::new(&CleanupConfig::default());
        assert_eq!(cleaner.clean("Song [Explicit]"), "Song");
        assert_eq!(cleaner.clean("Song (Clean)"), "Song");
        assert_eq!(cleaner.clean("Album - Explicit"), "Album");
        assert_eq!(cleaner.clean("Plain Title"), "Plain Title");
    }

    #[test]
    fn disabled_cleanup_leaves_text_alone() {
        let config = CleanupConfig {
            enabled: false,
            ..CleanupConfig::default()
        };
        let cleaner = TextCleaner::new(&config);
        assert_eq!(cleaner.clean("  Song [Explicit] "), "  Song [Explicit] ");
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let config = CleanupConfig {
            enabled: true,
            patterns: vec!["(".to_string(), r"\s*\[Live\]".to_string()],
        };
        let cleaner = TextCleaner::new(&config);
        assert_eq!(cleaner.clean("Song [Live]"), "Song");
    }

    #[test]
    fn cleans_every_scrobble_field_but_duration() {
        let cleaner = TextCleaner::new(&CleanupConfig::default());
        let data = cleaner.clean_scrobble(ScrobbleData {
            artist: "Band".to_string(),
            track: "Song [Explicit]".to_string(),
            album: Some("LP (Explicit)".to_string()),
            duration: Some(180),
        });

        assert_eq!(data.track, "Song");
        assert_eq!(data.album.as_deref(), Some("LP"));
        assert_eq!(data.duration, Some(180));
    }
}

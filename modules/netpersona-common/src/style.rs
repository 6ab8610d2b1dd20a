use std::collections::HashMap;

use crate::types::{Platform, StyleRule};

/// Per-platform reply style rules. A platform without a rule cannot be
/// replied to.
#[derive(Debug, Clone, Default)]
pub struct StyleBook {
    rules: HashMap<Platform, StyleRule>,
}

impl StyleBook {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in rules. Bluesky is intentionally absent.
    pub fn defaults() -> Self {
        Self::empty()
            .with_rule(
                Platform::X,
                StyleRule::new(
                    280,
                    "Abbreviations if needed, no hashtags unless relevant, casual but professional.",
                ),
            )
            .with_rule(
                Platform::Threads,
                StyleRule::new(500, "Conversational, threading-friendly, casual."),
            )
            .with_rule(
                Platform::LinkedIn,
                StyleRule::new(700, "Professional, constructive, slightly more formal."),
            )
            .with_rule(
                Platform::DevTo,
                StyleRule::new(
                    1000,
                    "Technical, in-depth, explanatory, code-friendly, professional.",
                ),
            )
            .with_rule(
                Platform::Instagram,
                StyleRule::new(400, "Casual, helpful, Instagram-native."),
            )
    }

    pub fn with_rule(mut self, platform: Platform, rule: StyleRule) -> Self {
        self.rules.insert(platform, rule);
        self
    }

    pub fn without(mut self, platform: Platform) -> Self {
        self.rules.remove(&platform);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&StyleRule> {
        self.rules.get(&platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_original_platforms_but_not_bluesky() {
        let book = StyleBook::defaults();
        assert_eq!(book.get(Platform::X).map(|r| r.char_limit), Some(280));
        assert!(book.get(Platform::LinkedIn).is_some());
        assert!(book.get(Platform::Bluesky).is_none());
    }

    #[test]
    fn without_removes_rule() {
        let book = StyleBook::defaults().without(Platform::X);
        assert!(book.get(Platform::X).is_none());
    }
}

//! Hard constraints on a generated reply. A draft that violates any of them
//! is rejected, never trimmed into shape.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use netpersona_common::EngagementContext;

use crate::persona::Persona;

static SOLICITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:follow (?:me|us|for more)|like and (?:share|subscribe)|smash (?:that|the) like|link in (?:my )?bio|check out my (?:profile|page|channel)|subscribe to my|dm me|me siga|sigam)\b",
    )
    .unwrap()
});

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#[\p{L}\p{N}_]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Violation {
    Empty,
    TooLong { chars: usize, limit: usize },
    BannedPhrase(String),
    Solicitation(String),
    TooManyEmojis { count: usize, max: usize },
    Hashtag(String),
    LanguageMismatch { expected: String, got: String },
    ConfidenceOutOfRange(i64),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "reply is empty"),
            Violation::TooLong { chars, limit } => {
                write!(f, "reply is {chars} characters, limit is {limit}")
            }
            Violation::BannedPhrase(phrase) => write!(f, "uses banned phrase \"{phrase}\""),
            Violation::Solicitation(text) => write!(f, "solicits engagement (\"{text}\")"),
            Violation::TooManyEmojis { count, max } => {
                write!(f, "uses {count} emojis, at most {max} allowed")
            }
            Violation::Hashtag(tag) => write!(f, "uses hashtag {tag}"),
            Violation::LanguageMismatch { expected, got } => {
                write!(f, "written in \"{got}\", post is in \"{expected}\"")
            }
            Violation::ConfidenceOutOfRange(n) => write!(f, "confidence {n} is outside 0-100"),
        }
    }
}

/// A raw draft as the model returned it, before any checks.
#[derive(Debug, Clone)]
pub struct Draft {
    pub text: String,
    pub language: String,
    pub confidence: i64,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct ReplyConstraints {
    pub char_limit: usize,
    banned: Vec<String>,
    pub max_emojis: usize,
    pub allow_hashtags: bool,
    pub language: String,
}

impl ReplyConstraints {
    pub fn for_context(persona: &Persona, context: &EngagementContext) -> Self {
        Self {
            char_limit: context.style.char_limit,
            banned: persona
                .banned_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            max_emojis: persona.max_emojis,
            allow_hashtags: persona.allow_hashtags,
            language: context.language.clone(),
        }
    }

    /// Every violation in `draft`. Empty means the draft is acceptable.
    pub fn check(&self, draft: &Draft) -> Vec<Violation> {
        let mut violations = Vec::new();
        let text = draft.text.trim();

        if text.is_empty() {
            violations.push(Violation::Empty);
        }

        let chars = text.chars().count();
        if chars > self.char_limit {
            violations.push(Violation::TooLong {
                chars,
                limit: self.char_limit,
            });
        }

        let lowered = text.to_lowercase();
        for phrase in &self.banned {
            if lowered.contains(phrase.as_str()) {
                violations.push(Violation::BannedPhrase(phrase.clone()));
            }
        }

        if let Some(m) = SOLICITATION_RE.find(text) {
            violations.push(Violation::Solicitation(m.as_str().to_string()));
        }

        let emojis = text.chars().filter(|c| is_emoji(*c)).count();
        if emojis > self.max_emojis {
            violations.push(Violation::TooManyEmojis {
                count: emojis,
                max: self.max_emojis,
            });
        }

        if !self.allow_hashtags {
            if let Some(m) = HASHTAG_RE.find(text) {
                violations.push(Violation::Hashtag(m.as_str().trim().to_string()));
            }
        }

        if primary_subtag(&draft.language) != primary_subtag(&self.language) {
            violations.push(Violation::LanguageMismatch {
                expected: self.language.clone(),
                got: draft.language.clone(),
            });
        }

        if !(0..=100).contains(&draft.confidence) {
            violations.push(Violation::ConfidenceOutOfRange(draft.confidence));
        }

        violations
    }
}

/// "pt-BR" -> "pt".
pub fn primary_subtag(language: &str) -> String {
    language
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF   // pictographs, emoticons, transport, symbols
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2B00..=0x2BFF // arrows, stars
    )
}

//! Relevance filter. Cheap deterministic checks first, then one small model
//! call with no persona and no retrieved context. Fails closed.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use netpersona_common::{CandidateContent, Category, Platform, RelevanceVerdict};

use crate::error::FilterError;
use crate::traits::{extract_structured, RelevanceFilter, StructuredModel};

const DEFAULT_ALLOW: &[&str] = &[
    "software engineering, coding, architecture",
    "AI, machine learning, data science",
    "tech industry trends, startups",
    "career development in tech",
    "developer tools, frameworks, languages",
    "system design, DevOps, cloud",
    "open source projects",
    "technical opinions or hot takes",
];

const DEFAULT_DENY: &[&str] = &[
    "crypto",
    "cryptocurrency",
    "bitcoin",
    "forex",
    "trading signals",
    "stock tips",
    "politics",
    "election",
    "elections",
    "religion",
    "prayer",
    "bible",
    "giveaway",
    "discount code",
    "promo code",
    "affiliate link",
    "rise and grind",
    "believe in yourself",
    "motivation monday",
];

static LANGUAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[a-z0-9]{2,8})?$").unwrap());

static DEFAULT_DENY_RE: LazyLock<Regex> =
    LazyLock::new(|| deny_regex(DEFAULT_DENY.iter().copied()).unwrap());

/// Word-boundary, case-insensitive alternation over `terms`.
fn deny_regex<'a>(terms: impl IntoIterator<Item = &'a str>) -> Result<Regex, regex::Error> {
    let alternation = terms
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
}

// ---------------------------------------------------------------------------
// TopicPolicy
// ---------------------------------------------------------------------------

/// Topics to approve and topics to reject outright.
#[derive(Debug, Clone)]
pub struct TopicPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
    deny_re: Regex,
}

impl TopicPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Result<Self, regex::Error> {
        let deny_re = deny_regex(deny.iter().map(String::as_str))?;
        Ok(Self {
            allow,
            deny,
            deny_re,
        })
    }

    /// First deny term found in `text`, as written in the text.
    pub fn denied_term<'t>(&self, text: &'t str) -> Option<&'t str> {
        if self.deny.is_empty() {
            return None;
        }
        self.deny_re.find(text).map(|m| m.as_str())
    }

    fn system_prompt(&self) -> String {
        let allow = self
            .allow
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        let deny = self
            .deny
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a content filter for a senior software engineer's social media presence.\n\
             Your only job is to decide whether a post is worth replying to, categorize it, \
             and detect its language.\n\n\
             ## REJECT if the post is about\n\
             - finance, investments, crypto trading\n\
             - politics or political opinions\n\
             - religion or spiritual content\n\
             - sales pitches, product promotions, affiliate marketing\n\
             - memes without technical depth\n\
             - generic motivational or self-help content\n\
             - anything too vague to understand\n\
             Also reject anything mentioning:\n{deny}\n\n\
             ## APPROVE if the post is about\n{allow}\n\n\
             ## LANGUAGE\n\
             Return a lowercase ISO code: 'en', 'pt-br', 'es'.\n\n\
             Be decisive. When in doubt, REJECT."
        )
    }
}

impl Default for TopicPolicy {
    fn default() -> Self {
        Self {
            allow: DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect(),
            deny: DEFAULT_DENY.iter().map(|s| s.to_string()).collect(),
            deny_re: DEFAULT_DENY_RE.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct JudgeResponse {
    /// True if the post is worth replying to.
    should_engage: bool,
    category: Category,
    /// Detected language code: 'en', 'pt-br', 'es'.
    language: String,
    /// Brief reason for the verdict.
    rationale: String,
}

pub struct Judge {
    model: Arc<dyn StructuredModel>,
    policy: TopicPolicy,
    system_prompt: String,
}

impl Judge {
    pub fn new(model: Arc<dyn StructuredModel>, policy: TopicPolicy) -> Self {
        let system_prompt = policy.system_prompt();
        Self {
            model,
            policy,
            system_prompt,
        }
    }

    /// Rejections that need no model call.
    fn pre_check(&self, candidate: &CandidateContent) -> Option<RelevanceVerdict> {
        if candidate.platform() == Platform::LinkedIn && is_organisation(candidate) {
            return Some(RelevanceVerdict {
                should_engage: false,
                category: Category::Other,
                language: "und".into(),
                rationale: "Author is a company or school page, not a person".into(),
            });
        }

        self.policy
            .denied_term(&candidate.body)
            .map(|term| RelevanceVerdict {
                should_engage: false,
                category: Category::Other,
                language: "und".into(),
                rationale: format!("Deny-listed topic: {term}"),
            })
    }

    fn user_prompt(candidate: &CandidateContent) -> String {
        format!(
            "Analyze this {platform} post:\n\
             - Author: @{author}\n\
             - Content: \"{body}\"\n\
             - Media type: {media:?}\n\n\
             Should we engage with this post? Categorize it and detect the language.",
            platform = candidate.platform(),
            author = candidate.author.handle,
            body = candidate.body,
            media = candidate.media_kind(),
        )
    }
}

fn is_organisation(candidate: &CandidateContent) -> bool {
    let by_url = candidate
        .author
        .profile_url
        .as_deref()
        .is_some_and(|url| url.contains("/company/") || url.contains("/school/"));
    by_url || candidate.author.handle.contains("/posts")
}

/// Boundary validation of the model's answer.
fn validate(response: JudgeResponse) -> Result<RelevanceVerdict, FilterError> {
    let language = response.language.trim().to_lowercase().replace('_', "-");
    if !LANGUAGE_RE.is_match(&language) {
        return Err(FilterError::Malformed(format!(
            "language {:?} is not a language code",
            response.language
        )));
    }
    Ok(RelevanceVerdict {
        should_engage: response.should_engage,
        category: response.category,
        language,
        rationale: response.rationale.trim().to_string(),
    })
}

#[async_trait]
impl RelevanceFilter for Judge {
    async fn evaluate(&self, candidate: &CandidateContent) -> Result<RelevanceVerdict, FilterError> {
        if let Some(verdict) = self.pre_check(candidate) {
            info!(candidate = %candidate.key, rationale = %verdict.rationale, "Hard block");
            return Ok(verdict);
        }

        let prompt = Self::user_prompt(candidate);
        let response = extract_structured::<JudgeResponse>(&*self.model, &self.system_prompt, &prompt)
            .await
            .map_err(|e| FilterError::Upstream(e.to_string()))?
            .map_err(|e| FilterError::Malformed(e.to_string()))?;

        let verdict = validate(response).inspect_err(|e| {
            warn!(candidate = %candidate.key, error = %e, "Rejected filter output");
        })?;

        info!(
            candidate = %candidate.key,
            should_engage = verdict.should_engage,
            category = verdict.category.as_str(),
            language = %verdict.language,
            "Verdict"
        );
        Ok(verdict)
    }
}

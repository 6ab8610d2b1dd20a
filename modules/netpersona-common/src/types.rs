use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Platform / identity
// ---------------------------------------------------------------------------

/// Social platform a candidate was discovered on. Also the budget channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "twitter")]
    X,
    Threads,
    LinkedIn,
    Instagram,
    Bluesky,
    DevTo,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::X,
        Platform::Threads,
        Platform::LinkedIn,
        Platform::Instagram,
        Platform::Bluesky,
        Platform::DevTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::Threads => "threads",
            Platform::LinkedIn => "linkedin",
            Platform::Instagram => "instagram",
            Platform::Bluesky => "bluesky",
            Platform::DevTo => "devto",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "x" | "twitter" => Ok(Platform::X),
            "threads" => Ok(Platform::Threads),
            "linkedin" => Ok(Platform::LinkedIn),
            "instagram" => Ok(Platform::Instagram),
            "bluesky" => Ok(Platform::Bluesky),
            "devto" | "dev.to" => Ok(Platform::DevTo),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// (platform, external id): unique together. The dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateKey {
    pub platform: Platform,
    pub external_id: String,
}

impl CandidateKey {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.external_id)
    }
}

// ---------------------------------------------------------------------------
// CandidateContent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub follower_count: Option<u64>,
    /// Excerpts of the author's recent posts, newest first.
    #[serde(default)]
    pub recent_activity: Vec<String>,
}

impl Author {
    pub fn handle(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Text,
    Image,
    Video,
    Carousel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub reply_count: u32,
    pub like_count: u32,
    #[serde(default)]
    pub share_count: u32,
    #[serde(default)]
    pub view_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingReply {
    pub author_handle: String,
    pub text: String,
}

/// One unit of third-party content considered for engagement.
/// Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(flatten)]
    pub key: CandidateKey,
    pub author: Author,
    pub body: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub metrics: EngagementMetrics,
    #[serde(default)]
    pub replies: Vec<ExistingReply>,
    pub posted_at: DateTime<Utc>,
}

impl CandidateContent {
    pub fn new(
        platform: Platform,
        external_id: impl Into<String>,
        author_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            key: CandidateKey::new(platform, external_id),
            author: Author::handle(author_handle),
            body: body.into(),
            media: None,
            metrics: EngagementMetrics::default(),
            replies: Vec::new(),
            posted_at: Utc::now(),
        }
    }

    pub fn with_author(mut self, author: Author) -> Self {
        self.author = author;
        self
    }

    pub fn with_metrics(mut self, reply_count: u32, like_count: u32) -> Self {
        self.metrics.reply_count = reply_count;
        self.metrics.like_count = like_count;
        self
    }

    pub fn with_media(mut self, kind: MediaKind, url: impl Into<String>) -> Self {
        self.media = Some(MediaRef {
            kind,
            url: url.into(),
        });
        self
    }

    pub fn with_replies(mut self, replies: Vec<ExistingReply>) -> Self {
        self.replies = replies;
        self
    }

    pub fn platform(&self) -> Platform {
        self.key.platform
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media.as_ref().map(|m| m.kind).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Relevance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Category {
    Technical,
    Career,
    Networking,
    Opinion,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technical => "Technical",
            Category::Career => "Career",
            Category::Networking => "Networking",
            Category::Opinion => "Opinion",
            Category::Other => "Other",
        }
    }
}

/// Output of the relevance filter. Produced once per candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub should_engage: bool,
    pub category: Category,
    /// Lowercase ISO-style code: "en", "pt-br", "es".
    pub language: String,
    pub rationale: String,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngagementStrength {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorExcerpt {
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TechnicalLevel {
    Beginner,
    Intermediate,
    Expert,
    NonTechnical,
}

/// Audience profile summary for the author of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudienceDossier {
    /// Brief summary of the profile.
    pub summary: String,
    pub technical_level: TechnicalLevel,
    /// Likely job role or position.
    pub job_title: String,
    /// True if the author sells hype without substance.
    pub is_hype_seller: bool,
    pub tone_preference: String,
    /// Main topics of interest.
    pub interests: Vec<String>,
    /// Tactical advice for the reply.
    pub interaction_guidelines: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRule {
    pub char_limit: usize,
    pub tone: String,
}

impl StyleRule {
    pub fn new(char_limit: usize, tone: impl Into<String>) -> Self {
        Self {
            char_limit,
            tone: tone.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubSource {
    PriorResponses,
    AudienceProfile,
    ExistingReplies,
}

/// An optional sub-source that contributed nothing to a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyGap {
    pub source: SubSource,
    pub reason: String,
}

/// Everything the generator needs for one candidate. Built fresh per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementContext {
    pub key: CandidateKey,
    pub author_handle: String,
    pub body: String,
    pub media: Option<MediaRef>,
    pub reply_count: u32,
    pub like_count: u32,
    pub category: Category,
    pub language: String,
    pub strength: EngagementStrength,
    pub strategy: String,
    pub audience_profile: Option<AudienceDossier>,
    pub prior_excerpts: Option<Vec<PriorExcerpt>>,
    pub existing_replies: Option<Vec<ExistingReply>>,
    pub style: StyleRule,
    pub gaps: Vec<AssemblyGap>,
}

// ---------------------------------------------------------------------------
// Generation / decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub text: String,
    /// Self-reported, 0..=100.
    pub confidence: u8,
    pub rationale: String,
    pub attempts: u8,
}

/// Pipeline stage that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ledger,
    Filter,
    Context,
    Generator,
    Gate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ledger => "ledger",
            Stage::Filter => "filter",
            Stage::Context => "context",
            Stage::Generator => "generator",
            Stage::Gate => "gate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Act,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    BudgetExhausted,
    Irrelevant,
    FilterError,
    AssemblyFailed,
    GenerationFailed,
    GenerationTimeout,
    LowConfidence,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Duplicate => "duplicate",
            SkipReason::BudgetExhausted => "budget_exhausted",
            SkipReason::Irrelevant => "irrelevant",
            SkipReason::FilterError => "filter_error",
            SkipReason::AssemblyFailed => "assembly_failed",
            SkipReason::GenerationFailed => "generation_failed",
            SkipReason::GenerationTimeout => "generation_timeout",
            SkipReason::LowConfidence => "low_confidence",
        }
    }
}

/// Terminal, immutable result of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub key: CandidateKey,
    pub run_id: Uuid,
    pub outcome: Outcome,
    pub reason: Option<SkipReason>,
    pub response_text: Option<String>,
    pub confidence: Option<u8>,
    pub rationale: String,
    pub stage: Stage,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn act(key: CandidateKey, run_id: Uuid, response: &GeneratedResponse) -> Self {
        Self {
            key,
            run_id,
            outcome: Outcome::Act,
            reason: None,
            response_text: Some(response.text.clone()),
            confidence: Some(response.confidence),
            rationale: response.rationale.clone(),
            stage: Stage::Gate,
            decided_at: Utc::now(),
        }
    }

    pub fn skip(
        key: CandidateKey,
        run_id: Uuid,
        stage: Stage,
        reason: SkipReason,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            key,
            run_id,
            outcome: Outcome::Skip,
            reason: Some(reason),
            response_text: None,
            confidence: None,
            rationale: rationale.into(),
            stage,
            decided_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn is_act(&self) -> bool {
        self.outcome == Outcome::Act
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Interaction count for one channel on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBudgetState {
    pub date: NaiveDate,
    pub platform: Platform,
    pub count: u32,
    pub cap: u32,
}

impl DailyBudgetState {
    pub fn is_exhausted(&self) -> bool {
        self.count >= self.cap
    }

    pub fn remaining(&self) -> u32 {
        self.cap.saturating_sub(self.count)
    }
}

impl fmt::Display for DailyBudgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}/{} interactions",
            self.date, self.platform, self.count, self.cap
        )
    }
}

//! Context assembly: everything the generator needs, from optional sources.
//!
//! Only the style rule is mandatory. Similar prior responses, the audience
//! profile and existing replies each resolve to either a value or a recorded
//! [`AssemblyGap`]; a gap never fails the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use netpersona_common::{
    AssemblyGap, AudienceDossier, CandidateContent, EngagementContext, EngagementStrength,
    ExistingReply, PriorExcerpt, RelevanceVerdict, SubSource,
};

use crate::error::AssemblyError;
use crate::traits::{AudienceProfiler, ContextBuilder, ProfileLookup, SimilaritySearch, StyleRules};

pub const SNIPPET_BYTES: usize = 500;
pub const DEFAULT_SIMILAR_LIMIT: usize = 2;

pub fn classify_strength(reply_count: u32) -> EngagementStrength {
    match reply_count {
        0 => EngagementStrength::Low,
        1..=10 => EngagementStrength::Medium,
        _ => EngagementStrength::High,
    }
}

pub fn strategy_hint(strength: EngagementStrength) -> &'static str {
    match strength {
        EngagementStrength::High => "engage with specific points already raised",
        EngagementStrength::Medium => "add a constructive, non-redundant perspective",
        EngagementStrength::Low => "initiate discussion, be provocative but civil",
    }
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
pub fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

type Fetched<T> = Result<T, AssemblyGap>;

fn keep<T>(fetched: Fetched<T>, gaps: &mut Vec<AssemblyGap>) -> Option<T> {
    match fetched {
        Ok(value) => Some(value),
        Err(g) => {
            gaps.push(g);
            None
        }
    }
}

fn gap(source: SubSource, reason: impl Into<String>) -> AssemblyGap {
    AssemblyGap {
        source,
        reason: reason.into(),
    }
}

pub struct ContextAssembler {
    styles: Arc<dyn StyleRules>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    profiler: Option<Arc<dyn AudienceProfiler>>,
    profile_timeout: Duration,
    similar_limit: usize,
}

impl ContextAssembler {
    pub fn new(styles: Arc<dyn StyleRules>) -> Self {
        Self {
            styles,
            similarity: None,
            profiler: None,
            profile_timeout: Duration::from_secs(30),
            similar_limit: DEFAULT_SIMILAR_LIMIT,
        }
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn SimilaritySearch>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn with_profiler(mut self, profiler: Arc<dyn AudienceProfiler>, timeout: Duration) -> Self {
        self.profiler = Some(profiler);
        self.profile_timeout = timeout;
        self
    }

    pub fn with_similar_limit(mut self, limit: usize) -> Self {
        self.similar_limit = limit;
        self
    }

    async fn prior_excerpts(&self, body: &str) -> Fetched<Vec<PriorExcerpt>> {
        let source = SubSource::PriorResponses;
        let Some(similarity) = &self.similarity else {
            return Err(gap(source, "no similarity index configured"));
        };

        let snippet = truncate_at_char_boundary(body, SNIPPET_BYTES);
        match similarity.similar_responses(snippet, self.similar_limit).await {
            Ok(excerpts) if excerpts.is_empty() => Err(gap(source, "no similar prior responses")),
            Ok(mut excerpts) => {
                excerpts.truncate(self.similar_limit);
                Ok(excerpts)
            }
            Err(e) => Err(gap(source, format!("similarity search failed: {e}"))),
        }
    }

    async fn audience_profile(&self, candidate: &CandidateContent) -> Fetched<AudienceDossier> {
        let source = SubSource::AudienceProfile;
        let Some(profiler) = &self.profiler else {
            return Err(gap(source, "no profiler configured"));
        };

        let lookup = tokio::time::timeout(
            self.profile_timeout,
            profiler.profile(&candidate.author, candidate.platform()),
        )
        .await;

        match lookup {
            Ok(Ok(ProfileLookup::Found(dossier))) => Ok(dossier),
            Ok(Ok(ProfileLookup::Unavailable)) => Err(gap(source, "profile unavailable")),
            Ok(Err(e)) => Err(gap(source, format!("profile lookup failed: {e}"))),
            Err(_) => Err(gap(
                source,
                format!("profile lookup timed out after {:?}", self.profile_timeout),
            )),
        }
    }

    fn existing_replies(candidate: &CandidateContent) -> Fetched<Vec<ExistingReply>> {
        if candidate.replies.is_empty() {
            return Err(gap(SubSource::ExistingReplies, "no existing replies"));
        }
        Ok(candidate.replies.clone())
    }
}

#[async_trait]
impl ContextBuilder for ContextAssembler {
    async fn build(
        &self,
        candidate: &CandidateContent,
        verdict: &RelevanceVerdict,
    ) -> Result<EngagementContext, AssemblyError> {
        let platform = candidate.platform();
        let style = self
            .styles
            .style_for(platform)
            .ok_or(AssemblyError::StyleRuleMissing(platform))?;

        let (excerpts, profile) = tokio::join!(
            self.prior_excerpts(&candidate.body),
            self.audience_profile(candidate),
        );
        let replies = Self::existing_replies(candidate);

        let mut gaps = Vec::new();
        let prior_excerpts = keep(excerpts, &mut gaps);
        let audience_profile = keep(profile, &mut gaps);
        let existing_replies = keep(replies, &mut gaps);

        let strength = classify_strength(candidate.metrics.reply_count);
        if !gaps.is_empty() {
            warn!(
                candidate = %candidate.key,
                gaps = gaps.len(),
                "Context assembled with gaps"
            );
        }
        info!(candidate = %candidate.key, ?strength, "Context built");

        Ok(EngagementContext {
            key: candidate.key.clone(),
            author_handle: candidate.author.handle.clone(),
            body: candidate.body.clone(),
            media: candidate.media.clone(),
            reply_count: candidate.metrics.reply_count,
            like_count: candidate.metrics.like_count,
            category: verdict.category,
            language: verdict.language.clone(),
            strength,
            strategy: strategy_hint(strength).to_string(),
            audience_profile,
            prior_excerpts,
            existing_replies,
            style,
            gaps,
        })
    }
}

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::info;

use netpersona_common::{AudienceDossier, Author, Platform};

use crate::traits::{extract_structured, AudienceProfiler, ProfileLookup, StructuredModel};

const MAX_POSTS: usize = 10;
const POST_EXCERPT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You profile social media users so a senior software engineer \
can reply to them at the right level. Analyze the bio and recent activity and produce a \
concise dossier. Flag people who sell hype without substance. Be specific in the \
interaction guidelines: what to say, what to avoid.";

/// Audience profile built by a model from the author's public bio and recent posts.
pub struct ProfileAnalyzer {
    model: Arc<dyn StructuredModel>,
}

impl ProfileAnalyzer {
    pub fn new(model: Arc<dyn StructuredModel>) -> Self {
        Self { model }
    }

    fn prompt(author: &Author, platform: Platform) -> String {
        let posts = author
            .recent_activity
            .iter()
            .take(MAX_POSTS)
            .map(|post| format!("- {}", post.chars().take(POST_EXCERPT_CHARS).collect::<String>()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Platform: {platform}\n\
             Username: @{handle}\n\
             Name: {name}\n\
             Followers: {followers}\n\
             Bio: {bio}\n\n\
             Recent activity:\n{posts}",
            handle = author.handle,
            name = author.display_name.as_deref().unwrap_or("unknown"),
            followers = author
                .follower_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".into()),
            bio = author.bio.as_deref().unwrap_or("(none)"),
            posts = if posts.is_empty() { "(none)".to_string() } else { posts },
        )
    }
}

#[async_trait]
impl AudienceProfiler for ProfileAnalyzer {
    async fn profile(&self, author: &Author, platform: Platform) -> Result<ProfileLookup> {
        let has_bio = author.bio.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_bio && author.recent_activity.is_empty() {
            return Ok(ProfileLookup::Unavailable);
        }

        let prompt = Self::prompt(author, platform);
        let dossier = extract_structured::<AudienceDossier>(&*self.model, SYSTEM_PROMPT, &prompt)
            .await?
            .map_err(|e| anyhow!("Malformed dossier: {e}"))?;

        info!(author = %author.handle, level = ?dossier.technical_level, "Profile analyzed");
        Ok(ProfileLookup::Found(dossier))
    }
}

//! Reply generation in the persona's voice.
//!
//! A bounded loop: at most [`MAX_ATTEMPTS`] calls. A failed call or a draft
//! that breaks a hard constraint earns one retry with a stricter prompt that
//! names what went wrong. Drafts are never truncated to fit.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use netpersona_common::{EngagementContext, GeneratedResponse};

use crate::constraints::{Draft, ReplyConstraints, Violation};
use crate::error::GenerationError;
use crate::persona::Persona;
use crate::traits::{extract_structured, ContentGenerator, StructuredModel};

pub const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Deserialize, JsonSchema)]
struct GhostwriterOutput {
    /// The reply text, in the post's language.
    reply_text: String,
    /// Language code of the reply: 'en', 'pt-br', 'es'.
    language: String,
    /// 0-100: how confident you are this reply is worth posting.
    confidence_score: i64,
    /// Brief reason for the chosen tone and content.
    rationale: String,
}

enum AttemptFailure {
    Call(String),
    Violations(Vec<Violation>),
}

pub struct Ghostwriter {
    model: Arc<dyn StructuredModel>,
    persona: Persona,
    system_prompt: String,
}

impl Ghostwriter {
    pub fn new(model: Arc<dyn StructuredModel>, persona: Persona) -> Self {
        let system_prompt = Self::system_prompt(&persona);
        Self {
            model,
            persona,
            system_prompt,
        }
    }

    fn system_prompt(persona: &Persona) -> String {
        let banned = persona
            .banned_phrases
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let hashtags = if persona.allow_hashtags {
            "Hashtags are allowed but rarely needed."
        } else {
            "No hashtags."
        };

        format!(
            "# SYSTEM ROLE: {name}\n\n\
             ## 1. IDENTITY\n{identity}\n\n\
             ## 2. TASK\n\
             Write one authentic reply to the post you are given, in the voice above.\n\n\
             ## 3. RULES\n\
             - Reply in the same language as the post.\n\
             - Stay within the character limit you are given. Brevity is power: no intros, no outros.\n\
             - Never use these phrases: {banned}.\n\
             - Never ask people to follow, like, share or subscribe.\n\
             - At most {emojis} emoji. {hashtags}\n\
             - Call out hype and overengineering; prefer concrete, pragmatic points.\n\n\
             ## 4. AUDIENCE\n\
             Juniors get a direct mentor. Seniors get a peer who debates costs and trade-offs.\n\n\
             Report a confidence score from 0 to 100. Low confidence is fine when you have \
             nothing useful to add.",
            name = persona.name,
            identity = persona.identity,
            emojis = persona.max_emojis,
        )
    }

    /// The per-candidate prompt built from the assembled context.
    pub fn user_prompt(context: &EngagementContext) -> String {
        let mut sections = vec![
            format!("## POST ({})", context.key.platform),
            format!("Author: @{}", context.author_handle),
            format!("Content: \"{}\"", context.body),
            format!(
                "Category: {} | Language: {}",
                context.category.as_str(),
                context.language
            ),
            String::new(),
            "## SIGNALS".into(),
            format!(
                "Engagement: {:?} ({} replies, {} likes)",
                context.strength, context.reply_count, context.like_count
            ),
            format!("Strategy: {}", context.strategy),
        ];

        if let Some(dossier) = &context.audience_profile {
            sections.extend([
                String::new(),
                "## TARGET AUDIENCE".into(),
                format!("Summary: {}", dossier.summary),
                format!(
                    "Level: {:?} | Role: {} | Hype seller: {}",
                    dossier.technical_level, dossier.job_title, dossier.is_hype_seller
                ),
                format!("Tone: {}", dossier.tone_preference),
                format!("Interests: {}", dossier.interests.join(", ")),
                format!("Guidelines: {}", dossier.interaction_guidelines),
            ]);
        }

        if let Some(excerpts) = &context.prior_excerpts {
            sections.extend([String::new(), "## PAST REPLIES (STAY CONSISTENT)".into()]);
            sections.extend(excerpts.iter().map(|e| format!("- {}", e.text)));
        }

        if let Some(replies) = &context.existing_replies {
            sections.extend([String::new(), "## EXISTING REPLIES".into()]);
            sections.extend(
                replies
                    .iter()
                    .map(|r| format!("- @{}: {}", r.author_handle, r.text)),
            );
        }

        if let Some(media) = &context.media {
            sections.extend([String::new(), format!("Media ({:?}): {}", media.kind, media.url)]);
        }

        sections.extend([
            String::new(),
            "---".into(),
            format!(
                "Write the reply. Max {} characters. Style: {}.",
                context.style.char_limit, context.style.tone
            ),
        ]);

        sections.join("\n")
    }

    fn stricter_prompt(base: &str, constraints: &ReplyConstraints, failure: &AttemptFailure) -> String {
        let problem = match failure {
            AttemptFailure::Call(_) => {
                "Your previous answer could not be used. Answer strictly with the schema.".to_string()
            }
            AttemptFailure::Violations(violations) => {
                let list = violations
                    .iter()
                    .map(|v| format!("- {v}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Your previous draft was rejected:\n{list}")
            }
        };

        format!(
            "{base}\n\n## RETRY\n{problem}\n\
             Hard limits this time: at most {limit} characters, counted exactly. \
             Language: {language}. No banned phrases, no requests to follow or like.",
            limit = constraints.char_limit,
            language = constraints.language,
        )
    }

    async fn attempt(&self, prompt: &str) -> Result<Draft, String> {
        let output = extract_structured::<GhostwriterOutput>(&*self.model, &self.system_prompt, prompt)
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| format!("malformed draft: {e}"))?;

        Ok(Draft {
            text: output.reply_text,
            language: output.language,
            confidence: output.confidence_score,
            rationale: output.rationale,
        })
    }
}

#[async_trait]
impl ContentGenerator for Ghostwriter {
    async fn write(&self, context: &EngagementContext) -> Result<GeneratedResponse, GenerationError> {
        let constraints = ReplyConstraints::for_context(&self.persona, context);
        let base = Self::user_prompt(context);
        let mut prompt = base.clone();
        let mut failure = AttemptFailure::Call("no attempt made".into());

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&prompt).await {
                Ok(draft) => {
                    let violations = constraints.check(&draft);
                    if violations.is_empty() {
                        let text = draft.text.trim().to_string();
                        info!(
                            candidate = %context.key,
                            attempt,
                            confidence = draft.confidence,
                            chars = text.chars().count(),
                            "Reply drafted"
                        );
                        return Ok(GeneratedResponse {
                            text,
                            // range-checked above
                            confidence: draft.confidence as u8,
                            rationale: draft.rationale,
                            attempts: attempt,
                        });
                    }
                    warn!(
                        candidate = %context.key,
                        attempt,
                        violations = violations.len(),
                        "Draft rejected"
                    );
                    failure = AttemptFailure::Violations(violations);
                }
                Err(message) => {
                    warn!(candidate = %context.key, attempt, error = %message, "Generator call failed");
                    failure = AttemptFailure::Call(message);
                }
            }
            prompt = Self::stricter_prompt(&base, &constraints, &failure);
        }

        Err(match failure {
            AttemptFailure::Violations(violations) => GenerationError::ConstraintViolation {
                attempts: MAX_ATTEMPTS,
                violations,
            },
            AttemptFailure::Call(message) => GenerationError::Upstream {
                attempts: MAX_ATTEMPTS,
                message,
            },
        })
    }
}

use std::path::Path;

use netpersona_common::NetPersonaError;

const DEFAULT_IDENTITY: &str = "You are not an AI assistant. You are a senior software \
engineer with 13+ years of experience and a pragmatic tech lead. Direct, technical, \
skeptical of hype and highly opinionated. Robustness over fashion. You call out \
overengineering and vaporware, and you talk to seniors as a peer and to juniors as a \
blunt mentor.";

const DEFAULT_BANNED: &[&str] = &[
    "Great post",
    "Interesting perspective",
    "I agree",
    "What do you think?",
    "Thoughts?",
    "Mindset",
    "Disruptive",
    "Synergy",
];

/// Who the generator speaks as, and the hard limits on how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    /// Free-form identity text placed at the top of the system prompt.
    pub identity: String,
    pub banned_phrases: Vec<String>,
    pub max_emojis: usize,
    pub allow_hashtags: bool,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "NetPersona".into(),
            identity: DEFAULT_IDENTITY.into(),
            banned_phrases: DEFAULT_BANNED.iter().map(|s| s.to_string()).collect(),
            max_emojis: 1,
            allow_hashtags: false,
        }
    }
}

impl Persona {
    /// Read a persona from a markdown file. See [`Persona::from_markdown`].
    pub fn load(path: &Path) -> Result<Self, NetPersonaError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NetPersonaError::Config(format!("Cannot read persona {}: {e}", path.display()))
        })?;
        Self::from_markdown(&text)
    }

    /// The first `# ` heading, if any, becomes the persona name. Two optional
    /// sections override the default limits and are left out of the identity:
    ///
    /// ```markdown
    /// ## Banned phrases
    /// - Great post
    /// - Synergy
    ///
    /// ## Limits
    /// - max emojis: 0
    /// - hashtags: yes
    /// ```
    ///
    /// Everything else is identity text.
    pub fn from_markdown(text: &str) -> Result<Self, NetPersonaError> {
        let mut identity = Vec::new();
        let mut banned = Vec::new();
        let mut limits = Vec::new();
        let mut section = Section::Identity;

        for line in text.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                section = match heading.trim().to_lowercase().as_str() {
                    "banned phrases" | "banned" => Section::Banned,
                    "limits" => Section::Limits,
                    _ => Section::Identity,
                };
                if section != Section::Identity {
                    continue;
                }
            }
            match section {
                Section::Identity => identity.push(line),
                Section::Banned => banned.extend(list_item(line)),
                Section::Limits => limits.extend(list_item(line)),
            }
        }

        let identity = identity.join("\n").trim().to_string();
        if identity.is_empty() {
            return Err(NetPersonaError::Config("Persona file is empty".into()));
        }

        let mut persona = Self {
            identity,
            ..Self::default()
        };
        if let Some(name) = persona
            .identity
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            persona.name = name.to_string();
        }
        if !banned.is_empty() {
            persona = persona.with_banned_phrases(banned.into_iter().map(String::from).collect());
        }
        for item in limits {
            persona = persona.apply_limit(item)?;
        }
        Ok(persona)
    }

    fn apply_limit(self, item: &str) -> Result<Self, NetPersonaError> {
        let invalid = || NetPersonaError::Config(format!("Invalid persona limit: {item}"));
        let (key, value) = item.split_once(':').ok_or_else(invalid)?;
        let value = value.trim();
        match key.trim().to_lowercase().as_str() {
            "max emojis" => Ok(self.with_max_emojis(value.parse().map_err(|_| invalid())?)),
            "hashtags" => match value.to_lowercase().as_str() {
                "yes" | "true" | "allowed" => Ok(self.with_hashtags(true)),
                "no" | "false" | "none" => Ok(self.with_hashtags(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }

    pub fn with_banned_phrases(mut self, phrases: Vec<String>) -> Self {
        self.banned_phrases = phrases;
        self
    }

    pub fn with_max_emojis(mut self, max_emojis: usize) -> Self {
        self.max_emojis = max_emojis;
        self
    }

    pub fn with_hashtags(mut self, allow: bool) -> Self {
        self.allow_hashtags = allow;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Identity,
    Banned,
    Limits,
}

fn list_item(line: &str) -> Option<&str> {
    let item = line.trim().strip_prefix("- ").or_else(|| line.trim().strip_prefix("* "))?;
    Some(item.trim()).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_heading_names_the_persona() {
        let persona = Persona::from_markdown("# Ada the SRE\n\nPager veteran.").unwrap();
        assert_eq!(persona.name, "Ada the SRE");
        assert!(persona.identity.contains("Pager veteran"));
        assert_eq!(persona.max_emojis, 1);
        assert!(persona.banned_phrases.iter().any(|p| p == "Great post"));
    }

    #[test]
    fn banned_and_limit_sections_override_defaults() {
        let text = "# Ada\n\nPager veteran.\n\n## Banned phrases\n- Circle back\n* Deep dive\n\n\
                    ## Limits\n- max emojis: 0\n- hashtags: yes\n\n## Tone\nDry humour.";
        let persona = Persona::from_markdown(text).unwrap();

        assert_eq!(persona.banned_phrases, vec!["Circle back", "Deep dive"]);
        assert_eq!(persona.max_emojis, 0);
        assert!(persona.allow_hashtags);
        assert!(persona.identity.contains("Pager veteran"));
        assert!(persona.identity.contains("## Tone\nDry humour."));
        assert!(!persona.identity.contains("Circle back"));
        assert!(!persona.identity.contains("max emojis"));
    }

    #[test]
    fn bad_limit_is_a_config_error() {
        let err = Persona::from_markdown("Pager veteran.\n## Limits\n- max emojis: lots").unwrap_err();
        assert!(matches!(err, NetPersonaError::Config(_)));
        assert!(Persona::from_markdown("Pager veteran.\n## Limits\n- tone: dry").is_err());
    }

    #[test]
    fn sections_alone_are_not_an_identity() {
        assert!(Persona::from_markdown("## Banned phrases\n- Synergy").is_err());
    }

    #[test]
    fn empty_persona_file_is_rejected() {
        assert!(Persona::from_markdown("  \n ").is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Persona::load(Path::new("/nonexistent/persona.md")).unwrap_err();
        assert!(matches!(err, NetPersonaError::Config(_)));
    }
}

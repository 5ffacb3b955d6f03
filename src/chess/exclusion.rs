//! Record-level exclusion triggers.
//!
//! Lichess exports contain a handful of entries that are well-formed text but
//! not usable games: bot games rated `?`, unfinished games, abandoned games
//! whose move line is only a result, and non-standard variants. New patterns
//! go into [`ExclusionTriggers`].

use super::types::TagKey;

/// Game termination markers as they appear at the end of a move line.
pub const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

pub fn is_result_token(token: &str) -> bool {
    RESULT_TOKENS.contains(&token)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSentinel {
    pub tag: TagKey,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionTriggers {
    field_sentinels: Vec<FieldSentinel>,
    allowed_variants: Vec<String>,
    result_only_lines: Vec<String>,
}

impl Default for ExclusionTriggers {
    fn default() -> Self {
        Self::empty()
            .with_field_sentinel(TagKey::WhiteElo, "?")
            .with_field_sentinel(TagKey::BlackElo, "?")
            .with_field_sentinel(TagKey::Result, "*")
            .with_allowed_variant("Standard")
            .with_result_only_lines(RESULT_TOKENS)
    }
}

impl ExclusionTriggers {
    /// A table that excludes nothing and allows every variant.
    pub fn empty() -> Self {
        Self {
            field_sentinels: Vec::new(),
            allowed_variants: Vec::new(),
            result_only_lines: Vec::new(),
        }
    }

    pub fn with_field_sentinel(mut self, tag: TagKey, value: impl Into<String>) -> Self {
        self.field_sentinels.push(FieldSentinel {
            tag,
            value: value.into(),
        });
        self
    }

    pub fn with_allowed_variant(mut self, variant: impl Into<String>) -> Self {
        self.allowed_variants.push(variant.into());
        self
    }

    pub fn with_result_only_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_only_lines
            .extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn is_sentinel(&self, tag: TagKey, value: &str) -> bool {
        let value = value.trim();
        self.field_sentinels
            .iter()
            .any(|sentinel| sentinel.tag == tag && sentinel.value == value)
    }

    /// An empty allow-list accepts every variant.
    pub fn is_variant_allowed(&self, variant: &str) -> bool {
        let variant = variant.trim();
        self.allowed_variants.is_empty()
            || self
                .allowed_variants
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(variant))
    }

    /// True for a move line that carries a result and nothing else.
    pub fn is_result_only_line(&self, line: &str) -> bool {
        let line = line.trim();
        self.result_only_lines.iter().any(|sentinel| sentinel == line)
    }
}

//! Rendering memories into prompt sections.
//!
//! Templates use `{placeholder}` syntax; `{{` and `}}` produce literal
//! braces. Unknown placeholders and missing metadata stay in the output as
//! literal `{name}` text, so a template/metadata mismatch never fails.
//!
//! | Placeholder        | Value                                   |
//! |--------------------|-----------------------------------------|
//! | `{index}`          | 1-based position within the section     |
//! | `{id}`             | memory id                               |
//! | `{content}`        | memory content                          |
//! | `{importance}`     | importance, two decimals                |
//! | `{tier}`           | upper-case tier label                   |
//! | `{role}`, `{type}` | the well-known metadata entries         |
//! | `{created_at}` etc.| RFC 3339 timestamps                     |
//! | `{metadata}`       | all metadata as compact JSON            |
//! | `{metadata.<key>}` | one metadata entry                      |

use memtier_core::memory::{Memory, MemoryTier, keys};
use std::borrow::Cow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed per-memory template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MemoryTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let segments = parse(&source);
        Self { source, segments }
    }

    /// Default item template of a tier.
    pub fn default_for(tier: MemoryTier) -> Self {
        match tier {
            MemoryTier::ShortTerm => Self::new("[{index}] {content}\n"),
            MemoryTier::Working | MemoryTier::LongTerm => Self::new("- {content}\n"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render one memory at a 1-based `index`.
    pub fn render(&self, memory: &Memory, index: usize) -> String {
        self.render_with(|name| resolve(name, memory, index))
    }

    /// Render with a custom placeholder lookup. Names the lookup does not
    /// know stay in the output as literal `{name}`.
    pub fn render_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }

    /// Recover the `{content}` of one block rendered with this template.
    ///
    /// Returns `None` when the template has no single `{content}`
    /// placeholder, when two placeholders touch without a literal between
    /// them, or when `rendered` does not match the template's literals.
    pub fn extract_content(&self, rendered: &str) -> Option<String> {
        let content_at = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Placeholder(n) if n == "content"))?;
        let content_count = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Placeholder(n) if n == "content"))
            .count();
        if content_count != 1 {
            return None;
        }

        let (before, rest) = self.segments.split_at(content_at);
        let after = &rest[1..];

        // Consume the prefix from the front.
        let mut text = rendered;
        for (i, segment) in before.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => text = text.strip_prefix(lit.as_str())?,
                Segment::Placeholder(_) => {
                    let Some(Segment::Literal(next)) = before.get(i + 1) else {
                        return None;
                    };
                    let end = text.find(next.as_str())?;
                    text = &text[end..];
                }
            }
        }

        // Consume the suffix from the back.
        for (i, segment) in after.iter().enumerate().rev() {
            match segment {
                Segment::Literal(lit) => text = text.strip_suffix(lit.as_str())?,
                Segment::Placeholder(_) => {
                    let Some(Segment::Literal(prev)) = i.checked_sub(1).and_then(|p| after.get(p))
                    else {
                        return None;
                    };
                    let start = text.rfind(prev.as_str())?;
                    text = &text[..start + prev.len()];
                }
            }
        }

        Some(text.to_string())
    }
}

fn parse(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if closed {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                } else {
                    // unterminated: keep as text
                    literal.push('{');
                    literal.push_str(&name);
                }
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn resolve(name: &str, memory: &Memory, index: usize) -> Option<String> {
    match name {
        "index" => Some(index.to_string()),
        "id" => Some(memory.id.clone()),
        "content" => Some(memory.content.clone()),
        "importance" => Some(format!("{:.2}", memory.importance)),
        "tier" => Some(memory.tier.label().to_string()),
        "role" => memory.metadata_text(keys::ROLE),
        "type" => memory.metadata_text(keys::TYPE),
        "created_at" => Some(memory.created_at.to_rfc3339()),
        "updated_at" => Some(memory.updated_at.to_rfc3339()),
        "last_accessed_at" => Some(memory.last_accessed_at.to_rfc3339()),
        "metadata" => serde_json::to_string(&memory.metadata).ok(),
        other => other
            .strip_prefix("metadata.")
            .and_then(|key| memory.metadata_text(key)),
    }
}

/// Renders tier sections with per-tier templates and a title template.
#[derive(Debug, Clone)]
pub struct MemoryFormatter {
    templates: BTreeMap<MemoryTier, MemoryTemplate>,
    title_template: MemoryTemplate,
}

impl Default for MemoryFormatter {
    fn default() -> Self {
        Self {
            templates: BTreeMap::new(),
            title_template: MemoryTemplate::new("--- {tier} MEMORIES ---"),
        }
    }
}

impl MemoryFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, tier: MemoryTier, template: impl Into<String>) -> Self {
        self.templates.insert(tier, MemoryTemplate::new(template));
        self
    }

    /// Title template. `{tier}` is the only placeholder; escapes and unknown
    /// names follow the item template rules.
    pub fn with_title_template(mut self, template: impl Into<String>) -> Self {
        self.title_template = MemoryTemplate::new(template);
        self
    }

    /// The configured template of a tier, or its default.
    pub fn template_for(&self, tier: MemoryTier) -> Cow<'_, MemoryTemplate> {
        match self.templates.get(&tier) {
            Some(template) => Cow::Borrowed(template),
            None => Cow::Owned(MemoryTemplate::default_for(tier)),
        }
    }

    pub fn title(&self, tier: MemoryTier) -> String {
        self.title_template
            .render_with(|name| (name == "tier").then(|| tier.label().to_string()))
    }

    pub fn format_one(&self, memory: &Memory, index: usize, template: &MemoryTemplate) -> String {
        template.render(memory, index)
    }

    /// Title line followed by one rendered block per memory. Empty input
    /// yields an empty string (no orphan title).
    pub fn format_many(&self, memories: &[Memory], title: &str, template: &MemoryTemplate) -> String {
        if memories.is_empty() {
            return String::new();
        }
        let mut out = String::from(title);
        out.push('\n');
        for (i, memory) in memories.iter().enumerate() {
            out.push_str(&self.format_one(memory, i + 1, template));
        }
        out.trim_end_matches('\n').to_string()
    }

    /// Render a whole tier section with its title and template.
    pub fn format_section(&self, tier: MemoryTier, memories: &[Memory]) -> String {
        self.format_many(memories, &self.title(tier), &self.template_for(tier))
    }
}

//! Inline markers in model output: code fences and image directives.
//!
//! Everything here is pure. The same text always segments the same way, and
//! partially streamed text is handled by simply not matching incomplete
//! markers until the closing delimiter arrives.

use regex::Regex;
use std::sync::LazyLock;

static SEGMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)```(?P<lang>[\w+#.-]*)[^\S\n]*\n?(?P<code>.*?)```|<<GENERATE_IMAGE:(?P<prompt>[^\n]*?)>>",
    )
    .expect("segment pattern is valid")
});

static DIRECTIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<<GENERATE_IMAGE:([^\n]*?)>>").expect("directive pattern is valid")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Plain(String),
    CodeBlock { language: Option<String>, code: String },
    ImageDirective { prompt: String },
}

/// Split text into plain runs, closed code blocks and image directives.
///
/// An unterminated trailing fence stays inside a `Plain` segment, together
/// with any directive written after it.
pub fn segment(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in SEGMENT_PATTERN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // A fence the pattern skipped has no closing delimiter anywhere after it
        if text[last..whole.start()].contains("```") {
            break;
        }
        if whole.start() > last {
            segments.push(Segment::Plain(text[last..whole.start()].to_string()));
        }

        if let Some(prompt) = caps.name("prompt") {
            segments.push(Segment::ImageDirective {
                prompt: prompt.as_str().trim().to_string(),
            });
        } else {
            let language = caps
                .name("lang")
                .map(|m| m.as_str())
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            let code = caps.name("code").map(|m| m.as_str()).unwrap_or_default();
            segments.push(Segment::CodeBlock {
                language,
                code: code.trim_end_matches('\n').to_string(),
            });
        }
        last = whole.end();
    }

    if last < text.len() {
        segments.push(Segment::Plain(text[last..].to_string()));
    }
    segments
}

/// First complete image directive, trimmed. Blank prompts are not actionable.
pub fn detect_image_directive(text: &str) -> Option<String> {
    let caps = DIRECTIVE_PATTERN.captures(text)?;
    let prompt = caps.get(1)?.as_str().trim();
    if prompt.is_empty() {
        None
    } else {
        Some(prompt.to_string())
    }
}

/// Code blocks of a message, in order
pub fn code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    segment(text)
        .into_iter()
        .filter_map(|s| match s {
            Segment::CodeBlock { language, code } => Some((language, code)),
            _ => None,
        })
        .collect()
}

/// Prompt sent when the user asks for a walkthrough of one code block
pub fn explain_code_prompt(language: Option<&str>, code: &str) -> String {
    let language = language.unwrap_or("");
    format!(
        "Explain this {}code line by line, simply and precisely:\n\n```{}\n{}\n```",
        if language.is_empty() {
            String::new()
        } else {
            format!("{} ", language)
        },
        language,
        code
    )
}

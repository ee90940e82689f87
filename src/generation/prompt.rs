//! Prompt assembly and reasoning stripping.

use std::fmt::Write as _;

use super::GenerationRequest;
use crate::knowledge::format_context;
use crate::router::Complexity;

pub const THINKING_OPEN: &str = "<thinking>";
pub const THINKING_CLOSE: &str = "</thinking>";

const REASONING_PROTOCOL: &str = "Before answering, reason step by step inside \
<thinking>...</thinking> tags. Plan the answer, check facts against the context, \
and critique your own logic. Only after the closing </thinking> tag, write the \
final answer for the user. Nothing inside the tags is shown to the user.";

fn complexity_guidance(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "Answer directly and concisely.",
        Complexity::Medium => {
            "Address each relevant variable of the request while keeping the answer focused."
        }
        Complexity::High => {
            "Break the problem into explicit steps, address each one, and state any assumptions."
        }
    }
}

/// Build `(system, prompt)` for one generation attempt.
pub fn build(request: &GenerationRequest<'_>) -> (String, String) {
    let mut system = request.persona.trim().to_string();
    if request.route.needs_chain_of_thought {
        let _ = write!(system, "\n\n## Reasoning protocol\n{REASONING_PROTOCOL}");
    }

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "## Guidance\n{}\n",
        complexity_guidance(request.route.complexity)
    );

    if request.route.needs_retrieval && !request.context.is_empty() {
        let _ = writeln!(
            prompt,
            "## Retrieved context\n{}\n",
            format_context(request.context)
        );
    }

    if !request.profile.is_empty() {
        prompt.push_str("## What you know about the user\n");
        for fact in request.profile {
            let _ = writeln!(prompt, "- {}: {}", fact.key, fact.value);
        }
        prompt.push('\n');
    }

    if !request.history.is_empty() {
        prompt.push_str("## Conversation so far\n");
        for turn in request.history.iter() {
            let _ = writeln!(prompt, "{}: {}", turn.role, turn.text);
        }
        prompt.push('\n');
    }

    if let Some(feedback) = request.feedback {
        let _ = writeln!(
            prompt,
            "## Reviewer feedback on your previous draft\n{}\nRevise the answer to address it.\n",
            feedback.trim()
        );
    }

    let _ = write!(prompt, "## User request\n{}", request.instruction);
    (system, prompt)
}

/// Separate private reasoning from the user-visible answer.
///
/// Tags match in any ASCII case. Every `<thinking>` block is removed from the
/// answer. An unterminated block runs to the end of the text, a stray closing
/// tag makes everything before it reasoning, and any closing tag left over
/// after that is dropped.
pub fn split_reasoning(raw: &str) -> (String, Option<String>) {
    // ASCII lowercasing keeps byte offsets, so positions map back onto `raw`.
    let lower = raw.to_ascii_lowercase();
    let find = |from: usize, tag: &str| lower[from..].find(tag).map(|i| from + i);

    let mut answer = String::new();
    let mut reasoning: Vec<&str> = Vec::new();
    let mut pos = 0;

    if let Some(close) = find(0, THINKING_CLOSE) {
        if find(0, THINKING_OPEN).is_none_or(|open| open > close) {
            reasoning.push(&raw[..close]);
            pos = close + THINKING_CLOSE.len();
        }
    }

    while let Some(open) = find(pos, THINKING_OPEN) {
        answer.push_str(&raw[pos..open]);
        let inner = open + THINKING_OPEN.len();
        match find(inner, THINKING_CLOSE) {
            Some(close) => {
                reasoning.push(&raw[inner..close]);
                pos = close + THINKING_CLOSE.len();
            }
            None => {
                reasoning.push(&raw[inner..]);
                pos = raw.len();
            }
        }
    }
    answer.push_str(&raw[pos..]);

    let reasoning = reasoning
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (
        remove_tag(&answer, THINKING_CLOSE).trim().to_string(),
        (!reasoning.is_empty()).then_some(reasoning),
    )
}

/// Drop every occurrence of `tag`, matched in any ASCII case.
fn remove_tag(text: &str, tag: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(i) = lower[pos..].find(tag) {
        out.push_str(&text[pos..pos + i]);
        pos += i + tag.len();
    }
    out.push_str(&text[pos..]);
    out
}

//! Message preprocessor & sampler.
//!
//! Normalizes multi-part message content down to plain text, then — for
//! oversize conversations — extracts a bounded sample rather than truncating
//! blindly, so moderation still sees a representative slice of the input.
//!
//! The RNG is injected rather than pulled from thread-local state, so tests
//! can seed it.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SAMPLE_BUDGET: usize = 30_000;
const TRUNCATION_MARKER: &str = "\n…[content truncated]…\n";
const MIN_EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMessage {
    pub role: String,
    pub content: RawContent,
}

/// A message after normalization: content is always plain text.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub role: String,
    pub content: String,
}

/// Retains only `type=text` parts (joined with `\n`), or re-indents content
/// that's itself a JSON string.
pub fn normalize(messages: Vec<RawMessage>) -> Vec<NormalizedMessage> {
    messages
        .into_iter()
        .map(|m| NormalizedMessage {
            role: m.role,
            content: normalize_content(m.content),
        })
        .collect()
}

fn normalize_content(content: RawContent) -> String {
    match content {
        RawContent::Parts(parts) => parts
            .into_iter()
            .filter(|p| p.kind == "text")
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n"),
        RawContent::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(text),
            Err(_) => text,
        },
    }
}

pub struct SampleResult {
    pub messages: Vec<NormalizedMessage>,
    pub is_partial_check: bool,
}

/// Applies the oversize-sampling algorithm when the normalized total exceeds
/// [`SAMPLE_BUDGET`]; otherwise passes the conversation through untouched.
pub fn sample(messages: Vec<NormalizedMessage>, rng: &mut impl Rng) -> SampleResult {
    let total: usize = messages.iter().map(|m| m.content.len()).sum();
    if total <= SAMPLE_BUDGET {
        return SampleResult {
            messages,
            is_partial_check: false,
        };
    }

    let mut user_messages: Vec<NormalizedMessage> = messages
        .iter()
        .filter(|m| m.role == "user")
        .cloned()
        .collect();
    let non_user: Vec<NormalizedMessage> = messages
        .into_iter()
        .filter(|m| m.role != "user")
        .collect();

    loop {
        let bundle = build_bundle(&non_user, &user_messages, rng);
        let bundle_len: usize = bundle.iter().map(|m| m.content.len()).sum();
        if bundle_len <= SAMPLE_BUDGET {
            return SampleResult {
                messages: bundle,
                is_partial_check: false,
            };
        }
        if user_messages.pop().is_none() {
            return SampleResult {
                messages: vec![NormalizedMessage {
                    role: "system".to_string(),
                    content: "The input was too large to process and has been discarded."
                        .to_string(),
                }],
                is_partial_check: true,
            };
        }
    }
}

impl Clone for NormalizedMessage {
    fn clone(&self) -> Self {
        Self {
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }
}

fn build_bundle(
    non_user: &[NormalizedMessage],
    user_messages: &[NormalizedMessage],
    rng: &mut impl Rng,
) -> Vec<NormalizedMessage> {
    let non_user_budget = SAMPLE_BUDGET / 2;
    let mut bundle = Vec::new();
    let mut non_user_used = 0usize;

    for m in non_user {
        if non_user_used + m.content.len() <= non_user_budget {
            non_user_used += m.content.len();
            bundle.push(m.clone());
        } else {
            let remaining = non_user_budget.saturating_sub(non_user_used);
            if remaining > 0 {
                bundle.push(NormalizedMessage {
                    role: m.role.clone(),
                    content: truncate_with_marker(&m.content, remaining),
                });
                non_user_used = non_user_budget;
            }
            break;
        }
    }

    let remaining_budget = SAMPLE_BUDGET.saturating_sub(non_user_used);
    bundle.extend(sample_user_messages(user_messages, remaining_budget, rng));
    bundle
}

fn sample_user_messages(
    user_messages: &[NormalizedMessage],
    budget: usize,
    rng: &mut impl Rng,
) -> Vec<NormalizedMessage> {
    if user_messages.is_empty() || budget == 0 {
        return Vec::new();
    }

    if user_messages.len() == 1 {
        let msg = &user_messages[0];
        let chunk = budget as f64 / 3.5;
        let chunk = chunk.floor() as usize;
        return vec![NormalizedMessage {
            role: msg.role.clone(),
            content: head_middle_tail(&msg.content, chunk, rng),
        }];
    }

    let mut sorted: Vec<&NormalizedMessage> = user_messages.iter().collect();
    sorted.sort_by_key(|m| m.content.len());

    let mut included = Vec::new();
    let mut used = 0usize;
    let mut leftover_start = sorted.len();
    for (i, m) in sorted.iter().enumerate() {
        if used + m.content.len() <= budget {
            used += m.content.len();
            included.push((*m).clone());
        } else {
            leftover_start = i;
            break;
        }
    }
    if leftover_start == sorted.len() && included.len() == sorted.len() {
        return included;
    }

    let mut leftover: Vec<&NormalizedMessage> = sorted[leftover_start..].to_vec();
    leftover.shuffle(rng);

    for m in leftover {
        let remaining = budget.saturating_sub(used);
        if remaining < MIN_EXCERPT_LEN {
            break;
        }
        let excerpt_len = remaining.min(m.content.len());
        let excerpt = take_prefix(&m.content, excerpt_len);
        used += excerpt.len();
        included.push(NormalizedMessage {
            role: m.role.clone(),
            content: excerpt,
        });
    }

    included
}

/// Head + random-offset middle + tail, each bounded by `chunk`, joined by the
/// truncation marker. Used for the single-oversize-user-message case.
fn head_middle_tail(content: &str, chunk: usize, rng: &mut impl Rng) -> String {
    if content.len() <= chunk * 3 {
        return content.to_string();
    }

    let head = take_prefix(content, chunk);
    let tail = take_suffix(content, chunk);

    let middle_region_start = chunk;
    let middle_region_end = content.len().saturating_sub(chunk);
    let middle = if middle_region_end > middle_region_start {
        let span = middle_region_end - middle_region_start;
        let offset = if span > chunk {
            rng.random_range(0..=(span - chunk))
        } else {
            0
        };
        let start = middle_region_start + offset;
        let end = (start + chunk).min(middle_region_end);
        safe_slice(content, start, end)
    } else {
        String::new()
    };

    format!("{head}{TRUNCATION_MARKER}{middle}{TRUNCATION_MARKER}{tail}")
}

fn truncate_with_marker(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARKER.len());
    format!("{}{}", take_prefix(content, keep), TRUNCATION_MARKER)
}

fn take_prefix(s: &str, n: usize) -> String {
    s.char_indices()
        .take_while(|(i, _)| *i < n)
        .map(|(_, c)| c)
        .collect()
}

fn take_suffix(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let start = s.len() - n;
    let start = (start..=s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len());
    s[start..].to_string()
}

fn safe_slice(s: &str, start: usize, end: usize) -> String {
    let start = (0..=start).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    let end = (end..=s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len());
    s[start..end].to_string()
}

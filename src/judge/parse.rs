//! Judgment response parsing, validation and the keyword fallback

use super::{JudgmentOutcome, JudgmentResponse, JudgmentResult, Recommendation};
use crate::util::{truncate, truncate_words};

const MAX_ERROR_CONTENT_LEN: usize = 200;
const MAX_REASON_WORDS: usize = 100;
const MAX_RATIONALE_WORDS: usize = 200;
/// Confidence assigned to results guessed from unparseable text.
pub const HEURISTIC_CONFIDENCE: u8 = 50;

/// Redact or truncate service output before it goes into logs and errors.
pub fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

// ═══════════════════════════════════════════════════════════════════════════
//  STRUCTURED CONTENT SALVAGE
// ═══════════════════════════════════════════════════════════════════════════
//
// Models wrap JSON in markdown fences, prose, or an extra pair of braces. We
// try the raw text first, then a handful of deterministic rewrites of it.

fn push_unique(candidates: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() && !candidates.iter().any(|c| c == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_markdown_fences(content: &str) -> Option<&str> {
    let without_open = content.trim().strip_prefix("```")?;
    let body = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}

/// `{ {...} }` -> `{...}`
fn unwrap_outer_braces(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let inner = trimmed.strip_prefix('{')?.strip_suffix('}')?;
    inner.trim_start().starts_with('{').then(|| inner.trim())
}

/// The balanced `{...}` object starting at byte `start`, honoring strings.
fn balanced_object_at(content: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn embedded_objects(content: &str, limit: usize) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for (idx, _) in content.match_indices('{') {
        if out.len() >= limit {
            break;
        }
        if let Some(object) = balanced_object_at(content, idx) {
            if !out.contains(&object) {
                out.push(object);
            }
        }
    }
    out
}

fn salvage_candidates(content: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    push_unique(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_unique(&mut candidates, stripped);
    }

    let mut idx = 0;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for object in embedded_objects(&current, 4) {
            push_unique(&mut candidates, object);
        }
        if let Some(inner) = unwrap_outer_braces(&current) {
            push_unique(&mut candidates, inner);
        }
        idx += 1;
    }
    candidates
}

/// Deserialize `T` from the first salvage candidate that parses.
pub fn parse_structured_content<T>(content: &str) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut last_err = None;
    for candidate in salvage_candidates(content) {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }
    Err(anyhow::anyhow!(
        "Failed to parse structured response: {}\nContent: {}",
        last_err.unwrap_or_else(|| "empty response".to_string()),
        sanitize_api_response(content)
    ))
}

// ═══════════════════════════════════════════════════════════════════════════
//  VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

/// Check ranges and clip free text.
pub fn validate(response: JudgmentResponse) -> anyhow::Result<JudgmentResult> {
    let confidence = u8::try_from(response.confidence)
        .ok()
        .filter(|c| *c <= 100)
        .ok_or_else(|| {
            anyhow::anyhow!("confidence {} is outside 0-100", response.confidence)
        })?;
    if response.reason.trim().is_empty() {
        return Err(anyhow::anyhow!("reason is empty"));
    }

    Ok(JudgmentResult {
        legitimate: response.legitimate,
        confidence,
        reason: truncate_words(&response.reason, MAX_REASON_WORDS),
        rationale: truncate_words(&response.rationale, MAX_RATIONALE_WORDS),
        indicators: response
            .indicators
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect(),
        recommendation: response.recommendation,
        degraded: false,
    })
}

/// Turn the service's text content into an outcome.
pub fn parse_outcome(raw: &str) -> JudgmentOutcome {
    match parse_structured_content::<JudgmentResponse>(raw).and_then(validate) {
        Ok(result) => JudgmentOutcome::Ok(result),
        Err(err) => {
            tracing::debug!(error = %err, "judgment response rejected");
            JudgmentOutcome::ParseError {
                raw: raw.to_string(),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  KEYWORD FALLBACK
// ═══════════════════════════════════════════════════════════════════════════

const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "not legitimate",
    "illegitimate",
    "\"legitimate\": false",
    "\"legitimate\":false",
    "hardcod",
    "hard-cod",
    "cheat",
    "special-cas",
    "special cas",
    "gaming",
    "\"fail\"",
];

/// Low-confidence guess for a response that could not be parsed.
pub fn heuristic_judgment(raw: &str) -> JudgmentResult {
    let lower = raw.to_lowercase();
    let hits: Vec<&str> = SUSPICIOUS_KEYWORDS
        .iter()
        .copied()
        .filter(|k| lower.contains(k))
        .collect();
    let legitimate = hits.is_empty();

    let reason = if legitimate {
        "unparseable judgment response; no suspicious keywords found".to_string()
    } else {
        format!(
            "unparseable judgment response; suspicious keywords: {}",
            hits.join(", ")
        )
    };

    JudgmentResult {
        legitimate,
        confidence: HEURISTIC_CONFIDENCE,
        reason,
        rationale: truncate_words(raw, MAX_RATIONALE_WORDS),
        indicators: hits.iter().map(|k| k.to_string()).collect(),
        recommendation: if legitimate {
            Recommendation::Pass
        } else {
            Recommendation::Fail
        },
        degraded: true,
    }
}

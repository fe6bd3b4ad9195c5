use super::JudgmentRequest;
use crate::ir::OperationProfile;

pub const JUDGE_SYSTEM: &str = r#"You review programming-exercise submissions for a grading platform. A candidate program has been compared with a reference solution by counting operations in their compiled intermediate code. You are consulted because that comparison was ambiguous, or as a final check on a submission that already produced the right output.

Decide whether the candidate LEGITIMATELY solves the problem, or whether it games the grader. Gaming includes:
- returning a literal that matches the expected output instead of computing it
- branching on the exact sample input values and returning a constant for them
- printing stored answers, looking up a table of known test cases
- skipping required work whose result happens not to matter for the given input

Stylistic differences are legitimate: temporary variables, different loop forms, helper functions, reordered independent statements, a different but correct algorithm.

OUTPUT FORMAT (JSON only, no prose):
{
  "legitimate": true | false,
  "confidence": integer 0-100,
  "reason": "one or two sentences, at most 100 words",
  "rationale": "step-by-step justification, at most 200 words",
  "indicators": ["short", "evidence", "labels"],
  "recommendation": "PASS" | "FAIL"
}

Confidence is how sure you are of "legitimate", not how good the code is. Use values above 85 only when the evidence is unambiguous."#;

fn format_profile(profile: &OperationProfile) -> String {
    profile
        .counts()
        .iter()
        .map(|(class, count)| format!("{}={}", class, count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_excerpt(lines: &[String]) -> String {
    if lines.is_empty() {
        "(unavailable)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Render the user message for one judgment request.
pub fn judge_user_prompt(request: &JudgmentRequest) -> String {
    let lang = request.language.as_str();
    format!(
        "LANGUAGE: {lang}\n\n\
         REFERENCE SOLUTION:\n```{lang}\n{reference}\n```\n\n\
         CANDIDATE SUBMISSION:\n```{lang}\n{candidate}\n```\n\n\
         OPERATION COUNTS:\n- reference: {ref_ops}\n- candidate: {cand_ops}\n\n\
         REFERENCE IR (first {ref_n} lines):\n{ref_ir}\n\n\
         CANDIDATE IR (first {cand_n} lines):\n{cand_ir}\n\n\
         COMPARATOR VERDICT: {verdict}\nCOMPARATOR REASON: {reason}\n\n\
         Is the candidate a legitimate solution?",
        lang = lang,
        reference = request.reference_source.trim_end(),
        candidate = request.candidate_source.trim_end(),
        ref_ops = format_profile(&request.reference_ops),
        cand_ops = format_profile(&request.candidate_ops),
        ref_n = request.reference_ir_excerpt.len(),
        ref_ir = format_excerpt(&request.reference_ir_excerpt),
        cand_n = request.candidate_ir_excerpt.len(),
        cand_ir = format_excerpt(&request.candidate_ir_excerpt),
        verdict = request.comparator_verdict.as_str(),
        reason = request.comparator_reason,
    )
}

/// JSON schema for structured output mode.
pub fn judgment_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "legitimate": { "type": "boolean" },
            "confidence": { "type": "integer", "minimum": 0, "maximum": 100 },
            "reason": { "type": "string" },
            "rationale": { "type": "string" },
            "indicators": { "type": "array", "items": { "type": "string" } },
            "recommendation": { "type": "string", "enum": ["PASS", "FAIL"] }
        },
        "required": ["legitimate", "confidence", "reason", "rationale", "indicators", "recommendation"],
        "additionalProperties": false
    })
}

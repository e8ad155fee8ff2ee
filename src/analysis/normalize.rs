//! The agent reply contract: the prompt that asks for a JSON document and
//! the normalizer that turns whatever comes back into an [`AnalysisResult`].
//!
//! Normalization is forgiving. Missing or mistyped fields fall
//! back to defaults; the only hard failure is a reply with no JSON object.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use analyst_common::{AnalysisJob, AnalysisResult, ResultMetadata, Snippet};

use crate::errors::AnalysisError;
use crate::util::{sanitize_json, truncate_chars};

/// How much of an unusable reply is kept in the error message.
const REPLY_EXCERPT_CHARS: usize = 200;

/// Wrap the user's question with instructions describing the reply shape.
pub fn build_agent_prompt(question: &str) -> String {
    format!(
        r#"{question}

Answer with a single JSON object and nothing else, shaped like this:
{{
  "snippets": [
    {{
      "node_id": "<unique id of the code node>",
      "file_path": "<path relative to the repository root>",
      "code": "<the relevant code>",
      "tags": ["<short keyword>"],
      "description": "<why this code matters for the question>",
      "line_start": <first line>,
      "line_end": <last line>
    }}
  ],
  "total_nodes_found": <number of code nodes you considered>,
  "analysis_response": {{
    "summary": "<direct answer to the question>"
  }}
}}"#,
        question = question.trim()
    )
}

/// Turn an agent reply into the canonical result for `job`.
pub fn normalize_agent_output(
    job: &AnalysisJob,
    reply: &str,
    parsed_at: DateTime<Utc>,
) -> Result<AnalysisResult, AnalysisError> {
    let malformed = || AnalysisError::MalformedAgentOutput(truncate_chars(reply.trim(), REPLY_EXCERPT_CHARS));

    let cleaned = sanitize_json(reply).ok_or_else(malformed)?;
    let document: Map<String, Value> = match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => map,
        _ => return Err(malformed()),
    };

    let snippets = collect_snippets(document.get("snippets"));
    let count = snippets.len() as u64;
    let reported_total = document
        .get("total_nodes_found")
        .or_else(|| document.get("metadata").and_then(|m| m.get("total_nodes_found")))
        .and_then(as_u64)
        .unwrap_or(0);

    Ok(AnalysisResult {
        project_id: job.project_id.clone(),
        repo: job.repo.clone(),
        branch: job.branch.clone(),
        question: job.question.clone(),
        snippets,
        snippets_count: count,
        analysis_response: analysis_response(document.get("analysis_response")),
        metadata: ResultMetadata {
            parsed_at,
            total_nodes_found: reported_total.max(count),
            processed_nodes: count,
            has_credentials: job.has_credentials,
        },
    })
}

fn collect_snippets(value: Option<&Value>) -> Vec<Snippet> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_object)
        .map(snippet_from)
        .filter(|snippet| seen.insert(snippet.node_id.clone()))
        .collect()
}

fn snippet_from(obj: &Map<String, Value>) -> Snippet {
    let file_path = string_field(obj, &["file_path", "file", "path"]);
    let line_start = obj.get("line_start").and_then(as_u32).unwrap_or(0);
    let line_end = obj
        .get("line_end")
        .and_then(as_u32)
        .unwrap_or(line_start)
        .max(line_start);
    let node_id = match string_field(obj, &["node_id", "id"]) {
        id if !id.is_empty() => id,
        _ => format!("{}:{}-{}", file_path, line_start, line_end),
    };

    Snippet {
        node_id,
        file_path,
        code: string_field(obj, &["code", "content"]),
        tags: tags(obj.get("tags")),
        description: string_field(obj, &["description", "summary"]),
        line_start,
        line_end,
    }
}

/// First non-empty string among `keys`, or empty.
fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Tags arrive as an array of strings or as one comma-separated string.
fn tags(value: Option<&Value>) -> BTreeSet<String> {
    let raw: Vec<&str> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s.split(',').collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn analysis_response(value: Option<&Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(obj @ Value::Object(_)) => Some(obj.clone()),
        Some(Value::String(text)) => Some(serde_json::json!({ "summary": text })),
        Some(other) => Some(serde_json::json!({ "value": other })),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    as_u64(value).and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{NO_JSON_REPLY, VALID_REPLY};
    use analyst_common::{JobStatus, NewJob};

    fn job() -> AnalysisJob {
        let new = NewJob::new("p-1", "org/repo").with_question("Explain X");
        let now = Utc::now();
        AnalysisJob {
            job_id: "job-1".into(),
            project_id: new.project_id,
            repo: new.repo,
            branch: new.branch,
            question: new.question,
            has_credentials: true,
            status: JobStatus::Processing,
            attempts: 1,
            max_attempts: 3,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
            run_after: now,
            progress: None,
            remote_status: None,
            last_error: None,
            result: None,
            failure_reason: None,
        }
    }

    fn normalize(reply: &str) -> AnalysisResult {
        let result = normalize_agent_output(&job(), reply, Utc::now()).unwrap();
        result.check_invariants().unwrap();
        result
    }

    #[test]
    fn test_valid_reply() {
        let result = normalize(VALID_REPLY);
        assert_eq!(result.snippets_count, 1);
        assert_eq!(result.metadata.processed_nodes, 1);
        assert_eq!(result.metadata.total_nodes_found, 1);
        assert!(result.metadata.has_credentials);
        assert_eq!(result.question, "Explain X");

        let snippet = &result.snippets[0];
        assert_eq!(snippet.node_id, "a:1-5");
        assert_eq!(snippet.file_path, "a.js");
        assert!(snippet.tags.contains("util"));
        assert_eq!((snippet.line_start, snippet.line_end), (1, 5));
        assert_eq!(result.analysis_response.unwrap()["summary"], "X is a helper");
    }

    #[test]
    fn test_reply_without_json_is_malformed() {
        let err = normalize_agent_output(&job(), NO_JSON_REPLY, Utc::now()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedAgentOutput(_)));
        assert!(err.to_string().contains("could not analyze"));
    }

    #[test]
    fn test_code_braces_before_fenced_payload_are_skipped() {
        let reply = "The entry point `fn main() { run() }` calls run.\n```json\n{\"snippets\": [{\"node_id\": \"a:1-5\", \"file_path\": \"a.rs\"}]}\n```";
        let result = normalize(reply);
        assert_eq!(result.snippets_count, 1);
        assert_eq!(result.snippets[0].file_path, "a.rs");
    }

    #[test]
    fn test_empty_prose_object_does_not_hide_payload() {
        let reply = "Defaults are `{}` when unset. Result:\n{\"snippets\": [{\"node_id\": \"a\"}]}";
        let result = normalize(reply);
        assert_eq!(result.snippets_count, 1);
        assert_eq!(result.snippets[0].node_id, "a");
    }

    #[test]
    fn test_unparseable_object_is_malformed() {
        let err = normalize_agent_output(&job(), "{ snippets: [oops] }", Utc::now()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedAgentOutput(_)));
    }

    #[test]
    fn test_object_without_snippets_degrades_to_empty() {
        let result = normalize(r#"{"answer": "nothing relevant"}"#);
        assert!(result.snippets.is_empty());
        assert_eq!(result.snippets_count, 0);
        assert_eq!(result.metadata.total_nodes_found, 0);
        assert!(result.analysis_response.is_none());
    }

    #[test]
    fn test_missing_node_id_falls_back_to_location() {
        let result = normalize(
            r#"{"snippets": [{"file_path": "src/lib.rs", "line_start": "10", "line_end": 12}]}"#,
        );
        assert_eq!(result.snippets[0].node_id, "src/lib.rs:10-12");
        assert_eq!(result.snippets[0].line_start, 10);
    }

    #[test]
    fn test_duplicate_node_ids_keep_first() {
        let result = normalize(
            r#"{"snippets": [
                {"node_id": "n1", "code": "first"},
                {"node_id": "n1", "code": "second"},
                {"node_id": "n2"},
                "not an object"
            ]}"#,
        );
        assert_eq!(result.snippets_count, 2);
        assert_eq!(result.snippets[0].code, "first");
    }

    #[test]
    fn test_tags_as_comma_string_and_duplicates() {
        let result =
            normalize(r#"{"snippets": [{"node_id": "n", "tags": "util, io,util , "}]}"#);
        let tags: Vec<_> = result.snippets[0].tags.iter().cloned().collect();
        assert_eq!(tags, vec!["io", "util"]);
    }

    #[test]
    fn test_reported_total_never_below_count() {
        let low = normalize(r#"{"total_nodes_found": 0, "snippets": [{"node_id": "a"}, {"node_id": "b"}]}"#);
        assert_eq!(low.metadata.total_nodes_found, 2);

        let high = normalize(r#"{"metadata": {"total_nodes_found": 40}, "snippets": [{"node_id": "a"}]}"#);
        assert_eq!(high.metadata.total_nodes_found, 40);
        assert_eq!(high.metadata.processed_nodes, 1);
    }

    #[test]
    fn test_inverted_line_range_is_clamped() {
        let result = normalize(r#"{"snippets": [{"node_id": "n", "line_start": 9, "line_end": 3}]}"#);
        assert_eq!((result.snippets[0].line_start, result.snippets[0].line_end), (9, 9));
    }

    #[test]
    fn test_non_object_analysis_response_is_wrapped() {
        let text = normalize(r#"{"analysis_response": "plain answer"}"#);
        assert_eq!(text.analysis_response.unwrap()["summary"], "plain answer");

        let list = normalize(r#"{"analysis_response": [1, 2]}"#);
        assert_eq!(list.analysis_response.unwrap()["value"][1], 2);

        let null = normalize(r#"{"analysis_response": null}"#);
        assert!(null.analysis_response.is_none());
    }

    #[test]
    fn test_prompt_carries_question_and_shape() {
        let prompt = build_agent_prompt("  Explain X  ");
        assert!(prompt.starts_with("Explain X\n"));
        assert!(prompt.contains("\"snippets\""));
        assert!(prompt.contains("\"analysis_response\""));
    }
}

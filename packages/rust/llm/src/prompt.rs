//! Prompt construction and response parsing for both stages.
//!
//! Backends are asked for a JSON array keyed by item id. Answers are matched
//! back to items by id, so a backend that reorders its answers is fine; one
//! that drops or invents ids is not.

use std::fmt::Write as _;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use feeddigest_core::{ClassifyRequest, StageItem, SummarizeRequest};
use feeddigest_shared::{ExternalFailureKind, FeedDigestError, FilterVerdict, Result};

pub(crate) fn classify_system_prompt() -> String {
    "You are a smart assistant that classifies article titles by the user's interest tags. \
     Mark advertisements, promotions, sales, sponsored content and any other paid content \
     with the matching noise tag. Reply with a JSON array only, one object per article: \
     {\"id\": <number>, \"keep\": <true|false>, \"tags\": [<matching interest and noise tags>]}."
        .to_string()
}

pub(crate) fn classify_user_prompt(request: &ClassifyRequest) -> String {
    let mut prompt = format!(
        "Interest tags: {}\nNoise tags: {}\n\nArticles:\n",
        request.interest_tags.join(", "),
        request.noise_tags.join(", ")
    );
    push_items(&mut prompt, &request.items);
    prompt
}

pub(crate) fn summarize_system_prompt(request: &SummarizeRequest) -> String {
    format!(
        "You are a smart assistant that summarizes articles. Leave out any author publicity \
         and promotion. Each summary is straightforward and concise, at most {} characters, \
         written in {}. Reply with a JSON array only, one object per article: \
         {{\"id\": <number>, \"summary\": \"<text>\"}}.",
        request.max_length, request.language
    )
}

pub(crate) fn summarize_user_prompt(request: &SummarizeRequest) -> String {
    let mut prompt = String::from("Articles:\n");
    push_items(&mut prompt, &request.items);
    prompt
}

fn push_items(prompt: &mut String, items: &[StageItem]) {
    for (id, item) in items.iter().enumerate() {
        let _ = write!(prompt, "\n[{id}] {}\n", item.title);
        if !item.text.is_empty() {
            let _ = writeln!(prompt, "{}", item.text);
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawVerdict {
    id: usize,
    #[serde(default)]
    keep: bool,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    id: usize,
    summary: String,
}

/// Parse a classifier answer into exactly `expected` verdicts.
pub(crate) fn parse_verdicts(text: &str, expected: usize) -> Result<Vec<FilterVerdict>> {
    let raw: Vec<RawVerdict> = parse_array("filter", text)?;
    align("filter", expected, raw.into_iter().map(|v| {
        (
            v.id,
            FilterVerdict {
                keep: v.keep,
                tags: v.tags,
            },
        )
    }))
}

/// Parse a summarizer answer into exactly `expected` summaries.
pub(crate) fn parse_summaries(text: &str, expected: usize) -> Result<Vec<String>> {
    let raw: Vec<RawSummary> = parse_array("summarize", text)?;
    align(
        "summarize",
        expected,
        raw.into_iter().map(|s| (s.id, s.summary)),
    )
}

fn parse_array<T: DeserializeOwned>(stage: &'static str, text: &str) -> Result<Vec<T>> {
    let body = strip_code_blocks(text);
    let json = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(malformed(stage, format!("no JSON array in response: {}", preview(body))));
        }
    };
    serde_json::from_str(json)
        .map_err(|e| malformed(stage, format!("invalid JSON array: {e}")))
}

fn align<T>(
    stage: &'static str,
    expected: usize,
    answers: impl Iterator<Item = (usize, T)>,
) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = (0..expected).map(|_| None).collect();
    for (id, value) in answers {
        match slots.get_mut(id) {
            Some(slot) if slot.is_none() => *slot = Some(value),
            Some(_) => return Err(malformed(stage, format!("duplicate answer for id {id}"))),
            None => return Err(malformed(stage, format!("answer for unknown id {id}"))),
        }
    }
    let missing = slots.iter().filter(|s| s.is_none()).count();
    if missing > 0 {
        return Err(malformed(
            stage,
            format!("{missing} of {expected} items have no answer"),
        ));
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Strip markdown code fences from a response.
fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

fn malformed(stage: &'static str, msg: String) -> FeedDigestError {
    FeedDigestError::external(stage, ExternalFailureKind::Malformed, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_are_aligned_by_id() {
        let text = r#"```json
[{"id": 1, "keep": false, "tags": ["advertisement"]}, {"id": 0, "keep": true, "tags": ["AI"]}]
```"#;
        let verdicts = parse_verdicts(text, 2).expect("parse");
        assert!(verdicts[0].keep);
        assert_eq!(verdicts[0].tags, vec!["AI".to_string()]);
        assert!(!verdicts[1].keep);
    }

    #[test]
    fn prose_around_the_array_is_ignored() {
        let text = "Here you go:\n[{\"id\": 0, \"summary\": \"A new chip.\"}]\nThanks!";
        assert_eq!(parse_summaries(text, 1).expect("parse"), vec!["A new chip."]);
    }

    #[test]
    fn missing_ids_are_malformed() {
        let err = parse_verdicts(r#"[{"id": 0, "keep": true}]"#, 2).unwrap_err();
        assert!(matches!(
            err,
            FeedDigestError::External {
                kind: ExternalFailureKind::Malformed,
                ..
            }
        ));
    }

    #[test]
    fn unknown_and_duplicate_ids_are_malformed() {
        assert!(parse_summaries(r#"[{"id": 3, "summary": "x"}]"#, 1).is_err());
        assert!(
            parse_summaries(r#"[{"id": 0, "summary": "x"}, {"id": 0, "summary": "y"}]"#, 1)
                .is_err()
        );
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(parse_verdicts("I cannot help with that.", 1).is_err());
    }

    #[test]
    fn user_prompt_lists_items_with_ids() {
        let request = ClassifyRequest {
            items: vec![
                StageItem {
                    title: "Rust 1.85".into(),
                    text: "Edition 2024 ships".into(),
                },
                StageItem {
                    title: "Big sale".into(),
                    text: String::new(),
                },
            ],
            interest_tags: vec!["Rust".into()],
            noise_tags: vec!["advertisement".into()],
            model: "m".into(),
            temperature: 0.3,
        };
        let prompt = classify_user_prompt(&request);
        assert!(prompt.contains("Interest tags: Rust"));
        assert!(prompt.contains("[0] Rust 1.85\nEdition 2024 ships"));
        assert!(prompt.contains("[1] Big sale"));
    }
}

//! Memory extraction: after a final response, ask the model which durable
//! facts the conversation produced.
//!
//! The model must answer with a bare JSON array; everything else (code
//! fences, prose around the array, invalid entries) is tolerated by the
//! parser, and anything unparseable extracts nothing.

use serde::Deserialize;

use crate::types::MemoryType;

/// Fixed instruction sent as the system prompt of the extraction sub-call.
pub const EXTRACTION_PROMPT: &str = "Review the conversation and extract durable facts worth \
remembering about the user, their preferences, or their work. Respond with ONLY a JSON array; \
each element must be {\"type\": \"fact\" | \"preference\" | \"conversation_summary\" | \
\"skill_learned\", \"content\": \"...\", \"importance\": 0.0-1.0}. Respond with [] when nothing \
is worth remembering.";

/// How many trailing session messages feed the extraction call.
pub const EXTRACTION_WINDOW: usize = 5;

#[derive(Clone, Debug)]
pub struct ExtractedMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f32,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    kind: String,
    content: String,
    #[serde(default)]
    importance: Option<f32>,
}

/// Parses the model's extraction answer. Invalid entries are dropped,
/// importance is clamped into [0, 1], and a missing array yields nothing.
pub fn parse_extraction(raw: &str) -> Vec<ExtractedMemory> {
    let Some(array) = locate_array(raw) else {
        return Vec::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<RawEntry>>(array) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let memory_type = MemoryType::parse(&entry.kind)?;
            if entry.content.trim().is_empty() {
                return None;
            }
            Some(ExtractedMemory {
                memory_type,
                content: entry.content,
                importance: entry.importance.unwrap_or(0.5).clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// The outermost `[...]` span, with code fences stripped first.
fn locate_array(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);
    let start = unfenced.find('[')?;
    let end = unfenced.rfind(']')?;
    (end > start).then(|| &unfenced[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_clean_array() {
        let raw = r#"[{"type": "fact", "content": "name is John", "importance": 0.9}]"#;
        let parsed = parse_extraction(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].memory_type, MemoryType::Fact);
        assert_eq!(parsed[0].content, "name is John");
        assert_eq!(parsed[0].importance, 0.9);
    }

    #[test]
    fn strips_code_fences_and_surrounding_prose() {
        let raw = "```json\n[{\"type\": \"preference\", \"content\": \"likes tea\"}]\n```";
        let parsed = parse_extraction(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].importance, 0.5);

        let raw = "Here you go: [{\"type\": \"fact\", \"content\": \"x\", \"importance\": 2.5}] done";
        let parsed = parse_extraction(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].importance, 1.0);
    }

    #[test]
    fn drops_invalid_entries_and_tolerates_garbage() {
        let raw = r#"[
            {"type": "fact", "content": "keep me", "importance": 0.4},
            {"type": "not-a-type", "content": "drop me"},
            {"type": "fact", "content": "   "}
        ]"#;
        let parsed = parse_extraction(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].content, "keep me");

        assert!(parse_extraction("no array here").is_empty());
        assert!(parse_extraction("[not json]").is_empty());
        assert!(parse_extraction("[]").is_empty());
    }
}

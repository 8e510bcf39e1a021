use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{ADD_ENTRIES_INSTRUCTION, CURSOR_ENTRY_PREFIX, EXPECTED_ENTRIES_PER_RESPONSE};

/// Where the instruction list lives inside a search timeline payload.
const INSTRUCTIONS_PATH: [&str; 5] = [
    "data",
    "search_by_raw_query",
    "search_timeline",
    "timeline",
    "instructions",
];

/// One user result. Serializes back into the same object the API delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TimelineEntry {
    /// Returns `None` for anything that isn't an object with a string `entryId`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut payload = value.as_object()?.clone();
        let entry_id = match payload.remove("entryId")? {
            Value::String(id) => id,
            _ => return None,
        };
        Some(Self { entry_id, payload })
    }

    #[inline]
    pub fn is_cursor(&self) -> bool {
        self.entry_id.starts_with(CURSOR_ENTRY_PREFIX)
    }
}

/// Outcome of walking one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// `skipped` counts entries without a usable `entryId` and add-entries
    /// instructions that carried no `entries` list.
    Entries {
        entries: Vec<TimelineEntry>,
        skipped: usize,
    },
    /// The payload didn't have the expected shape; `missing` is the first segment that wasn't there.
    Malformed { missing: &'static str },
}

impl Extraction {
    /// Malformed payloads count as no entries.
    pub fn into_entries(self) -> Vec<TimelineEntry> {
        match self {
            Extraction::Entries { entries, .. } => entries,
            Extraction::Malformed { .. } => Vec::new(),
        }
    }
}

/// Flattens every `TimelineAddEntries` instruction of a search timeline payload into
/// one list of entries, in instruction order, leaving out the cursor markers.
pub fn extract_entries(payload: &Value) -> Extraction {
    let instructions = match lookup_path(payload, &INSTRUCTIONS_PATH) {
        Ok(value) => value,
        Err(missing) => return Extraction::Malformed { missing },
    };
    let Some(instructions) = instructions.as_array() else {
        return Extraction::Malformed {
            missing: "instructions",
        };
    };

    let mut entries = Vec::with_capacity(EXPECTED_ENTRIES_PER_RESPONSE);
    let mut skipped = 0;
    let add_instructions = instructions.iter().filter(|instruction| {
        instruction.get("type").and_then(Value::as_str) == Some(ADD_ENTRIES_INSTRUCTION)
    });

    let mut raw_entries = Vec::new();
    for instruction in add_instructions {
        match instruction.get("entries").and_then(Value::as_array) {
            Some(list) => raw_entries.extend(list),
            None => {
                debug!("{ADD_ENTRIES_INSTRUCTION} instruction without an entries list");
                skipped += 1;
            }
        }
    }

    for raw in raw_entries {
        match TimelineEntry::from_value(raw) {
            Some(entry) if entry.is_cursor() => {}
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }

    Extraction::Entries { entries, skipped }
}

/// Walks `path` one key at a time. Returns the first segment that was absent.
fn lookup_path<'a>(root: &'a Value, path: &[&'static str]) -> Result<&'a Value, &'static str> {
    path.iter()
        .try_fold(root, |node, segment| node.get(*segment).ok_or(*segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(instructions: Value) -> Value {
        json!({
            "data": { "search_by_raw_query": { "search_timeline": { "timeline": {
                "instructions": instructions
            }}}}
        })
    }

    fn user(id: &str) -> Value {
        json!({ "entryId": id, "sortIndex": "1", "content": { "entryType": "TimelineTimelineItem" } })
    }

    fn ids(extraction: Extraction) -> Vec<String> {
        extraction
            .into_entries()
            .into_iter()
            .map(|e| e.entry_id)
            .collect()
    }

    #[test]
    fn flattens_add_entries_in_order_without_cursors() {
        let p = payload(json!([
            { "type": "TimelineClearCache" },
            { "type": "TimelineAddEntries", "entries": [
                user("user-1"), user("user-2"),
                { "entryId": "cursor-top-123", "content": {} },
            ]},
            { "type": "TimelineReplaceEntry", "entry": user("user-99") },
            { "type": "TimelineAddEntries", "entries": [
                user("user-3"),
                { "entryId": "cursor-bottom-456", "content": {} },
            ]},
        ]));
        assert_eq!(ids(extract_entries(&p)), ["user-1", "user-2", "user-3"]);
    }

    #[test]
    fn missing_path_segment_is_malformed() {
        let p = json!({ "data": { "search_by_raw_query": {} } });
        assert_eq!(
            extract_entries(&p),
            Extraction::Malformed {
                missing: "search_timeline"
            }
        );
        assert_eq!(
            extract_entries(&json!({ "errors": [] })),
            Extraction::Malformed { missing: "data" }
        );
    }

    #[test]
    fn non_array_instructions_is_malformed() {
        let p = payload(json!({ "type": "TimelineAddEntries" }));
        assert_eq!(
            extract_entries(&p),
            Extraction::Malformed {
                missing: "instructions"
            }
        );
    }

    #[test]
    fn entries_without_id_are_skipped() {
        let p = payload(json!([
            { "type": "TimelineAddEntries", "entries": [ user("user-1"), { "content": {} }, { "entryId": 7 } ] }
        ]));
        match extract_entries(&p) {
            Extraction::Entries { entries, skipped } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(skipped, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn add_instruction_without_entries_is_counted() {
        let p = payload(json!([
            { "type": "TimelineAddEntries" },
            { "type": "TimelineAddEntries", "entries": { "entryId": "user-1" } },
            { "type": "TimelineAddEntries", "entries": [ user("user-2") ] }
        ]));
        match extract_entries(&p) {
            Extraction::Entries { entries, skipped } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].entry_id, "user-2");
                assert_eq!(skipped, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn entry_serializes_back_to_api_shape() {
        let raw = user("user-7");
        let entry = TimelineEntry::from_value(&raw).unwrap();
        assert_eq!(entry.payload.get("sortIndex"), Some(&json!("1")));
        assert_eq!(serde_json::to_value(&entry).unwrap(), raw);
    }
}

//! 📡 Wire shapes — the exact bytes the document store demands, no more, no less.
//!
//! 🎬 COLD OPEN — INT. CLUSTER — THE `_mget` ENDPOINT — HIGH NOON
//!
//! The combined APIs have rules. The `_mget` API wants a JSON envelope:
//! `{"docs": [ <item>, <item> ]}` — note the absence of a trailing comma,
//! which the JSON spec enforces with the zeal of a hall monitor.
//! The `_bulk` API wants NDJSON: action line, newline, source line, newline.
//! No commas. No brackets. Just vertical whitespace and commitment.
//!
//! 🧠 Knowledge graph:
//! - **Fragments**: each queued block holds one pre-serialized fragment.
//!   Mget fragments end in `,` (stripped from the last one at assembly time).
//!   Bulk fragments end in `\n` and are concatenated verbatim.
//! - **Responses**: `_source` rides as [`RawValue`] — raw JSON carried by the
//!   handle, never re-parsed. We are couriers, not readers.
//! - **Positional contract**: response item `i` belongs to request item `i`.
//!   The backend preserves order. We hold it to that. See [`BulkError::Desync`].
//!
//! ⚠️ When the singularity occurs, `_bulk` will still require two lines per
//! document. Some things transcend consciousness. 🦆

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::BulkError;

/// 📦 Opening frame of the combined `_mget` request envelope.
pub(crate) const MGET_PREFIX: &str = "{\"docs\": [";
/// 📦 Closing frame. Applied after the last fragment's trailing comma is stripped.
pub(crate) const MGET_SUFFIX: &str = "]}";

/// 🔧 Headroom grown into fresh per-item buffers so a typical fragment
/// serializes without reallocating.
pub(crate) const SLOP: usize = 64;

/// 📊 Fallback per-item estimate for sizing the combined buffer when the
/// tracked pending-bytes figure comes in low.
pub(crate) const ROUGH_ESTIMATE_PER_ITEM: usize = 256;

/// 🔄 The bulk verbs — what the `_bulk` API lets you do to a document.
///
/// Each verb becomes the single key of the action metadata line.
/// `Delete` is the minimalist of the family: action line only, no source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// 🆕 Create: insert, fail on conflict. The polite verb.
    Create,
    /// 📝 Index: upsert. The bulldozer verb.
    Index,
    /// 🔧 Update: partial change. Body is the full update payload
    /// (e.g. `{"doc": {...}}`) — passed through untouched.
    Update,
    /// 🗑️ Delete: no body, no source line, no regrets.
    Delete,
}

impl WriteAction {
    /// 🎯 The key the `_bulk` action line (and its response item) is filed under.
    pub fn as_str(self) -> &'static str {
        match self {
            WriteAction::Create => "create",
            WriteAction::Index => "index",
            WriteAction::Update => "update",
            WriteAction::Delete => "delete",
        }
    }

    /// 📦 Does this verb carry a source line after the action line?
    pub fn takes_body(self) -> bool {
        !matches!(self, WriteAction::Delete)
    }
}

/// 📡 Serialize one `_mget` descriptor into `buf`: `{"_index":"…","_id":"…"},`
///
/// The trailing comma is deliberate — fragments are concatenated blind at
/// flush time and the final comma is stripped before the suffix goes on.
/// serde_json does the string escaping so a document id with a quote in it
/// ruins nobody's evening.
pub fn write_mget_fragment(
    buf: &mut Vec<u8>,
    index: &str,
    id: &str,
) -> Result<(), BulkError> {
    let descriptor = serde_json::json!({ "_index": index, "_id": id });
    serde_json::to_writer(&mut *buf, &descriptor)
        .map_err(|e| BulkError::Serialize(e.to_string()))?;
    buf.push(b',');
    Ok(())
}

/// 📡 Serialize one `_bulk` fragment into `buf`: action line, `\n`, and for
/// body-bearing verbs the source line and another `\n`.
///
/// The body is the caller's raw JSON, passed through as-is. We do not parse
/// it. We do not judge it. We are a delivery service, not a book club.
///
/// 💀 Errors if a body-bearing verb arrives without a body, or `Delete`
/// arrives with one — caught here, at submit time, before the block ever
/// wastes a seat in a queue.
pub fn write_bulk_fragment(
    buf: &mut Vec<u8>,
    action: WriteAction,
    index: &str,
    id: Option<&str>,
    body: Option<&[u8]>,
) -> Result<(), BulkError> {
    // 🏗️ Action metadata — the cover letter for each document.
    // Missing `_id` is omitted, not nulled: absent means "backend, you pick".
    let mut meta = serde_json::Map::new();
    meta.insert(
        "_index".to_string(),
        serde_json::Value::String(index.to_string()),
    );
    if let Some(id) = id {
        meta.insert("_id".to_string(), serde_json::Value::String(id.to_string()));
    }
    let action_line = serde_json::json!({ action.as_str(): meta });
    serde_json::to_writer(&mut *buf, &action_line)
        .map_err(|e| BulkError::Serialize(e.to_string()))?;
    buf.push(b'\n');

    match (action.takes_body(), body) {
        (true, Some(body)) => {
            buf.extend_from_slice(body);
            buf.push(b'\n');
        }
        (true, None) => {
            return Err(BulkError::Serialize(format!(
                "bulk '{}' requires a document body",
                action.as_str()
            )));
        }
        (false, Some(_)) => {
            return Err(BulkError::Serialize(
                "bulk 'delete' does not take a document body".to_string(),
            ));
        }
        (false, None) => {}
    }
    Ok(())
}

/// 📦 Parsed combined `_mget` response: an ordered array of per-item results.
#[derive(Debug, Deserialize)]
pub(crate) struct MgetResponse {
    pub docs: Vec<MgetItem>,
}

/// 🎯 One element of a combined `_mget` response — one caller's answer.
///
/// `source` is a [`RawValue`]: the document's JSON rides through the engine
/// as raw bytes and lands in the caller's lap unparsed. The caller wanted
/// the document, not our opinion of it.
#[derive(Debug, Deserialize)]
pub struct MgetItem {
    /// 📡 Which index answered. Echoed by the backend.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// 🎯 Which id answered. Echoed by the backend.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// 🔍 Did the document exist? `false` plus no error = a clean not-found.
    #[serde(default)]
    pub found: bool,
    /// 📦 The document body, raw and unparsed. `None` when not found
    /// (or when the backend was asked not to return sources).
    #[serde(rename = "_source")]
    pub source: Option<Box<RawValue>>,
    /// 💀 Per-item error object, when this one item went sideways.
    #[serde(default)]
    pub error: Option<ItemError>,
}

impl MgetItem {
    /// 🔄 Map this parsed item to its per-item error condition, if any.
    ///
    /// Priority: an explicit error object wins, then `found: false` becomes
    /// [`BulkError::NotFound`]. A found item with no error derives nothing —
    /// the caller gets the document and we get to go home.
    pub(crate) fn derive_error(&self) -> Option<BulkError> {
        if let Some(err) = &self.error {
            return Some(BulkError::ItemFailed {
                kind: err.kind.clone(),
                reason: err.reason.clone(),
            });
        }
        if !self.found {
            return Some(BulkError::NotFound {
                index: self.index.clone(),
                id: self.id.clone(),
            });
        }
        None
    }

    /// 📦 The raw `_source` bytes, if the document was found with a body.
    pub fn source_bytes(&self) -> Option<&[u8]> {
        self.source.as_deref().map(|raw| raw.get().as_bytes())
    }
}

/// 💀 The error object a backend attaches to one failed response item.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ItemError {
    /// 🔧 The backend's error type, e.g. `version_conflict_engine_exception`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// 💬 The human-facing reason. Dark poetry, usually.
    #[serde(default)]
    pub reason: String,
}

/// 📦 Parsed combined `_bulk` response.
#[derive(Debug, Deserialize)]
pub(crate) struct BulkResponse {
    /// ⚠️ True when at least one item failed. We derive per-item anyway,
    /// but it makes the flush telemetry honest.
    #[serde(default)]
    pub errors: bool,
    pub items: Vec<BulkItemEnvelope>,
}

/// 🎭 One `_bulk` response element, still wearing its verb-keyed disguise:
/// `{"index": {...}}` or `{"delete": {...}}`. One key per element. Always.
#[derive(Debug, Deserialize)]
pub(crate) struct BulkItemEnvelope(HashMap<String, BulkItem>);

impl BulkItemEnvelope {
    /// 🔄 Unwrap the single verb key. An empty map means the backend broke
    /// its own wire contract, which we classify as a parse failure.
    pub(crate) fn into_item(self) -> Result<BulkItem, BulkError> {
        let mut entries = self.0.into_iter();
        match entries.next() {
            Some((_verb, item)) => Ok(item),
            None => Err(BulkError::PayloadParse(
                "bulk response item carried no verb key".to_string(),
            )),
        }
    }
}

/// 🎯 One caller's answer from a combined `_bulk` call.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BulkItem {
    /// 📡 Which index the write landed in.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// 🎯 The document id — backend-generated when the caller didn't supply one.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// 🔢 Per-item HTTP-ish status. 2xx good, 404 gone, 409 contested.
    #[serde(default)]
    pub status: u16,
    /// 💬 The backend's one-word verdict: `created`, `updated`, `deleted`...
    #[serde(default)]
    pub result: Option<String>,
    /// 💀 Per-item error object when this write went sideways.
    #[serde(default)]
    pub error: Option<ItemError>,
}

impl BulkItem {
    /// 🔄 Map this parsed item to its per-item error condition, if any.
    ///
    /// 404 → [`BulkError::NotFound`] (deleting the already-deleted),
    /// 409 → [`BulkError::Conflict`] (create lost the race),
    /// anything else non-2xx → [`BulkError::ItemFailed`].
    pub(crate) fn derive_error(&self) -> Option<BulkError> {
        match self.status {
            200..=299 => None,
            404 => Some(BulkError::NotFound {
                index: self.index.clone(),
                id: self.id.clone(),
            }),
            409 => Some(BulkError::Conflict {
                index: self.index.clone(),
                id: self.id.clone(),
            }),
            _ => {
                let err = self.error.clone().unwrap_or_default();
                Some(BulkError::ItemFailed {
                    kind: err.kind,
                    reason: err.reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 🧪 Wire tests: where every byte is accounted for and every comma audited.

    #[test]
    fn the_one_where_an_mget_fragment_ends_with_a_comma() {
        // 🧪 Fragments get concatenated blind; the comma is part of the contract.
        let mut buf = Vec::new();
        write_mget_fragment(&mut buf, "fleet-agents", "agent-1").unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"_id":"agent-1","_index":"fleet-agents"},"#
        );
    }

    #[test]
    fn the_one_where_a_spicy_id_gets_escaped() {
        // 🧪 A quote in the id must not detonate the envelope.
        let mut buf = Vec::new();
        write_mget_fragment(&mut buf, "idx", r#"we"ird"#).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains(r#"we\"ird"#), "got: {s}");
        // ✅ Still valid JSON once the trailing comma comes off.
        let parsed: serde_json::Value = serde_json::from_str(&s[..s.len() - 1]).unwrap();
        assert_eq!(parsed["_id"], r#"we"ird"#);
    }

    #[test]
    fn the_one_where_bulk_index_makes_two_lines() {
        // 🧪 Action line, newline, source line, newline. The sacred pair.
        let mut buf = Vec::new();
        write_bulk_fragment(
            &mut buf,
            WriteAction::Index,
            "idx",
            Some("doc-1"),
            Some(br#"{"field":"value"}"#),
        )
        .unwrap();
        let s = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = s.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "idx");
        assert_eq!(action["index"]["_id"], "doc-1");
        assert_eq!(lines[1], r#"{"field":"value"}"#);
        assert!(s.ends_with('\n'), "bulk fragments end with a newline");
    }

    #[test]
    fn the_one_where_delete_travels_light() {
        // 🧪 Delete: one line, no body, no `_id` drama.
        let mut buf = Vec::new();
        write_bulk_fragment(&mut buf, WriteAction::Delete, "idx", Some("doc-9"), None).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert_eq!(s.matches('\n').count(), 1);
        assert!(s.starts_with(r#"{"delete":"#), "got: {s}");
    }

    #[test]
    fn the_one_where_a_bodyless_index_is_refused_at_the_door() {
        // 🧪 Submit-time validation beats flush-time surprise.
        let mut buf = Vec::new();
        let err = write_bulk_fragment(&mut buf, WriteAction::Index, "idx", None, None).unwrap_err();
        assert!(matches!(err, BulkError::Serialize(_)));

        let err = write_bulk_fragment(&mut buf, WriteAction::Delete, "idx", Some("x"), Some(b"{}"))
            .unwrap_err();
        assert!(matches!(err, BulkError::Serialize(_)));
    }

    #[test]
    fn the_one_where_found_false_becomes_not_found() {
        // 🧪 `found: false` with no error object = the clean miss.
        let body = r#"{"docs":[{"_index":"idx","_id":"b","found":false}]}"#;
        let resp: MgetResponse = serde_json::from_str(body).unwrap();
        let item = &resp.docs[0];
        assert!(matches!(
            item.derive_error(),
            Some(BulkError::NotFound { .. })
        ));
        assert!(item.source_bytes().is_none());
    }

    #[test]
    fn the_one_where_source_rides_through_unparsed() {
        // 🧪 RawValue means the document body survives byte-for-byte.
        let body = r#"{"docs":[{"_index":"idx","_id":"a","found":true,"_source":{"nested":{"deep":[1,2,3]}}}]}"#;
        let resp: MgetResponse = serde_json::from_str(body).unwrap();
        let src = resp.docs[0].source_bytes().unwrap();
        assert_eq!(src, br#"{"nested":{"deep":[1,2,3]}}"#);
        assert!(resp.docs[0].derive_error().is_none());
    }

    #[test]
    fn the_one_where_the_bulk_envelope_sheds_its_verb() {
        // 🧪 `{"index": {...}}` unwraps to the inner item regardless of verb.
        let body = r#"{"errors":true,"items":[
            {"index":{"_index":"idx","_id":"a","status":201,"result":"created"}},
            {"delete":{"_index":"idx","_id":"b","status":404}}
        ]}"#;
        let resp: BulkResponse = serde_json::from_str(body).unwrap();
        assert!(resp.errors);
        let first = resp.items.into_iter().next().unwrap().into_item().unwrap();
        assert_eq!(first.status, 201);
        assert_eq!(first.result.as_deref(), Some("created"));
        assert!(first.derive_error().is_none());
    }

    #[test]
    fn the_one_where_status_codes_pick_their_variant() {
        // 🧪 404 and 409 get first-class variants; the rest are ItemFailed.
        let mk = |status: u16| BulkItem {
            index: "idx".into(),
            id: "a".into(),
            status,
            result: None,
            error: Some(ItemError {
                kind: "mapper_parsing_exception".into(),
                reason: "the mapping disagrees".into(),
            }),
        };
        assert!(matches!(
            mk(404).derive_error(),
            Some(BulkError::NotFound { .. })
        ));
        assert!(matches!(
            mk(409).derive_error(),
            Some(BulkError::Conflict { .. })
        ));
        assert!(matches!(
            mk(400).derive_error(),
            Some(BulkError::ItemFailed { .. })
        ));
        assert!(mk(201).derive_error().is_none());
    }
}

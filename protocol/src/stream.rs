//! Sync stream framing.
//!
//! A sync stream is a pseudo JSON array with one value per line:
//!
//! ```text
//! [
//! {"last_known_generation": 0, ...},
//! {"id": "doc1", ...},
//! {"id": "doc2", ...}
//! ]
//! ```
//!
//! Line 1 is exactly `[` and the last non-empty line is exactly `]`. Every data line
//! except the last one ends with a comma. The first data line is a metadata object,
//! the rest are entries. A JSON object in place of the closing `]` is an error
//! reported by the remote side.

use {
    serde::{Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
    thiserror::Error,
};

const OPEN: &str = "[";
const CLOSE: &str = "]";
const LINE_END: &str = "\r\n";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("broken sync stream: {0}")]
    Broken(String),
    #[error("remote sync error: {}", Value::Object(.0.clone()))]
    Remote(Map<String, Value>),
}

fn broken(msg: impl Into<String>) -> StreamError {
    StreamError::Broken(msg.into())
}

/// Decoded contents of a sync stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStream<M, E> {
    pub metadata: M,
    pub entries: Vec<E>,
}

/// Incrementally builds a sync stream.
#[derive(Debug)]
pub struct StreamWriter {
    buf: String,
    lines: usize,
}

impl Default for StreamWriter {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self {
            buf: OPEN.to_owned(),
            lines: 0,
        }
    }

    /// Appends a data line. The first line written must be the metadata object.
    #[inline]
    pub fn write_line<T: Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        let json = serde_json::to_string(value)?;
        if self.lines > 0 {
            self.buf.push(',');
        }
        self.buf.push_str(LINE_END);
        self.buf.push_str(&json);
        self.lines = self.lines.saturating_add(1);
        Ok(())
    }

    #[must_use]
    #[inline]
    pub fn finish(mut self) -> String {
        self.buf.push_str(LINE_END);
        self.buf.push_str(CLOSE);
        self.buf.push_str(LINE_END);
        self.buf
    }

    /// Terminates the stream with an error object instead of the closing bracket.
    #[must_use]
    #[inline]
    pub fn finish_with_error(mut self, error: &Map<String, Value>) -> String {
        self.buf.push_str(LINE_END);
        self.buf.push_str(&Value::Object(error.clone()).to_string());
        self.buf.push_str(LINE_END);
        self.buf
    }
}

#[inline]
pub fn encode<M: Serialize, E: Serialize>(
    metadata: &M,
    entries: &[E],
) -> serde_json::Result<String> {
    let mut writer = StreamWriter::new();
    writer.write_line(metadata)?;
    for entry in entries {
        writer.write_line(entry)?;
    }
    Ok(writer.finish())
}

fn strip_comma(line: &str) -> (&str, bool) {
    match line.strip_suffix(',') {
        Some(line) => (line, true),
        None => (line, false),
    }
}

fn parse_line<T: DeserializeOwned>(line: &str, line_number: usize) -> Result<T, StreamError> {
    serde_json::from_str(line).map_err(|err| broken(format!("line {line_number}: {err}")))
}

/// Decodes a complete sync stream.
///
/// Nothing is returned unless the whole stream is well-formed.
#[inline]
pub fn decode<M: DeserializeOwned, E: DeserializeOwned>(
    data: &str,
) -> Result<SyncStream<M, E>, StreamError> {
    let mut lines: Vec<&str> = data.lines().collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    let (&first, rest) = lines.split_first().ok_or_else(|| broken("empty stream"))?;
    if first != OPEN {
        return Err(broken("missing opening bracket"));
    }
    let (&last, data_lines) = rest
        .split_last()
        .ok_or_else(|| broken("missing closing bracket"))?;
    if last != CLOSE {
        if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(last) {
            return Err(StreamError::Remote(payload));
        }
        return Err(broken("missing closing bracket"));
    }

    let mut lines = data_lines.iter().zip(2_usize..);
    let (&metadata_line, _) = lines.next().ok_or_else(|| broken("missing metadata line"))?;
    let (metadata_line, mut comma) = strip_comma(metadata_line);
    let metadata = parse_line(metadata_line, 2)?;

    let mut entries = Vec::with_capacity(data_lines.len().saturating_sub(1));
    for (&line, line_number) in lines {
        if !comma {
            return Err(broken(format!(
                "missing comma before line {line_number}"
            )));
        }
        let (line, has_comma) = strip_comma(line);
        comma = has_comma;
        entries.push(parse_line(line, line_number)?);
    }
    if comma {
        return Err(broken("comma after the last line"));
    }
    Ok(SyncStream { metadata, entries })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            Generation,
            endpoints::{DocEntry, SyncRequestMetadata, SyncResponseMetadata},
        },
        serde_json::json,
    };

    type ResponseStream = SyncStream<SyncResponseMetadata, DocEntry>;

    fn metadata() -> SyncResponseMetadata {
        SyncResponseMetadata {
            new_generation: Generation(7),
            new_transaction_id: "T-7".into(),
            replica_uid: Some("server".into()),
        }
    }

    fn entry(i: u64) -> DocEntry {
        DocEntry {
            id: format!("doc{i}"),
            rev: Some(format!("rev{i}")),
            content: Value::String(format!(r#"{{"_encrypted_json":"{i}","_encryption_scheme":"symkey"}}"#)),
            generation: Generation(i),
            trans_id: format!("T-{i}").into(),
        }
    }

    #[test]
    fn roundtrip_metadata_only() {
        let data = encode::<_, DocEntry>(&metadata(), &[]).unwrap();
        assert_eq!(
            data,
            "[\r\n{\"new_generation\":7,\"new_transaction_id\":\"T-7\",\"replica_uid\":\"server\"}\r\n]\r\n"
        );
        let stream: ResponseStream = decode(&data).unwrap();
        assert_eq!(stream.metadata, metadata());
        assert!(stream.entries.is_empty());
    }

    #[test]
    fn roundtrip_entries() {
        let entries = vec![entry(1), entry(2), entry(3)];
        let data = encode(&metadata(), &entries).unwrap();
        let stream: ResponseStream = decode(&data).unwrap();
        assert_eq!(stream.metadata, metadata());
        assert_eq!(stream.entries, entries);
    }

    #[test]
    fn comma_placement() {
        let data = encode(&metadata(), &[entry(1), entry(2)]).unwrap();
        let lines: Vec<&str> = data.split("\r\n").collect();
        assert_eq!(lines.first(), Some(&"["));
        assert!(lines.get(1).unwrap().ends_with(','));
        assert!(lines.get(2).unwrap().ends_with(','));
        assert!(lines.get(3).unwrap().ends_with('}'));
        assert_eq!(lines.get(4), Some(&"]"));
    }

    #[test]
    fn tombstone_entry() {
        let mut tombstone = entry(1);
        tombstone.content = Value::Null;
        let data = encode(&metadata(), &[tombstone.clone()]).unwrap();
        assert!(data.contains("\"content\":null"));
        let stream: ResponseStream = decode(&data).unwrap();
        assert_eq!(stream.entries, vec![tombstone]);
    }

    #[test]
    fn null_revision() {
        let data = "[\r\n{\"new_generation\": 1, \"new_transaction_id\": \"T\"},\r\n{\"id\": \"a\", \"rev\": null, \"content\": null, \"gen\": 1, \"trans_id\": \"T\"}\r\n]";
        let stream: ResponseStream = decode(data).unwrap();
        assert_eq!(stream.entries.len(), 1);
        assert_eq!(stream.entries.first().unwrap().rev, None);
    }

    #[test]
    fn accepts_plain_newlines() {
        let data = "[\n{\"last_known_generation\": 1, \"last_known_trans_id\": \"\", \"ensure\": false}\n]";
        let stream: SyncStream<SyncRequestMetadata, DocEntry> = decode(data).unwrap();
        assert_eq!(stream.metadata.last_known_generation, Generation(1));
        assert!(!stream.metadata.ensure);
    }

    fn assert_broken(data: &str) {
        match decode::<SyncResponseMetadata, DocEntry>(data) {
            Err(StreamError::Broken(_)) => {}
            other => panic!("expected broken stream for {data:?}, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_framing() {
        let meta = r#"{"new_generation": 1, "new_transaction_id": "T"}"#;
        let doc = r#"{"id": "a", "rev": "r", "content": null, "gen": 1, "trans_id": "T"}"#;
        assert_broken("");
        assert_broken("\r\n\r\n");
        assert_broken("[");
        assert_broken("[\r\n]");
        assert_broken(&format!("{meta}\r\n]"));
        assert_broken(&format!("[\r\n{meta},\r\n\"text\""));
        assert_broken(&format!("[\r\n{meta}\r\nnot json"));
        // missing separating comma
        assert_broken(&format!("[\r\n{meta}\r\n{doc}\r\n]"));
        // comma after the last entry
        assert_broken(&format!("[\r\n{meta},\r\n{doc},\r\n]"));
        assert_broken(&format!("[\r\n{meta},\r\n]"));
        // malformed line
        assert_broken(&format!("[\r\n{meta},\r\n{{\"id\": \r\n]"));
        // missing required fields
        for missing in ["id", "rev", "content", "gen", "trans_id"] {
            let mut entry: Map<String, Value> = serde_json::from_str(doc).unwrap();
            entry.remove(missing).unwrap();
            assert_broken(&format!("[\r\n{meta},\r\n{}\r\n]", Value::Object(entry)));
        }
        assert_broken("[\r\n{\"new_generation\": 1}\r\n]");
    }

    #[test]
    fn error_payload_in_place_of_closing_bracket() {
        let data = "[\r\n{\"new_generation\": 1, \"new_transaction_id\": \"T\"}\r\n{\"error\": \"invalid_generation\"}";
        match decode::<SyncResponseMetadata, DocEntry>(data) {
            Err(StreamError::Remote(payload)) => {
                assert_eq!(Value::Object(payload), json!({"error": "invalid_generation"}));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn error_writer() {
        let mut writer = StreamWriter::new();
        writer.write_line(&metadata()).unwrap();
        let error = json!({"error": "unavailable"});
        let data = writer.finish_with_error(error.as_object().unwrap());
        match decode::<SyncResponseMetadata, DocEntry>(&data) {
            Err(StreamError::Remote(payload)) => assert_eq!(Value::Object(payload), error),
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}

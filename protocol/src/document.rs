use {
    anyhow::{Result, bail},
    serde_json::{Map, Value},
};

/// A replicated JSON document.
///
/// A document with `None` content is a tombstone: it records the deletion of
/// `doc_id` and is never encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub rev: Option<String>,
    pub content: Option<Map<String, Value>>,
    pub has_conflicts: bool,
    /// Non-syncable documents are never sent to the remote replica.
    pub syncable: bool,
}

impl Document {
    #[must_use]
    #[inline]
    pub fn new(
        doc_id: impl Into<String>,
        rev: Option<String>,
        content: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev,
            content,
            has_conflicts: false,
            syncable: true,
        }
    }

    /// Creates a document from the JSON serialization of its content.
    #[inline]
    pub fn from_json(doc_id: impl Into<String>, rev: Option<String>, json: &str) -> Result<Self> {
        let mut doc = Self::new(doc_id, rev, None);
        doc.set_json(json)?;
        Ok(doc)
    }

    #[must_use]
    #[inline]
    pub fn tombstone(doc_id: impl Into<String>, rev: Option<String>) -> Self {
        Self::new(doc_id, rev, None)
    }

    #[must_use]
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.content.is_none()
    }

    #[must_use]
    #[inline]
    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    /// Returns the JSON serialization of the content, or `None` for a tombstone.
    #[must_use]
    #[inline]
    pub fn get_json(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|content| Value::Object(content.clone()).to_string())
    }

    /// Replaces the content. `json` must be an object or `null`.
    #[inline]
    pub fn set_json(&mut self, json: &str) -> Result<()> {
        self.content = match serde_json::from_str(json)? {
            Value::Null => None,
            Value::Object(content) => Some(content),
            other => bail!("document content must be an object, got `{other}`"),
        };
        Ok(())
    }

    #[must_use]
    #[inline]
    pub fn with_syncable(mut self, syncable: bool) -> Self {
        self.syncable = syncable;
        self
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn json_roundtrip() {
        let doc = Document::from_json("doc1", Some("rev1".into()), r#"{"a":1,"b":[true]}"#).unwrap();
        assert!(!doc.is_tombstone());
        assert!(doc.syncable);
        assert_eq!(doc.rev(), Some("rev1"));
        let again = Document::from_json("doc1", Some("rev1".into()), &doc.get_json().unwrap()).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn null_is_tombstone() {
        let doc = Document::from_json("doc1", None, "null").unwrap();
        assert!(doc.is_tombstone());
        assert_eq!(doc.get_json(), None);
    }

    #[test]
    fn rejects_non_object_content() {
        Document::from_json("doc1", None, "[1, 2]").unwrap_err();
        Document::from_json("doc1", None, "\"text\"").unwrap_err();
        Document::from_json("doc1", None, "{").unwrap_err();
    }

    #[test]
    fn set_json_replaces_content() {
        let mut doc = Document::new("doc1", None, json!({"x": 1}).as_object().cloned());
        doc.set_json(r#"{"y":2}"#).unwrap();
        assert_eq!(doc.content, json!({"y": 2}).as_object().cloned());
    }
}

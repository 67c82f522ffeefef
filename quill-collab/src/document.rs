//! The replicated document capability.
//!
//! The sync engine never interprets CRDT bytes. It only needs four
//! operations (read text, apply update, encode state vector, encode a
//! diff) plus change notifications, so the document is injected behind
//! the [`ReplicatedDocument`] trait. [`TextDocument`] is the shipped
//! Yrs-backed implementation holding a single `"content"` text root.
//!
//! Every mutation flows through a Yrs transaction. Remote applies are
//! tagged with a `"remote"` transaction origin so the update observer
//! can mark the resulting change notification; that tag is what keeps
//! remote updates from being echoed back to the network.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Subscription, Text, TextRef, Transact, Update};

/// Where a document change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A local edit (or an untagged transaction, treated as local).
    Local,
    /// An update applied from the network. Never re-broadcast.
    Remote,
}

/// A change notification emitted on every document mutation.
#[derive(Debug, Clone)]
pub struct DocChange {
    /// Encoded delta describing the mutation.
    pub update: Vec<u8>,
    pub origin: Origin,
}

/// The injected CRDT capability the sync engine works against.
pub trait ReplicatedDocument: Send + Sync + 'static {
    /// The full document text as currently merged.
    fn current_text(&self) -> String;

    /// Apply an encoded update, tagged with its origin.
    fn apply_update(&self, update: &[u8], origin: Origin) -> Result<(), DocumentError>;

    /// Compact summary of everything this replica has seen.
    fn encode_state_vector(&self) -> Vec<u8>;

    /// Minimal diff against a peer's state vector.
    fn encode_update_since(&self, peer_vector: &[u8]) -> Result<Vec<u8>, DocumentError>;

    /// Register change notifications. Replaces any previous subscriber.
    fn subscribe(&self, tx: UnboundedSender<DocChange>) -> Result<(), DocumentError>;
}

/// Transaction origin marking updates applied from the network.
const REMOTE_ORIGIN: &str = "remote";

/// Yrs-backed text document with a single `"content"` root.
#[derive(Clone)]
pub struct TextDocument {
    doc: Doc,
    text: TextRef,
    subscription: Arc<Mutex<Option<Subscription>>>,
}

impl TextDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("content");
        Self {
            doc,
            text,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Create with initial content (a local edit).
    pub fn with_text(content: &str) -> Self {
        let document = Self::new();
        if !content.is_empty() {
            let mut txn = document.doc.transact_mut();
            document.text.insert(&mut txn, 0, content);
        }
        document
    }

    /// Insert text at a character index (local edit).
    pub fn insert(&self, index: u32, chunk: &str) {
        let mut txn = self.doc.transact_mut();
        self.text.insert(&mut txn, index, chunk);
    }

    /// Delete a range of characters (local edit).
    pub fn delete(&self, index: u32, len: u32) {
        let mut txn = self.doc.transact_mut();
        self.text.remove_range(&mut txn, index, len);
    }

    /// Replace the whole content in one transaction if it differs.
    /// Used to push editor state into the document.
    pub fn set_text(&self, content: &str) {
        let mut txn = self.doc.transact_mut();
        let current = self.text.get_string(&txn);
        if current != content {
            let len = self.text.len(&txn);
            self.text.remove_range(&mut txn, 0, len);
            self.text.insert(&mut txn, 0, content);
        }
    }

    /// Current content length in characters.
    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedDocument for TextDocument {
    fn current_text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    fn apply_update(&self, update: &[u8], origin: Origin) -> Result<(), DocumentError> {
        let decoded = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = match origin {
            Origin::Remote => self.doc.transact_mut_with(REMOTE_ORIGIN),
            Origin::Local => self.doc.transact_mut(),
        };
        txn.apply_update(decoded)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    fn encode_update_since(&self, peer_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let sv =
            StateVector::decode_v1(peer_vector).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    fn subscribe(&self, tx: UnboundedSender<DocChange>) -> Result<(), DocumentError> {
        let remote = yrs::Origin::from(REMOTE_ORIGIN);
        let sub = self
            .doc
            .observe_update_v1(move |txn, event| {
                let origin = if txn.origin() == Some(&remote) {
                    Origin::Remote
                } else {
                    Origin::Local
                };
                // Receiver gone means the session is being torn down.
                let _ = tx.send(DocChange {
                    update: event.update.clone(),
                    origin,
                });
            })
            .map_err(|e| DocumentError::Observe(e.to_string()))?;

        let mut guard = self
            .subscription
            .lock()
            .map_err(|_| DocumentError::Observe("subscription lock poisoned".to_string()))?;
        *guard = Some(sub);
        Ok(())
    }
}

/// Document errors.
#[derive(Debug, Clone)]
pub enum DocumentError {
    Decode(String),
    Apply(String),
    Observe(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Failed to decode update: {e}"),
            Self::Apply(e) => write!(f, "Document rejected update: {e}"),
            Self::Observe(e) => write!(f, "Failed to observe document: {e}"),
        }
    }
}

impl std::error::Error for DocumentError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_new_document_is_empty() {
        let doc = TextDocument::new();
        assert_eq!(doc.current_text(), "");
        assert!(doc.is_empty());
    }

    #[test]
    fn test_insert_and_delete() {
        let doc = TextDocument::new();
        doc.insert(0, "hello world");
        assert_eq!(doc.current_text(), "hello world");

        doc.delete(5, 6);
        assert_eq!(doc.current_text(), "hello");
        assert_eq!(doc.len(), 5);
    }

    #[test]
    fn test_with_text() {
        let doc = TextDocument::with_text("seeded");
        assert_eq!(doc.current_text(), "seeded");
    }

    #[test]
    fn test_set_text_replaces_content() {
        let doc = TextDocument::with_text("before");
        doc.set_text("after");
        assert_eq!(doc.current_text(), "after");
    }

    #[test]
    fn test_set_text_noop_when_equal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let doc = TextDocument::with_text("same");
        doc.subscribe(tx).unwrap();

        doc.set_text("same");
        assert!(rx.try_recv().is_err(), "no change should be emitted");
    }

    #[test]
    fn test_two_documents_sync_via_diff() {
        let a = TextDocument::with_text("shared text");
        let b = TextDocument::new();

        let diff = a.encode_update_since(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff, Origin::Remote).unwrap();

        assert_eq!(b.current_text(), "shared text");
    }

    #[test]
    fn test_empty_diff_when_caught_up() {
        let a = TextDocument::with_text("abc");
        let b = TextDocument::new();

        let diff = a.encode_update_since(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff, Origin::Remote).unwrap();

        // B is caught up now; a second diff carries nothing new, and
        // applying it changes nothing.
        let second = a.encode_update_since(&b.encode_state_vector()).unwrap();
        b.apply_update(&second, Origin::Remote).unwrap();
        assert_eq!(b.current_text(), "abc");
    }

    #[test]
    fn test_subscribe_tags_local_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let doc = TextDocument::new();
        doc.subscribe(tx).unwrap();

        doc.insert(0, "local edit");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.origin, Origin::Local);
        assert!(!change.update.is_empty());
    }

    #[test]
    fn test_subscribe_tags_remote_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TextDocument::with_text("from peer");
        let doc = TextDocument::new();
        doc.subscribe(tx).unwrap();

        let diff = source
            .encode_update_since(&doc.encode_state_vector())
            .unwrap();
        doc.apply_update(&diff, Origin::Remote).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.origin, Origin::Remote);
    }

    #[test]
    fn test_apply_update_rejects_garbage() {
        let doc = TextDocument::new();
        let result = doc.apply_update(&[0xFF, 0xFE, 0xFD, 0xFC], Origin::Remote);
        assert!(result.is_err());
        assert_eq!(doc.current_text(), "");
    }

    #[test]
    fn test_state_vector_reflects_local_edits() {
        let doc = TextDocument::new();
        let before = doc.encode_state_vector();
        doc.insert(0, "offline edit");
        let after = doc.encode_state_vector();
        assert_ne!(before, after);
    }

    #[test]
    fn test_local_change_emitted_from_observer_update_is_applicable() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = TextDocument::new();
        a.subscribe(tx).unwrap();
        a.insert(0, "hi");

        let change = rx.try_recv().unwrap();
        let b = TextDocument::new();
        b.apply_update(&change.update, Origin::Remote).unwrap();
        assert_eq!(b.current_text(), "hi");
    }
}

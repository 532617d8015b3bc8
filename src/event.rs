//! Event types and the serialization seam
//!
//! The buffer treats event payloads as opaque single-line text; turning a
//! domain event into that text (and back) is the job of an `EventCodec`
//! implementation injected by the caller. `JsonCodec` is the reference
//! implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// An event handed to `Buffer::produce`, not yet sequenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Serialized event text; must not contain a newline.
    pub payload: String,
    /// Out-of-band attachments, keyed by attachment id; values are the
    /// producer-side temporary paths the files will be moved from.
    pub attachments: BTreeMap<String, PathBuf>,
}

impl NewEvent {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            attachments: BTreeMap::new(),
        }
    }

    pub fn with_attachment(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.attachments.insert(id.into(), path.into());
        self
    }
}

/// An event read back from the buffer, with its assigned sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub payload: String,
}

/// Two-way conversion between domain events and single-line payload text.
pub trait EventCodec {
    type Event;

    /// Serialize an event into single-line payload text.
    fn serialize(&self, event: &Self::Event) -> String;

    /// Deserialize payload text back into an event; `None` for text this
    /// codec does not understand.
    fn deserialize(&self, text: &str) -> Option<Self::Event>;
}

/// JSON event codec over `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    type Event = serde_json::Value;

    fn serialize(&self, event: &Self::Event) -> String {
        // Compact JSON is newline-free by construction.
        event.to_string()
    }

    fn deserialize(&self, text: &str) -> Option<Self::Event> {
        serde_json::from_str(text).ok()
    }
}

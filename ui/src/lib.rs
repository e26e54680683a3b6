use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Message exchanged with the view layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub name: String,
    pub payload: Value,
}

impl UiMessage {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Builds a message from any serializable payload.
    pub fn encode<T: Serialize>(name: impl Into<String>, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    /// Reads the payload back as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

/// Interface for delivering governor signals to the view layer.
pub trait UiBridge {
    fn send(&self, message: UiMessage);
}

/// Bridge that drops every message.
#[derive(Debug, Default)]
pub struct NoopUiBridge;

impl UiBridge for NoopUiBridge {
    fn send(&self, _message: UiMessage) {}
}

/// Bridge that writes each message as one JSON line to the log.
#[derive(Debug, Default)]
pub struct LogUiBridge;

impl UiBridge for LogUiBridge {
    fn send(&self, message: UiMessage) {
        info!(target: "ebb::signal", name = %message.name, payload = %message.payload, "signal");
    }
}

/// Bridge that keeps every message for later inspection. Clones share the
/// same history.
#[derive(Debug, Default, Clone)]
pub struct RecordingBridge {
    messages: Rc<RefCell<Vec<UiMessage>>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages.borrow().clone()
    }

    /// Messages with the given name, oldest first.
    pub fn named(&self, name: &str) -> Vec<UiMessage> {
        self.messages
            .borrow()
            .iter()
            .filter(|message| message.name == name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl UiBridge for RecordingBridge {
    fn send(&self, message: UiMessage) {
        self.messages.borrow_mut().push(message);
    }
}

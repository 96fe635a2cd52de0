//! Build-log message sink.

use std::sync::Mutex;

/// Receives human-readable progress and result messages.
pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards messages to `tracing` under the `imagecheck::ui` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        tracing::info!(target: "imagecheck::ui", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "imagecheck::ui", "{message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    Say(String),
    Error(String),
}

/// Records every message in order.
#[derive(Debug, Default)]
pub struct BufferUi {
    messages: Mutex<Vec<UiMessage>>,
}

impl BufferUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.lock().clone()
    }

    /// All messages joined by newlines, regardless of kind.
    pub fn transcript(&self) -> String {
        self.lock()
            .iter()
            .map(|m| match m {
                UiMessage::Say(s) | UiMessage::Error(s) => s.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|m| match m {
                UiMessage::Error(s) => Some(s.clone()),
                UiMessage::Say(_) => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UiMessage>> {
        // A poisoned buffer still holds every message written before the panic.
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Ui for BufferUi {
    fn say(&self, message: &str) {
        self.lock().push(UiMessage::Say(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.lock().push(UiMessage::Error(message.to_string()));
    }
}

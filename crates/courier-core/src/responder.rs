//! Reply policies for inbound messages.

/// Computes the reply for an inbound text.
///
/// Implement this trait to swap in forwarding, command parsing or any other
/// policy. Returning `None` sends nothing.
pub trait AutoResponder: Send + Sync {
    /// Reply for `text`, if any.
    fn reply(&self, text: &str) -> Option<String>;
}

/// Acknowledges every message by quoting it back.
#[derive(Debug, Default, Clone)]
pub struct EchoResponder;

impl AutoResponder for EchoResponder {
    fn reply(&self, text: &str) -> Option<String> {
        Some(format!(
            "Hello! I am an AI assistant. I received your message: \"{text}\""
        ))
    }
}

/// Never replies.
#[derive(Debug, Default, Clone)]
pub struct SilentResponder;

impl AutoResponder for SilentResponder {
    fn reply(&self, _text: &str) -> Option<String> {
        None
    }
}

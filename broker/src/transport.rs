//! The injected pub/sub transport (spec §1): subject matching, client
//! connections, and wildcard interest live outside the core and are
//! provided by whatever embeds this crate.

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// A stream of inbound messages on a subscribed subject or filter.
pub type InboundStream = tokio::sync::mpsc::UnboundedReceiver<InboundMessage>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe to a subject (possibly containing wildcards); returns a
    /// stream of matching inbound messages.
    async fn subscribe(&self, subject: &str) -> InboundStream;

    /// Publish `payload` to `subject`, optionally carrying a reply-to
    /// subject a recipient can answer on.
    async fn publish(&self, subject: &str, reply: Option<&str>, payload: Bytes);

    /// Does any subscriber currently have interest in `subject`? Used by
    /// the ephemeral-observable inactivity checker.
    fn has_interest(&self, subject: &str) -> bool;
}

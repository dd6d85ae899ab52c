pub mod client;
pub mod types;

use client::TransportError;
use types::Exchange;

/// The remote assistant as seen by the interaction loop.
pub trait ChatBackend {
    /// Sends one resolved message. `chat_id` continues an existing
    /// conversation; `None` asks the server to start a new one.
    async fn send_message(
        &mut self,
        message: &str,
        chat_id: Option<&str>,
    ) -> Result<Exchange, TransportError>;

    /// Tells the server a persistent conversation is over.
    async fn finish_chat(&mut self, chat_id: &str) -> Result<(), TransportError>;
}

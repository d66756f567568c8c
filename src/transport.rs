pub mod telegram;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{ChatId, InboundMessage};

/// Chat transport carrying commands in and replies/alerts out.
pub trait Transport: Send + Sync {
    /// Deliver one text message. A single attempt; retries belong to the dispatcher.
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>>;

    /// Receive inbound messages.
    ///
    /// Sends `InboundMessage` values into `tx` until `cancel` is triggered.
    fn receive(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>>;
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::ChatId;
use crate::transport::Transport;

/// Delivery attempts per message before it is dropped.
pub const MAX_ATTEMPTS: usize = 5;

struct Outgoing {
    chat_id: ChatId,
    text: String,
}

/// Fire-and-forget sender for replies and alerts.
///
/// Every message goes through one worker task, so delivery order matches the order of
/// [`NotificationDispatcher::send`] calls.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl NotificationDispatcher {
    /// Spawn the delivery worker. `retry_delay` is the wait after the first failed
    /// attempt and doubles after each further failure.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(delivery_loop(rx, transport, retry_delay, cancel));
        (Self { tx }, handle)
    }

    pub fn send(&self, chat_id: ChatId, text: impl Into<String>) {
        let outgoing = Outgoing {
            chat_id,
            text: text.into(),
        };
        if self.tx.send(outgoing).is_err() {
            warn!(chat_id, "dispatcher stopped, dropping message");
        }
    }
}

async fn delivery_loop(
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let outgoing = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };
        deliver(transport.as_ref(), &outgoing, retry_delay).await;
    }
    debug!(abandoned = rx.len(), "dispatcher stopped");
}

async fn deliver(transport: &dyn Transport, outgoing: &Outgoing, retry_delay: Duration) {
    let mut delay = retry_delay;
    for attempt in 1..=MAX_ATTEMPTS {
        match transport.send_message(outgoing.chat_id, &outgoing.text).await {
            Ok(()) => return,
            Err(e) => {
                warn!(chat_id = outgoing.chat_id, attempt, error = ?e, "failed to send message");
            }
        }
        if attempt < MAX_ATTEMPTS {
            sleep(delay).await;
            delay *= 2;
        }
    }
    warn!(
        chat_id = outgoing.chat_id,
        text = %outgoing.text,
        "unable to deliver message, dropping"
    );
}

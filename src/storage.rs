pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::alert::AlertSet;
use crate::error::StorageError;
use crate::model::ChatId;

/// One persisted subscriber: the chat id and its full alert set.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberRecord {
    pub chat_id: ChatId,
    pub alerts: AlertSet,
}

/// Durable subscriber store.
///
/// Uses `BoxFuture` to keep the trait object-safe (`dyn SubscriberStore`).
pub trait SubscriberStore: Send + Sync {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<SubscriberRecord>, Report<StorageError>>>;

    /// Insert a record unless one already exists for its chat id.
    fn create(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Insert or overwrite the full record.
    fn save(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}

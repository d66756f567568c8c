use std::collections::HashMap;
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::alert::AlertSet;
use crate::alert::crossing::crossed;
use crate::dispatch::NotificationDispatcher;
use crate::error::{AlertError, StorageError};
use crate::model::{ChatId, Currency, PriceQuote};
use crate::storage::{SubscriberRecord, SubscriberStore};
use crate::watcher::{PriceCell, PriceObserver};

struct SubscriberState {
    alerts: AlertSet,
    /// Quote the alerts were last evaluated against. Memory only.
    last_observed: PriceQuote,
}

pub struct Subscriber {
    chat_id: ChatId,
    // Held across mutate + persist + commit, which serializes commands per chat.
    state: Mutex<SubscriberState>,
}

impl Subscriber {
    fn new(chat_id: ChatId, alerts: AlertSet, last_observed: PriceQuote) -> Self {
        Self {
            chat_id,
            state: Mutex::new(SubscriberState {
                alerts,
                last_observed,
            }),
        }
    }

    pub async fn alerts(&self) -> AlertSet {
        self.state.lock().await.alerts.clone()
    }
}

/// Every known subscriber, backed by the durable store.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<ChatId, Arc<Subscriber>>>,
    store: Arc<dyn SubscriberStore>,
    price: PriceCell,
    dispatcher: NotificationDispatcher,
}

impl SubscriberRegistry {
    /// Restore every persisted subscriber. Their last-observed price starts at the current price.
    pub async fn load(
        store: Arc<dyn SubscriberStore>,
        price: PriceCell,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self, Report<StorageError>> {
        let records = store
            .load_all()
            .await
            .attach("failed to load subscribers")?;
        let current = *price.read().await;

        let subscribers: HashMap<_, _> = records
            .into_iter()
            .map(|r| (r.chat_id, Arc::new(Subscriber::new(r.chat_id, r.alerts, current))))
            .collect();

        info!(subscribers = subscribers.len(), "subscribers loaded");

        Ok(Self {
            subscribers: RwLock::new(subscribers),
            store,
            price,
            dispatcher,
        })
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Look up a subscriber, creating and persisting an empty one on first contact.
    pub async fn get_or_create(&self, chat_id: ChatId) -> Result<Arc<Subscriber>, Report<AlertError>> {
        if let Some(subscriber) = self.subscribers.read().await.get(&chat_id) {
            return Ok(Arc::clone(subscriber));
        }

        let mut subscribers = self.subscribers.write().await;
        // Another caller may have created it between the two locks.
        if let Some(subscriber) = subscribers.get(&chat_id) {
            return Ok(Arc::clone(subscriber));
        }

        let record = SubscriberRecord {
            chat_id,
            alerts: AlertSet::default(),
        };
        self.store
            .create(&record)
            .await
            .change_context(AlertError::Persistence)
            .attach_with(|| format!("creating subscriber {chat_id}"))?;

        let current = *self.price.read().await;
        let subscriber = Arc::new(Subscriber::new(chat_id, record.alerts, current));
        subscribers.insert(chat_id, Arc::clone(&subscriber));
        info!(chat_id, "subscriber created");
        Ok(subscriber)
    }

    pub async fn alerts(&self, chat_id: ChatId) -> Result<AlertSet, Report<AlertError>> {
        Ok(self.get_or_create(chat_id).await?.alerts().await)
    }

    pub async fn add_alert(
        &self,
        chat_id: ChatId,
        currency: Currency,
        price: f64,
    ) -> Result<AlertSet, Report<AlertError>> {
        self.mutate(chat_id, |alerts| alerts.add(currency, price).map(|_| ()))
            .await
    }

    /// Remove by list index. Negative indices are out of range.
    pub async fn remove_alert(
        &self,
        chat_id: ChatId,
        currency: Currency,
        index: i64,
    ) -> Result<AlertSet, Report<AlertError>> {
        self.mutate(chat_id, |alerts| {
            let index = usize::try_from(index)
                .map_err(|_| Report::new(AlertError::IndexOutOfRange { index }))?;
            alerts.remove_at(currency, index).map(|_| ())
        })
        .await
    }

    pub async fn clear_alerts(&self, chat_id: ChatId) -> Result<AlertSet, Report<AlertError>> {
        self.mutate(chat_id, |alerts| {
            alerts.clear();
            Ok(())
        })
        .await
    }

    /// Apply `f` to a copy of the subscriber's alerts, persist the copy, then commit it.
    /// Memory is left untouched when either step fails.
    async fn mutate<F>(&self, chat_id: ChatId, f: F) -> Result<AlertSet, Report<AlertError>>
    where
        F: FnOnce(&mut AlertSet) -> Result<(), Report<AlertError>>,
    {
        let subscriber = self.get_or_create(chat_id).await?;
        let mut state = subscriber.state.lock().await;

        let mut updated = state.alerts.clone();
        f(&mut updated)?;

        let record = SubscriberRecord {
            chat_id,
            alerts: updated,
        };
        self.store
            .save(&record)
            .await
            .change_context(AlertError::Persistence)
            .attach_with(|| format!("saving alerts for {chat_id}"))?;

        state.alerts = record.alerts.clone();
        debug!(chat_id, thresholds = state.alerts.len(), "alerts saved");
        Ok(record.alerts)
    }

    async fn evaluate(&self, new: PriceQuote) {
        let subscribers = self.subscribers.read().await;
        let mut notified = 0usize;

        for subscriber in subscribers.values() {
            let mut state = subscriber.state.lock().await;
            for crossing in crossed(&state.last_observed, &new, &state.alerts) {
                self.dispatcher.send(subscriber.chat_id, crossing.message());
                notified += 1;
            }
            state.last_observed = new;
        }

        if notified > 0 {
            info!(notifications = notified, "threshold crossings dispatched");
        }
    }
}

impl PriceObserver for SubscriberRegistry {
    fn on_price_changed(&self, _old: PriceQuote, new: PriceQuote) -> BoxFuture<'_, ()> {
        // Each subscriber is evaluated from its own last-observed quote, which equals
        // `old` unless it was created after the previous tick.
        Box::pin(self.evaluate(new))
    }
}

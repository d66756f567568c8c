//! In-process fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, StorageError, TransportError};
use crate::model::{ChatId, InboundMessage, PriceQuote};
use crate::price::PriceSource;
use crate::storage::{SubscriberRecord, SubscriberStore};
use crate::transport::Transport;

/// Quote where every currency moves with BTC.
pub fn quote(btc: f64) -> PriceQuote {
    PriceQuote {
        btc,
        usd: btc * 10.0,
        eur: btc * 9.0,
        cny: btc * 70.0,
    }
}

/// Replays a script of fetch outcomes (`None` = failure), repeating the last entry.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Option<PriceQuote>>>,
    last: Mutex<Option<PriceQuote>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Option<PriceQuote>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }
}

impl PriceSource for ScriptedSource {
    fn fetch(&self) -> BoxFuture<'_, Result<PriceQuote, Report<FetchError>>> {
        Box::pin(async move {
            let next = {
                let mut script = self.script.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                match script.pop_front() {
                    Some(entry) => {
                        *last = entry;
                        entry
                    }
                    None => *last,
                }
            };
            next.ok_or_else(|| Report::new(FetchError::InvalidQuote))
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ChatId, SubscriberRecord>>,
    creates: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_records(records: Vec<SubscriberRecord>) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .unwrap()
            .extend(records.into_iter().map(|r| (r.chat_id, r)));
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `create` calls that inserted a new record.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn record(&self, chat_id: ChatId) -> Option<SubscriberRecord> {
        self.records.lock().unwrap().get(&chat_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl SubscriberStore for MemoryStore {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<SubscriberRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
            records.sort_by_key(|r| r.chat_id);
            Ok(records)
        })
    }

    fn create(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let record = record.clone();
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Report::new(StorageError::Insert));
            }
            // Yield so concurrent callers interleave.
            tokio::task::yield_now().await;
            let mut records = self.records.lock().unwrap();
            if !records.contains_key(&record.chat_id) {
                records.insert(record.chat_id, record);
                self.creates.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    fn save(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let record = record.clone();
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Report::new(StorageError::Insert));
            }
            tokio::task::yield_now().await;
            self.records.lock().unwrap().insert(record.chat_id, record);
            Ok(())
        })
    }
}

/// Records delivered messages; the first `failures` send attempts fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChatId, String)>>,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    inbound: Mutex<Vec<InboundMessage>>,
}

impl RecordingTransport {
    pub fn failing(failures: usize) -> Self {
        let transport = Self::default();
        transport.failures.store(failures, Ordering::SeqCst);
        transport
    }

    pub fn with_inbound(messages: Vec<InboundMessage>) -> Self {
        let transport = Self::default();
        *transport.inbound.lock().unwrap() = messages;
        transport
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` messages were delivered.
    pub async fn wait_for(&self, n: usize) -> Vec<(ChatId, String)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let sent = self.sent();
                if sent.len() >= n {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for delivered messages")
    }
}

impl Transport for RecordingTransport {
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        let text = text.to_owned();
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(Report::new(TransportError::Request {
                    method: "sendMessage".into(),
                }));
            }
            self.sent.lock().unwrap().push((chat_id, text));
            Ok(())
        })
    }

    fn receive(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        Box::pin(async move {
            let messages = std::mem::take(&mut *self.inbound.lock().unwrap());
            for message in messages {
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
            cancel.cancelled().await;
            Ok(())
        })
    }
}

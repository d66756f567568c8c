use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::model::PriceQuote;
use crate::price::PriceSource;

pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(10);

/// The authoritative current price. Only the watcher takes the write lock.
pub type PriceCell = Arc<RwLock<PriceQuote>>;

/// Receives every successful price update.
pub trait PriceObserver: Send + Sync {
    fn on_price_changed(&self, old: PriceQuote, new: PriceQuote) -> BoxFuture<'_, ()>;
}

/// Convert a configured interval in seconds, replacing non-positive values with the default.
pub fn fetch_interval(secs: i64) -> Duration {
    if secs <= 0 {
        warn!(
            configured = secs,
            default_secs = DEFAULT_FETCH_INTERVAL.as_secs(),
            "non-positive fetch interval, using default"
        );
        return DEFAULT_FETCH_INTERVAL;
    }
    Duration::from_secs(secs.unsigned_abs())
}

/// A watcher that holds an initial price but is not ticking yet.
///
/// Observers are registered here; [`PriceWatcher::start`] turns it into a running
/// [`WatcherHandle`].
pub struct PriceWatcher {
    source: Arc<dyn PriceSource>,
    current: PriceCell,
    observers: Vec<Arc<dyn PriceObserver>>,
    interval: Duration,
}

impl PriceWatcher {
    /// Fetch the initial price. The service cannot run without one, so errors are returned.
    pub async fn prime(
        source: Arc<dyn PriceSource>,
        interval: Duration,
    ) -> Result<Self, Report<FetchError>> {
        let quote = source
            .fetch()
            .await
            .attach("initial price fetch failed")?;

        info!(
            btc = quote.btc,
            usd = quote.usd,
            eur = quote.eur,
            cny = quote.cny,
            interval_secs = interval.as_secs_f64(),
            "initial xmr price fetched"
        );

        Ok(Self {
            source,
            current: Arc::new(RwLock::new(quote)),
            observers: Vec::new(),
            interval,
        })
    }

    pub fn price_cell(&self) -> PriceCell {
        Arc::clone(&self.current)
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PriceObserver>) {
        self.observers.push(observer);
    }

    /// Spawn the polling task. The first fetch happens one interval from now.
    pub fn start(self) -> WatcherHandle {
        let cancel = CancellationToken::new();
        let current = Arc::clone(&self.current);
        let task = tokio::spawn(poll_loop(self, cancel.clone()));
        WatcherHandle {
            cancel,
            current,
            task,
        }
    }
}

/// A running watcher.
pub struct WatcherHandle {
    cancel: CancellationToken,
    current: PriceCell,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub async fn current(&self) -> PriceQuote {
        *self.current.read().await
    }

    /// Stop ticking. Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the polling task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "price watcher task ended abnormally");
        }
    }
}

async fn poll_loop(watcher: PriceWatcher, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + watcher.interval, watcher.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = watcher.source.fetch().await;
        if cancel.is_cancelled() {
            debug!("watcher stopped during fetch, discarding result");
            break;
        }

        let new = match result {
            Ok(quote) => quote,
            Err(e) => {
                warn!(error = ?e, "price fetch failed, skipping tick");
                continue;
            }
        };

        let old = {
            let mut current = watcher.current.write().await;
            std::mem::replace(&mut *current, new)
        };

        debug!(old_btc = old.btc, new_btc = new.btc, "xmr price updated");

        for observer in &watcher.observers {
            observer.on_price_changed(old, new).await;
        }
    }

    info!("price watcher stopped");
}

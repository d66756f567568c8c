pub mod cryptocompare;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::FetchError;
use crate::model::PriceQuote;

/// Remote source of XMR quotes.
///
/// A single request per call; retry policy belongs to the caller.
pub trait PriceSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<PriceQuote, Report<FetchError>>>;
}

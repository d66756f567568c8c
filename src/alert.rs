pub mod crossing;

use error_stack::Report;

use crate::error::AlertError;
use crate::model::Currency;

/// A subscriber's thresholds, one ascending list per currency.
///
/// Indices handed out by [`AlertSet::entries`] are positions in the sorted list, so
/// they are only stable until the next [`AlertSet::add`] on the same currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertSet {
    btc: Vec<f64>,
    usd: Vec<f64>,
    eur: Vec<f64>,
    cny: Vec<f64>,
}

impl AlertSet {
    /// Rebuild a set from stored lists. Lists are re-sorted and non-finite values dropped.
    pub fn from_lists(btc: Vec<f64>, usd: Vec<f64>, eur: Vec<f64>, cny: Vec<f64>) -> Self {
        let normalize = |mut list: Vec<f64>| {
            list.retain(|p| p.is_finite());
            list.sort_by(f64::total_cmp);
            list
        };
        Self {
            btc: normalize(btc),
            usd: normalize(usd),
            eur: normalize(eur),
            cny: normalize(cny),
        }
    }

    pub fn thresholds(&self, currency: Currency) -> &[f64] {
        match currency {
            Currency::Btc => &self.btc,
            Currency::Usd => &self.usd,
            Currency::Eur => &self.eur,
            Currency::Cny => &self.cny,
        }
    }

    fn thresholds_mut(&mut self, currency: Currency) -> &mut Vec<f64> {
        match currency {
            Currency::Btc => &mut self.btc,
            Currency::Usd => &mut self.usd,
            Currency::Eur => &mut self.eur,
            Currency::Cny => &mut self.cny,
        }
    }

    /// Insert `price` at its sorted position (after equal values) and return that index.
    pub fn add(&mut self, currency: Currency, price: f64) -> Result<usize, Report<AlertError>> {
        if !price.is_finite() {
            return Err(Report::new(AlertError::InvalidPrice)
                .attach(format!("currency: {currency}, price: {price}")));
        }
        let list = self.thresholds_mut(currency);
        let index = list.partition_point(|&p| p <= price);
        list.insert(index, price);
        Ok(index)
    }

    /// Remove the threshold at `index`, returning it.
    pub fn remove_at(&mut self, currency: Currency, index: usize) -> Result<f64, Report<AlertError>> {
        let list = self.thresholds_mut(currency);
        if index >= list.len() {
            return Err(Report::new(AlertError::IndexOutOfRange {
                index: i64::try_from(index).unwrap_or(i64::MAX),
            })
            .attach(format!("currency: {currency}, len: {}", list.len())));
        }
        Ok(list.remove(index))
    }

    pub fn clear(&mut self) {
        for currency in Currency::ALL {
            self.thresholds_mut(currency).clear();
        }
    }

    /// `(index, price)` pairs in ascending order.
    pub fn entries(&self, currency: Currency) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.thresholds(currency).iter().copied().enumerate()
    }

    pub fn len(&self) -> usize {
        Currency::ALL.iter().map(|&c| self.thresholds(c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the `list` reply: a heading per currency followed by `  <index>: <price>` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for currency in Currency::ALL {
            out.push_str(currency.ticker());
            out.push_str(":\n");
            for (index, price) in self.entries(currency) {
                out.push_str(&format!("  {index}: {price}\n"));
            }
        }
        out
    }
}

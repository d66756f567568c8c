use std::fmt;

use crate::alert::AlertSet;
use crate::model::{Currency, PriceQuote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    RisenAbove,
    FallenBelow,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RisenAbove => write!(f, "risen above"),
            Self::FallenBelow => write!(f, "fallen below"),
        }
    }
}

/// A threshold that the price moved across between two quotes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub currency: Currency,
    pub threshold: f64,
    pub direction: Direction,
}

impl Crossing {
    pub fn message(&self) -> String {
        format!(
            "Price alert: XMR price has {} {} {}",
            self.direction, self.threshold, self.currency
        )
    }
}

/// Find every threshold in `alerts` crossed when the price moved from `old` to `new`.
///
/// The low/high ends of the move are chosen by the BTC field alone and then applied to
/// every currency. A threshold `t` is crossed when `low <= t < high` in its currency, so a
/// currency moving against BTC yields an empty range and no crossing.
pub fn crossed(old: &PriceQuote, new: &PriceQuote, alerts: &AlertSet) -> Vec<Crossing> {
    let (low, high) = if old.btc < new.btc {
        (old, new)
    } else {
        (new, old)
    };

    let mut crossings = Vec::new();
    for currency in Currency::ALL {
        let (lo, hi) = (low.get(currency), high.get(currency));
        let direction = if new.get(currency) > old.get(currency) {
            Direction::RisenAbove
        } else {
            Direction::FallenBelow
        };
        crossings.extend(
            alerts
                .thresholds(currency)
                .iter()
                .filter(|&&t| lo <= t && t < hi)
                .map(|&threshold| Crossing {
                    currency,
                    threshold,
                    direction,
                }),
        );
    }
    crossings
}

use std::fmt;

/// Telegram chat identifier; the subscriber identity.
pub type ChatId = i64;

/// Quote currency supported by the price feed.
///
/// String representations match the command syntax (e.g. `"btc"`, `"usd"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Btc,
    Usd,
    Eur,
    Cny,
}

impl Currency {
    /// Every currency in display order. BTC is the reference currency.
    pub const ALL: [Currency; 4] = [Self::Btc, Self::Usd, Self::Eur, Self::Cny];

    /// Parse a command argument, ignoring ASCII case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "btc" => Some(Self::Btc),
            "usd" => Some(Self::Usd),
            "eur" => Some(Self::Eur),
            "cny" => Some(Self::Cny),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Btc => "btc",
            Self::Usd => "usd",
            Self::Eur => "eur",
            Self::Cny => "cny",
        }
    }

    /// Upper-case ticker used in headings and by the price API.
    pub fn ticker(self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Cny => "CNY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Valuation of one XMR in every supported currency at a single instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub btc: f64,
    pub usd: f64,
    pub eur: f64,
    pub cny: f64,
}

impl PriceQuote {
    pub fn get(&self, currency: Currency) -> f64 {
        match currency {
            Currency::Btc => self.btc,
            Currency::Usd => self.usd,
            Currency::Eur => self.eur,
            Currency::Cny => self.cny,
        }
    }

    /// A quote is usable when every field is finite and non-negative.
    pub fn is_valid(&self) -> bool {
        Currency::ALL
            .iter()
            .all(|&c| self.get(c).is_finite() && self.get(c) >= 0.0)
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current XMR Price")?;
        for currency in Currency::ALL {
            writeln!(f, "  {}: {}", currency.ticker(), self.get(currency))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub text: String,
}

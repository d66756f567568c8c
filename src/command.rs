use std::sync::Arc;

use error_stack::Report;
use tracing::{debug, warn};

use crate::error::AlertError;
use crate::model::{ChatId, Currency};
use crate::registry::SubscriberRegistry;
use crate::watcher::PriceCell;

pub const ALERT_COMMAND: &str = "/xmralert";
pub const PRICE_COMMAND: &str = "/xmrprice";

pub const ALERT_HELP: &str = "\
Usage: /xmrAlert <subcommand>

Subcommands:
  help
    Show this message.
  list
    List your alerts, one per line as `<index>: <price>`.
    Use the index to remove an alert.
  add <currency> <price>
    Add an alert. currency is one of btc, usd, eur or cny;
    price is a number.
  remove <currency> <index>
    Remove the alert at index.
  removeAll
    Remove all of your alerts.
";

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List,
    Add { currency: Currency, price: f64 },
    Remove { currency: Currency, index: i64 },
    RemoveAll,
    Price,
}

/// Parse a chat message.
///
/// Returns `None` when the message is not addressed to this bot. Unknown `/xmrAlert`
/// subcommands fall back to help.
pub fn parse(text: &str) -> Option<Result<Command, AlertError>> {
    let mut words = text.split_whitespace();
    let head = words.next()?;
    // Group chats address commands as `/cmd@botname`.
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    match name.as_str() {
        PRICE_COMMAND => Some(Ok(Command::Price)),
        ALERT_COMMAND => Some(parse_alert(&args)),
        _ => None,
    }
}

fn parse_alert(args: &[&str]) -> Result<Command, AlertError> {
    let Some((sub, params)) = args.split_first() else {
        return Ok(Command::Help);
    };

    match *sub {
        "list" => {
            expect_arity(params, 0)?;
            Ok(Command::List)
        }
        "add" => {
            expect_arity(params, 2)?;
            let currency = parse_currency(params[0])?;
            let price: f64 = params[1]
                .parse()
                .map_err(|_| AlertError::InvalidParameters)?;
            if !price.is_finite() {
                return Err(AlertError::InvalidPrice);
            }
            Ok(Command::Add { currency, price })
        }
        "remove" => {
            expect_arity(params, 2)?;
            let currency = parse_currency(params[0])?;
            let index: i64 = params[1]
                .parse()
                .map_err(|_| AlertError::InvalidParameters)?;
            Ok(Command::Remove { currency, index })
        }
        "removeAll" => {
            expect_arity(params, 0)?;
            Ok(Command::RemoveAll)
        }
        _ => Ok(Command::Help),
    }
}

fn expect_arity(params: &[&str], n: usize) -> Result<(), AlertError> {
    if params.len() == n {
        Ok(())
    } else {
        Err(AlertError::InvalidParameters)
    }
}

fn parse_currency(s: &str) -> Result<Currency, AlertError> {
    Currency::parse(s).ok_or(AlertError::InvalidParameters)
}

/// Turns chat messages into registry calls and renders the reply text.
#[derive(Clone)]
pub struct CommandHandler {
    registry: Arc<SubscriberRegistry>,
    price: PriceCell,
}

impl CommandHandler {
    pub fn new(registry: Arc<SubscriberRegistry>, price: PriceCell) -> Self {
        Self { registry, price }
    }

    /// Handle one message. `None` means the message should be ignored.
    pub async fn handle(&self, chat_id: ChatId, text: &str) -> Option<String> {
        let command = parse(text)?;
        debug!(chat_id, ?command, "command received");

        let reply = match command {
            Ok(command) => self.execute(chat_id, command).await,
            Err(e) => Err(Report::new(e)),
        };

        Some(reply.unwrap_or_else(|report| {
            warn!(chat_id, error = ?report, "command failed");
            format!("Error: {}\n\n{ALERT_HELP}", report.current_context())
        }))
    }

    async fn execute(&self, chat_id: ChatId, command: Command) -> Result<String, Report<AlertError>> {
        match command {
            Command::Help => Ok(ALERT_HELP.to_owned()),
            Command::Price => Ok(self.price.read().await.to_string()),
            Command::List => Ok(self.registry.alerts(chat_id).await?.render()),
            Command::Add { currency, price } => {
                self.registry.add_alert(chat_id, currency, price).await?;
                Ok(format!("Alert added: ({currency}) {price}"))
            }
            Command::Remove { currency, index } => {
                self.registry.remove_alert(chat_id, currency, index).await?;
                Ok("Alert removed".to_owned())
            }
            Command::RemoveAll => {
                self.registry.clear_alerts(chat_id).await?;
                Ok("All alert removed".to_owned())
            }
        }
    }
}

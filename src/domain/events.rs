//! Domain Events
//!
//! The immutable facts recorded in the event log and carried by the transport.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AccountId, Amount};

/// Discriminant of an [`AccountEvent`], useful for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    AccountCreated,
    MoneyDeposited,
    MoneyWithdrawn,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AccountCreated => "AccountCreated",
            EventType::MoneyDeposited => "MoneyDeposited",
            EventType::MoneyWithdrawn => "MoneyWithdrawn",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account-related events.
///
/// Serialized with an internal `type` tag, one JSON object per event:
/// `{"type":"MoneyDeposited","event_id":"…","account_id":"a","amount":"100","timestamp":"…"}`.
/// `amount` is a plain decimal here, not an [`Amount`]: replay must accept
/// whatever history contains.
///
/// Records written without an `event_id` (and with `time` instead of
/// `timestamp`) still decode; they get an id derived from their content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", from = "EventRecord")]
pub enum AccountEvent {
    /// Account was opened (balance starts at zero)
    AccountCreated {
        event_id: Uuid,
        account_id: AccountId,
        timestamp: DateTime<Utc>,
    },

    /// Money was deposited (balance increased)
    MoneyDeposited {
        event_id: Uuid,
        account_id: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Money was withdrawn (balance decreased)
    MoneyWithdrawn {
        event_id: Uuid,
        account_id: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },
}

/// Namespace for ids derived from records that carry none
const DERIVED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5d2c_6a9e_41f7_4b0e_9c3a_7e15_d8b4_2f61);

/// Wire shape accepted on input
#[derive(Deserialize)]
#[serde(tag = "type")]
enum EventRecord {
    AccountCreated {
        #[serde(default)]
        event_id: Option<Uuid>,
        account_id: AccountId,
        #[serde(alias = "time")]
        timestamp: DateTime<Utc>,
    },
    MoneyDeposited {
        #[serde(default)]
        event_id: Option<Uuid>,
        account_id: AccountId,
        amount: Decimal,
        #[serde(alias = "time")]
        timestamp: DateTime<Utc>,
    },
    MoneyWithdrawn {
        #[serde(default)]
        event_id: Option<Uuid>,
        account_id: AccountId,
        amount: Decimal,
        #[serde(alias = "time")]
        timestamp: DateTime<Utc>,
    },
}

/// Same content, same id: a redelivered legacy record dedups like any other
fn derived_event_id(
    event_type: EventType,
    account_id: &AccountId,
    amount: Decimal,
    timestamp: DateTime<Utc>,
) -> Uuid {
    let name = format!(
        "{event_type}|{account_id}|{}|{}",
        amount.normalize(),
        timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    );
    Uuid::new_v5(&DERIVED_ID_NAMESPACE, name.as_bytes())
}

impl From<EventRecord> for AccountEvent {
    fn from(record: EventRecord) -> Self {
        match record {
            EventRecord::AccountCreated {
                event_id,
                account_id,
                timestamp,
            } => AccountEvent::AccountCreated {
                event_id: event_id.unwrap_or_else(|| {
                    derived_event_id(EventType::AccountCreated, &account_id, Decimal::ZERO, timestamp)
                }),
                account_id,
                timestamp,
            },
            EventRecord::MoneyDeposited {
                event_id,
                account_id,
                amount,
                timestamp,
            } => AccountEvent::MoneyDeposited {
                event_id: event_id.unwrap_or_else(|| {
                    derived_event_id(EventType::MoneyDeposited, &account_id, amount, timestamp)
                }),
                account_id,
                amount,
                timestamp,
            },
            EventRecord::MoneyWithdrawn {
                event_id,
                account_id,
                amount,
                timestamp,
            } => AccountEvent::MoneyWithdrawn {
                event_id: event_id.unwrap_or_else(|| {
                    derived_event_id(EventType::MoneyWithdrawn, &account_id, amount, timestamp)
                }),
                account_id,
                amount,
                timestamp,
            },
        }
    }
}

impl AccountEvent {
    pub fn created(account_id: AccountId, timestamp: DateTime<Utc>) -> Self {
        AccountEvent::AccountCreated {
            event_id: Uuid::new_v4(),
            account_id,
            timestamp,
        }
    }

    pub fn deposited(account_id: AccountId, amount: Amount, timestamp: DateTime<Utc>) -> Self {
        AccountEvent::MoneyDeposited {
            event_id: Uuid::new_v4(),
            account_id,
            amount: amount.value(),
            timestamp,
        }
    }

    pub fn withdrawn(account_id: AccountId, amount: Amount, timestamp: DateTime<Utc>) -> Self {
        AccountEvent::MoneyWithdrawn {
            event_id: Uuid::new_v4(),
            account_id,
            amount: amount.value(),
            timestamp,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            AccountEvent::AccountCreated { .. } => EventType::AccountCreated,
            AccountEvent::MoneyDeposited { .. } => EventType::MoneyDeposited,
            AccountEvent::MoneyWithdrawn { .. } => EventType::MoneyWithdrawn,
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            AccountEvent::AccountCreated { event_id, .. }
            | AccountEvent::MoneyDeposited { event_id, .. }
            | AccountEvent::MoneyWithdrawn { event_id, .. } => *event_id,
        }
    }

    /// Get the account ID this event relates to
    pub fn account_id(&self) -> &AccountId {
        match self {
            AccountEvent::AccountCreated { account_id, .. }
            | AccountEvent::MoneyDeposited { account_id, .. }
            | AccountEvent::MoneyWithdrawn { account_id, .. } => account_id,
        }
    }

    /// Amount moved by the event; zero for `AccountCreated`
    pub fn amount(&self) -> Decimal {
        match self {
            AccountEvent::AccountCreated { .. } => Decimal::ZERO,
            AccountEvent::MoneyDeposited { amount, .. }
            | AccountEvent::MoneyWithdrawn { amount, .. } => *amount,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountCreated { timestamp, .. }
            | AccountEvent::MoneyDeposited { timestamp, .. }
            | AccountEvent::MoneyWithdrawn { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    #[test]
    fn test_account_event_serialization() {
        let event = AccountEvent::deposited(id("a"), Amount::new(dec!(100)).unwrap(), Utc::now());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"MoneyDeposited""#));
        assert!(json.contains(r#""account_id":"a""#));

        let deserialized: AccountEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_legacy_time_field_and_numeric_amount() {
        let json = r#"{"type":"MoneyWithdrawn","event_id":"6f1c3f4e-3b1b-4c57-9a51-2a4c7f0a9e11","account_id":"x","amount":20,"time":"2024-05-01T10:00:00Z"}"#;
        let event: AccountEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.event_type(), EventType::MoneyWithdrawn);
        assert_eq!(event.amount(), dec!(20));
        assert_eq!(event.timestamp().to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_record_without_event_id_decodes() {
        let json = r#"{"type":"AccountCreated","account_id":"x","time":"2024-05-01T10:00:00Z"}"#;
        let first: AccountEvent = serde_json::from_str(json).unwrap();
        let again: AccountEvent = serde_json::from_str(json).unwrap();

        assert_eq!(first.event_type(), EventType::AccountCreated);
        assert_eq!(first.account_id().as_str(), "x");
        assert_eq!(first.event_id(), again.event_id());

        let deposit = r#"{"type":"MoneyDeposited","account_id":"x","amount":"5","time":"2024-05-01T10:00:00Z"}"#;
        let deposit: AccountEvent = serde_json::from_str(deposit).unwrap();
        assert_ne!(deposit.event_id(), first.event_id());

        // the derived id is written out and kept from then on
        let rewritten: AccountEvent =
            serde_json::from_str(&serde_json::to_string(&deposit).unwrap()).unwrap();
        assert_eq!(rewritten, deposit);
    }

    #[test]
    fn test_created_has_zero_amount() {
        let event = AccountEvent::created(id("a"), Utc::now());
        assert_eq!(event.amount(), Decimal::ZERO);
        assert_eq!(event.event_type().to_string(), "AccountCreated");
        assert_eq!(event.account_id().as_str(), "a");
    }

    #[test]
    fn test_deposit_requires_amount() {
        let json = r#"{"type":"MoneyDeposited","event_id":"6f1c3f4e-3b1b-4c57-9a51-2a4c7f0a9e11","account_id":"x","timestamp":"2024-05-01T10:00:00Z"}"#;
        assert!(serde_json::from_str::<AccountEvent>(json).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type":"AccountClosed","event_id":"6f1c3f4e-3b1b-4c57-9a51-2a4c7f0a9e11","account_id":"x","timestamp":"2024-05-01T10:00:00Z"}"#;
        assert!(serde_json::from_str::<AccountEvent>(json).is_err());
    }
}

//! Protocol message types.
//!
//! These types represent the messages exchanged between the initiator, the
//! receiving party and the broker during an exchange negotiation.

use std::fmt;

use fxbroker_common::{CurrencyCode, ExchangeError, Party, Result, SettlementRecordId};
use serde::{Deserialize, Serialize};

/// Message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    CurrencyRequest,
    CurrencyReply,
    ExchangeInfo,
    ExchangeResult,
}

impl MessageType {
    /// Stable name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::CurrencyRequest => "CurrencyRequest",
            MessageType::CurrencyReply => "CurrencyReply",
            MessageType::ExchangeInfo => "ExchangeInfo",
            MessageType::ExchangeResult => "ExchangeResult",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Asks the receiving party which currencies it wants to be paid in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRequest;

/// Currencies the receiving party accepts, most preferred first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyReply {
    pub currencies: Vec<CurrencyCode>,
}

impl CurrencyReply {
    pub fn new(currencies: Vec<CurrencyCode>) -> Self {
        Self { currencies }
    }

    /// The preferred currency, if any.
    pub fn preferred(&self) -> Option<&CurrencyCode> {
        self.currencies.first()
    }
}

/// Instruction to the broker once the fee has been paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    /// Settlement record of the payment made to the broker.
    pub fee_payment_id: SettlementRecordId,
    /// Party to pay out to.
    pub receiver: Party,
    /// Quantity the payout is computed from.
    pub amount: u64,
    /// Currency to pay out in.
    pub currency: CurrencyCode,
}

/// The broker's payout record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub record_id: SettlementRecordId,
}

/// Any protocol message, as moved by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Payload {
    CurrencyRequest(CurrencyRequest),
    CurrencyReply(CurrencyReply),
    ExchangeInfo(ExchangeInfo),
    ExchangeResult(ExchangeResult),
}

impl Payload {
    /// The type of the carried message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::CurrencyRequest(_) => MessageType::CurrencyRequest,
            Payload::CurrencyReply(_) => MessageType::CurrencyReply,
            Payload::ExchangeInfo(_) => MessageType::ExchangeInfo,
            Payload::ExchangeResult(_) => MessageType::ExchangeResult,
        }
    }
}

/// A concrete message type that can travel inside a [`Payload`].
pub trait ProtocolMessage: Into<Payload> + Send + Sized + 'static {
    const MESSAGE_TYPE: MessageType;

    /// Extract the message, failing with `UnexpectedMessage` on a type
    /// mismatch.
    fn from_payload(payload: Payload) -> Result<Self>;
}

macro_rules! protocol_message {
    ($message:ident) => {
        impl From<$message> for Payload {
            fn from(message: $message) -> Self {
                Payload::$message(message)
            }
        }

        impl ProtocolMessage for $message {
            const MESSAGE_TYPE: MessageType = MessageType::$message;

            fn from_payload(payload: Payload) -> Result<Self> {
                match payload {
                    Payload::$message(message) => Ok(message),
                    other => Err(ExchangeError::UnexpectedMessage {
                        expected: Self::MESSAGE_TYPE.name(),
                        actual: other.message_type().name(),
                    }),
                }
            }
        }
    };
}

protocol_message!(CurrencyRequest);
protocol_message!(CurrencyReply);
protocol_message!(ExchangeInfo);
protocol_message!(ExchangeResult);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_extraction() {
        let payload: Payload = CurrencyReply::new(vec![CurrencyCode::gbp()]).into();
        assert_eq!(payload.message_type(), MessageType::CurrencyReply);

        let reply = CurrencyReply::from_payload(payload).unwrap();
        assert_eq!(reply.preferred(), Some(&CurrencyCode::gbp()));
    }

    #[test]
    fn test_unexpected_message() {
        let payload: Payload = CurrencyRequest.into();
        let err = ExchangeInfo::from_payload(payload).unwrap_err();

        assert_eq!(
            err,
            ExchangeError::UnexpectedMessage {
                expected: "ExchangeInfo",
                actual: "CurrencyRequest",
            }
        );
    }

    #[test]
    fn test_exchange_info_wire_shape() {
        let info = ExchangeInfo {
            fee_payment_id: SettlementRecordId::new(),
            receiver: Party::named("NodeB"),
            amount: 100,
            currency: CurrencyCode::gbp(),
        };
        let json = serde_json::to_value(Payload::from(info.clone())).unwrap();

        assert_eq!(json["type"], "ExchangeInfo");
        assert_eq!(json["body"]["amount"], 100);
        assert_eq!(json["body"]["currency"], "GBP");

        let decoded: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, Payload::ExchangeInfo(info));
    }

    #[test]
    fn test_empty_reply_has_no_preference() {
        assert_eq!(CurrencyReply::default().preferred(), None);
    }
}

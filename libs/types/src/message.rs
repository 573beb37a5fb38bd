//! Feed message model
//!
//! Every frame on the wire is one JSON object whose integer `Type` field
//! selects the variant. Variants this workspace interprets are decoded into
//! typed structs; fields those structs do not name are carried in an
//! `extra` map, and unknown `Type` codes are kept whole in
//! [`Message::Unknown`]. Re-encoding a decoded message reproduces the same
//! field set, so a broker can republish what it ingests.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::DecodeError;
use crate::history::{HistoricalPriceDataRequest, HistoricalPriceRecord};
use crate::trade::Trade;

/// Protocol version advertised in a logon request.
pub const PROTOCOL_VERSION: u32 = 8;

/// Request action code for a market-data subscription.
pub const REQUEST_ACTION_SUBSCRIBE: u8 = 1;

const TYPE_FIELD: &str = "Type";

/// Numeric `Type` discriminator of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u16);

impl MessageType {
    pub const LOGON_REQUEST: MessageType = MessageType(1);
    pub const LOGON_RESPONSE: MessageType = MessageType(2);
    pub const HEARTBEAT: MessageType = MessageType(3);
    pub const MARKET_DATA_REQUEST: MessageType = MessageType(101);
    pub const MARKET_DATA_TRADE: MessageType = MessageType(112);
    pub const HISTORICAL_PRICE_DATA_REQUEST: MessageType = MessageType(800);
    pub const HISTORICAL_PRICE_RECORD: MessageType = MessageType(803);

    /// Human-readable label for logging.
    pub fn label(&self) -> &'static str {
        match *self {
            Self::LOGON_REQUEST => "LogonRequest",
            Self::LOGON_RESPONSE => "LogonResponse",
            Self::HEARTBEAT => "Heartbeat",
            Self::MARKET_DATA_REQUEST => "MarketDataRequest",
            Self::MARKET_DATA_TRADE => "MarketDataTrade",
            Self::HISTORICAL_PRICE_DATA_REQUEST => "HistoricalPriceDataRequest",
            Self::HISTORICAL_PRICE_RECORD => "HistoricalPriceRecord",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.0)
    }
}

// ── Session messages ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogonRequest {
    pub protocol_version: u32,
    pub username: String,
    pub password: String,
    pub heartbeat_interval_in_seconds: u32,
    pub client_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogonResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Heartbeat {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketDataRequest {
    pub request_action: u8,
    #[serde(rename = "SymbolID")]
    pub symbol_id: u32,
    pub symbol: String,
    pub exchange: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A message with a `Type` this crate does not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    pub message_type: MessageType,
    /// Every field except `Type`, in wire order.
    pub fields: Map<String, Value>,
}

// ── Message ─────────────────────────────────────────────────────────

/// One decoded feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    LogonRequest(LogonRequest),
    LogonResponse(LogonResponse),
    Heartbeat(Heartbeat),
    MarketDataRequest(MarketDataRequest),
    Trade(Trade),
    HistoricalPriceDataRequest(HistoricalPriceDataRequest),
    HistoricalPriceRecord(HistoricalPriceRecord),
    Unknown(UnknownMessage),
}

impl Message {
    /// Build a logon request.
    pub fn logon(username: &str, password: &str, heartbeat_secs: u32, client_name: &str) -> Self {
        Message::LogonRequest(LogonRequest {
            protocol_version: PROTOCOL_VERSION,
            username: username.to_string(),
            password: password.to_string(),
            heartbeat_interval_in_seconds: heartbeat_secs,
            client_name: client_name.to_string(),
            extra: Map::new(),
        })
    }

    pub fn heartbeat() -> Self {
        Message::Heartbeat(Heartbeat::default())
    }

    /// Subscribe to live market data for one symbol.
    pub fn subscribe(symbol_id: u32, symbol: &str, exchange: &str) -> Self {
        Message::MarketDataRequest(MarketDataRequest {
            request_action: REQUEST_ACTION_SUBSCRIBE,
            symbol_id,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            extra: Map::new(),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::LogonRequest(_) => MessageType::LOGON_REQUEST,
            Message::LogonResponse(_) => MessageType::LOGON_RESPONSE,
            Message::Heartbeat(_) => MessageType::HEARTBEAT,
            Message::MarketDataRequest(_) => MessageType::MARKET_DATA_REQUEST,
            Message::Trade(_) => MessageType::MARKET_DATA_TRADE,
            Message::HistoricalPriceDataRequest(_) => MessageType::HISTORICAL_PRICE_DATA_REQUEST,
            Message::HistoricalPriceRecord(_) => MessageType::HISTORICAL_PRICE_RECORD,
            Message::Unknown(unknown) => unknown.message_type,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Message::Heartbeat(_))
    }

    pub fn as_trade(&self) -> Option<&Trade> {
        match self {
            Message::Trade(trade) => Some(trade),
            _ => None,
        }
    }

    /// Decode a message from its JSON field map.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, DecodeError> {
        let code = fields
            .shift_remove(TYPE_FIELD)
            .and_then(|v| v.as_u64())
            .ok_or(DecodeError::MissingType)?;
        let message_type =
            MessageType(u16::try_from(code).map_err(|_| DecodeError::TypeOutOfRange(code))?);

        let body = Value::Object(fields);
        let typed = |result: Result<Message, serde_json::Error>| {
            result.map_err(|source| DecodeError::InvalidFields {
                message_type,
                source,
            })
        };

        match message_type {
            MessageType::LOGON_REQUEST => typed(serde_json::from_value(body).map(Message::LogonRequest)),
            MessageType::LOGON_RESPONSE => typed(serde_json::from_value(body).map(Message::LogonResponse)),
            MessageType::HEARTBEAT => typed(serde_json::from_value(body).map(Message::Heartbeat)),
            MessageType::MARKET_DATA_REQUEST => {
                typed(serde_json::from_value(body).map(Message::MarketDataRequest))
            }
            MessageType::MARKET_DATA_TRADE => typed(serde_json::from_value(body).map(Message::Trade)),
            MessageType::HISTORICAL_PRICE_DATA_REQUEST => {
                typed(serde_json::from_value(body).map(Message::HistoricalPriceDataRequest))
            }
            MessageType::HISTORICAL_PRICE_RECORD => {
                typed(serde_json::from_value(body).map(Message::HistoricalPriceRecord))
            }
            _ => match body {
                Value::Object(fields) => Ok(Message::Unknown(UnknownMessage {
                    message_type,
                    fields,
                })),
                _ => Err(DecodeError::NotAnObject),
            },
        }
    }

    /// Decode a message from a JSON payload (no delimiter).
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        match serde_json::from_slice::<Value>(payload)? {
            Value::Object(fields) => Self::from_fields(fields),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    /// Encode the message as a JSON field map with `Type` first.
    pub fn to_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let body = match self {
            Message::LogonRequest(m) => serde_json::to_value(m)?,
            Message::LogonResponse(m) => serde_json::to_value(m)?,
            Message::Heartbeat(m) => serde_json::to_value(m)?,
            Message::MarketDataRequest(m) => serde_json::to_value(m)?,
            Message::Trade(m) => serde_json::to_value(m)?,
            Message::HistoricalPriceDataRequest(m) => serde_json::to_value(m)?,
            Message::HistoricalPriceRecord(m) => serde_json::to_value(m)?,
            Message::Unknown(m) => Value::Object(m.fields.clone()),
        };

        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::from(self.message_type().0));
        if let Value::Object(rest) = body {
            for (key, value) in rest {
                if key != TYPE_FIELD {
                    fields.insert(key, value);
                }
            }
        }
        Ok(fields)
    }

    /// Encode the message as a compact JSON payload (no delimiter).
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_fields()?)
    }
}

impl From<Trade> for Message {
    fn from(trade: Trade) -> Self {
        Message::Trade(trade)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_fields()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        Message::from_fields(fields).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Side;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn test_decode_trade() {
        let payload = br#"{"Type":112,"SymbolID":1,"Price":100.25,"Volume":2,"DateTime":1700000000,"AtBidOrAsk":1}"#;
        let message = Message::from_slice(payload).unwrap();

        let trade = message.as_trade().expect("trade variant");
        assert_eq!(trade.price, Decimal::new(10025, 2));
        assert_eq!(trade.at_bid_or_ask, Some(Side::Bid));
        assert_eq!(message.message_type(), MessageType::MARKET_DATA_TRADE);
    }

    #[test]
    fn test_trade_reencodes_to_wire_text() {
        let payload = br#"{"Type":112,"SymbolID":1,"Price":4000.25,"Volume":2,"DateTime":1601481600.5,"AtBidOrAsk":2,"Flags":0}"#;
        let message = Message::from_slice(payload).unwrap();
        assert_eq!(message.to_vec().unwrap(), payload.to_vec());
    }

    #[test]
    fn test_unknown_type_keeps_fields() {
        let payload = br#"{"Type":117,"BidPrice":1.5,"AskPrice":1.75}"#;
        let message = Message::from_slice(payload).unwrap();

        match &message {
            Message::Unknown(unknown) => {
                assert_eq!(unknown.message_type, MessageType(117));
                assert_eq!(unknown.fields.len(), 2);
            }
            other => panic!("Expected Unknown, got {:?}", other),
        }
        assert_eq!(message.to_vec().unwrap(), payload.to_vec());
    }

    #[test]
    fn test_extra_fields_survive_reencode() {
        let value = json!({
            "Type": 2,
            "ProtocolVersion": 8,
            "Result": 1,
            "ResultText": "Connected",
            "ServerName": "SC",
            "MarketDepthUpdatesBestBidAndAsk": 1
        });
        let message: Message = serde_json::from_value(value.clone()).unwrap();

        match &message {
            Message::LogonResponse(resp) => {
                assert_eq!(resp.result, Some(1));
                assert_eq!(resp.extra["ServerName"], json!("SC"));
            }
            other => panic!("Expected LogonResponse, got {:?}", other),
        }
        assert_eq!(serde_json::to_value(&message).unwrap(), value);
    }

    #[test]
    fn test_type_is_first_field() {
        let encoded = Message::heartbeat().to_vec().unwrap();
        assert_eq!(encoded, br#"{"Type":3}"#.to_vec());

        let logon = Message::logon("user", "pass", 5, "hello").to_vec().unwrap();
        assert!(logon.starts_with(br#"{"Type":1,"#));
    }

    #[test]
    fn test_missing_type_is_error() {
        let result = Message::from_slice(br#"{"Price":1}"#);
        assert!(matches!(result, Err(DecodeError::MissingType)));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            Message::from_slice(b"[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            Message::from_slice(b"{\"Type\":"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Message::from_slice(br#"{"Type":112,"Price":"abc"}"#),
            Err(DecodeError::InvalidFields { .. })
        ));
    }
}

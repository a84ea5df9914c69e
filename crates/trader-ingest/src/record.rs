//! 수집 레코드 모델.
//!
//! 디코더가 전달하는 느슨한 타입의 키/값 레코드입니다. 레코드는 대상 테이블을
//! 가리키는 [`RecordKind`] 태그와 필드 맵으로 구성됩니다.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 레코드 종류 (대상 테이블 태그).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Kline,
    Ticker,
    PublicTrade,
    OrderBook,
    Liquidation,
    SentimentIndex,
    Indicator,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Kline,
        RecordKind::Ticker,
        RecordKind::PublicTrade,
        RecordKind::OrderBook,
        RecordKind::Liquidation,
        RecordKind::SentimentIndex,
        RecordKind::Indicator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Ticker => "ticker",
            Self::PublicTrade => "public_trade",
            Self::OrderBook => "order_book",
            Self::Liquidation => "liquidation",
            Self::SentimentIndex => "sentiment_index",
            Self::Indicator => "indicator",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IngestError::ParseError(format!("unknown record kind: {}", s)))
    }
}

/// 와이어에서 디코딩된 필드 값.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::Decimal(Decimal::from(u))
                } else {
                    n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null)
                }
            }
            Value::String(s) => FieldValue::Text(s),
            Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            // 중첩 객체는 컬럼으로 매핑되지 않음
            Value::Object(_) => FieldValue::Null,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Decimal> for FieldValue {
    fn from(v: Decimal) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::List(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// 디코딩된 일반 레코드.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            fields: HashMap::new(),
        }
    }

    /// 필드를 추가한 레코드 반환 (빌더).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// 필드 조회. 누락된 필드는 `None`.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// JSON 객체에서 지정한 종류의 레코드를 생성.
    pub fn from_json(kind: RecordKind, value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self {
                kind,
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            }),
            other => Err(IngestError::ParseError(format!(
                "record must be a JSON object, got: {}",
                other
            ))),
        }
    }

    /// `"kind"` 키로 종류가 태그된 JSON 객체에서 레코드를 생성.
    pub fn from_tagged_json(mut value: serde_json::Value) -> Result<Self> {
        let kind = value
            .as_object_mut()
            .and_then(|map| map.remove("kind"))
            .ok_or_else(|| IngestError::ParseError("missing \"kind\" tag".to_string()))?;
        let kind: RecordKind = serde_json::from_value(kind)?;
        Self::from_json(kind, value)
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!("kline".parse::<RecordKind>().unwrap(), RecordKind::Kline);
        assert_eq!(
            "ORDER_BOOK".parse::<RecordKind>().unwrap(),
            RecordKind::OrderBook
        );
        assert!("candles".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_from_json_values() {
        let record = Record::from_json(
            RecordKind::OrderBook,
            json!({
                "symbol": "BTCUSD",
                "engineTime": 1700000000000i64,
                "bids": [["100", "1"]],
                "huge": 18446744073709551615u64,
                "meta": {"a": 1}
            }),
        )
        .unwrap();

        assert_eq!(record.get("symbol"), Some(&FieldValue::Text("BTCUSD".into())));
        assert_eq!(
            record.get("engineTime"),
            Some(&FieldValue::Int(1_700_000_000_000))
        );
        assert_eq!(
            record.get("huge"),
            Some(&FieldValue::Decimal(Decimal::from(u64::MAX)))
        );
        assert_eq!(record.get("meta"), Some(&FieldValue::Null));
        assert_eq!(record.get("bids").and_then(|v| v.as_list()).map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_from_tagged_json() {
        let record =
            Record::from_tagged_json(json!({"kind": "liquidation", "symbol": "ETHUSD"})).unwrap();
        assert_eq!(record.kind, RecordKind::Liquidation);
        assert!(record.get("kind").is_none());

        assert!(Record::from_tagged_json(json!({"symbol": "ETHUSD"})).is_err());
        assert!(Record::from_json(RecordKind::Kline, json!([1, 2])).is_err());
    }
}

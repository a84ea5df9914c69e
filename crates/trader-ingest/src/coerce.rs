//! 필드 변환 계층.
//!
//! 와이어 값(문자열, 숫자, decimal, bool, 타임스탬프)을 컬럼 타입으로 관대하게
//! 변환합니다. 변환할 수 없는 값은 오류 대신 `SqlValue::Null`이 됩니다.
//! 부수 효과가 없는 순수 함수입니다.

use crate::record::FieldValue;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// 대상 컬럼 타입.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    BigInt,
    Numeric,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// PostgreSQL 타입 이름.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::BigInt => "BIGINT",
            Self::Numeric => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMPTZ",
        }
    }
}

/// 컬럼에 바인딩될 타입이 정해진 값.
///
/// `Null`도 컬럼 타입을 유지해야 올바른 타입의 NULL 파라미터를 바인딩할 수 있습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    Null(ColumnType),
    Text(String),
    BigInt(i64),
    Numeric(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<Decimal> {
        match self {
            SqlValue::Numeric(d) => Some(*d),
            _ => None,
        }
    }
}

/// 필드 값을 대상 컬럼 타입으로 변환.
///
/// 누락된 필드(`None`)와 `FieldValue::Null`은 `SqlValue::Null`이 됩니다.
pub fn coerce(value: Option<&FieldValue>, target: ColumnType) -> SqlValue {
    let converted = match value {
        None | Some(FieldValue::Null) => None,
        Some(v) => match target {
            ColumnType::Text => to_text(v).map(SqlValue::Text),
            ColumnType::BigInt => to_bigint(v).map(SqlValue::BigInt),
            ColumnType::Numeric => to_numeric(v).map(SqlValue::Numeric),
            ColumnType::Boolean => to_boolean(v).map(SqlValue::Boolean),
            ColumnType::Timestamp => to_timestamp(v).map(SqlValue::Timestamp),
        },
    };

    converted.unwrap_or(SqlValue::Null(target))
}

fn to_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::Float(f) if f.is_finite() => Some(f.to_string()),
        FieldValue::Decimal(d) => Some(d.normalize().to_string()),
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Timestamp(ts) => Some(ts.to_rfc3339()),
        _ => None,
    }
}

fn to_numeric(value: &FieldValue) -> Option<Decimal> {
    match value {
        FieldValue::Int(i) => Some(Decimal::from(*i)),
        FieldValue::Float(f) if f.is_finite() => Decimal::from_f64(*f),
        FieldValue::Decimal(d) => Some(*d),
        FieldValue::Text(s) => parse_decimal(s),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn to_bigint(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(i) => Some(*i),
        FieldValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| parse_decimal(s).and_then(integral))
        }
        other => to_numeric(other).and_then(integral),
    }
}

/// 소수부가 없는 값만 정수로 변환.
fn integral(d: Decimal) -> Option<i64> {
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

fn to_boolean(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Text(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                parse_decimal(s).map(|d| !d.is_zero())
            }
        }
        other => to_numeric(other).map(|d| !d.is_zero()),
    }
}

/// 타임스탬프 변환. 정수는 UTC epoch 밀리초로 해석.
fn to_timestamp(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Timestamp(ts) => Some(*ts),
        FieldValue::Bool(_) => None,
        other => to_bigint(other).and_then(DateTime::from_timestamp_millis),
    }
}

// =============================================================================
// 테스트
// =============================================================================

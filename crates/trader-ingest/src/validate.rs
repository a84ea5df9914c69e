//! 레코드 검증.
//!
//! 레코드 종류마다 선언된 필수 필드가 변환 후에도 모두 NULL이 아닌지 확인합니다.
//! 검증 실패는 오류가 아니라 분류 결과입니다. 잘못된 레코드는 배치에서
//! 제외될 뿐 배치를 실패시키지 않습니다.

use crate::coerce::coerce;
use crate::record::{Record, RecordKind};
use crate::schema::{schema_for, ProjectionSchema};

/// 검증을 통과한 레코드. [`crate::project::project`]의 입력입니다.
#[derive(Debug, Clone, Copy)]
pub struct ValidRecord<'a> {
    record: &'a Record,
    schema: &'static ProjectionSchema,
}

impl<'a> ValidRecord<'a> {
    pub fn record(&self) -> &'a Record {
        self.record
    }

    pub fn schema(&self) -> &'static ProjectionSchema {
        self.schema
    }
}

/// 검증 결과.
#[derive(Debug, Clone, Copy)]
pub enum Validation<'a> {
    Valid(ValidRecord<'a>),
    Malformed {
        kind: RecordKind,
        /// 처음 발견된 누락 필드
        field: &'static str,
    },
}

impl Validation<'_> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

/// 레코드를 `Valid` 또는 `Malformed`로 분류.
pub fn validate(record: &Record) -> Validation<'_> {
    let schema = schema_for(record.kind);

    for (field, ty) in schema.required_fields() {
        if coerce(record.get(field), ty).is_null() {
            return Validation::Malformed {
                kind: record.kind,
                field,
            };
        }
    }

    Validation::Valid(ValidRecord { record, schema })
}

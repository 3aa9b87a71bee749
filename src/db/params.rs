//! Parameter binding for generated and raw statements.
//!
//! MySQL and SQLite convert loosely typed parameters on the server, so values
//! are bound by their own kind. PostgreSQL does not: there each value is
//! encoded as the type the server inferred for its placeholder, which lets a
//! JSON string fill a DATE or UUID column and a null fill any column.

use crate::models::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::sqlite::SqliteArguments;
use sqlx::types::{Json, Uuid};
use sqlx::{Encode, MySql, Postgres, Sqlite, Type, TypeInfo};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // No native JSON type; stored as text
        Value::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind a parameter to a PostgreSQL query as `target`, the type the server
/// inferred for its placeholder.
///
/// Fails with [`sqlx::Error::Encode`] when the value cannot represent that
/// type, e.g. `"abc"` for an INT4 column.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Value,
    target: &PgTypeInfo,
) -> Result<sqlx::query::Query<'q, Postgres, PgArguments>, sqlx::Error> {
    let ty = target.clone();
    if param.is_null() {
        return Ok(query.bind(Inferred::new(None::<&str>, ty)));
    }

    let query = match target.name() {
        "BOOL" => query.bind(Inferred::new(pg::to_bool(param, target)?, ty)),
        "INT2" => query.bind(Inferred::new(pg::to_int::<i16>(param, target)?, ty)),
        "INT4" => query.bind(Inferred::new(pg::to_int::<i32>(param, target)?, ty)),
        "INT8" => query.bind(Inferred::new(pg::to_int::<i64>(param, target)?, ty)),
        "FLOAT4" => query.bind(Inferred::new(pg::to_f64(param, target)? as f32, ty)),
        "FLOAT8" => query.bind(Inferred::new(pg::to_f64(param, target)?, ty)),
        "NUMERIC" => query.bind(Inferred::new(pg::to_decimal(param, target)?, ty)),
        "DATE" => query.bind(Inferred::new(pg::to_date(param, target)?, ty)),
        "TIME" => query.bind(Inferred::new(pg::to_time(param, target)?, ty)),
        "TIMESTAMP" => query.bind(Inferred::new(pg::to_timestamp(param, target)?, ty)),
        "TIMESTAMPTZ" => query.bind(Inferred::new(pg::to_timestamptz(param, target)?, ty)),
        "UUID" => query.bind(Inferred::new(pg::to_uuid(param, target)?, ty)),
        "JSON" | "JSONB" => query.bind(Inferred::new(Json(param.to_json()), ty)),
        "BYTEA" => match param {
            Value::Bytes(v) => query.bind(Inferred::new(v.as_slice(), ty)),
            Value::Text(s) => query.bind(Inferred::new(s.as_bytes(), ty)),
            _ => return Err(pg::mismatch(param, target)),
        },
        // Text-like types, enums and anything unknown take the text encoding
        _ => match param {
            Value::Text(s) => query.bind(Inferred::new(s.as_str(), ty)),
            Value::Bool(v) => query.bind(Inferred::new(v.to_string(), ty)),
            Value::Int(v) => query.bind(Inferred::new(v.to_string(), ty)),
            Value::Float(v) => query.bind(Inferred::new(v.to_string(), ty)),
            Value::Json(v) => query.bind(Inferred::new(v.to_string(), ty)),
            Value::Null | Value::Bytes(_) => return Err(pg::mismatch(param, target)),
        },
    };
    Ok(query)
}

/// A value encoded by `T` but declared to the server as `ty`.
struct Inferred<T> {
    value: T,
    ty: PgTypeInfo,
}

impl<T> Inferred<T> {
    fn new(value: T, ty: PgTypeInfo) -> Self {
        Self { value, ty }
    }
}

impl<T: Type<Postgres>> Type<Postgres> for Inferred<T> {
    fn type_info() -> PgTypeInfo {
        T::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'q, T: Encode<'q, Postgres>> Encode<'q, Postgres> for Inferred<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        self.value.encode_by_ref(buf)
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.ty.clone())
    }

    fn size_hint(&self) -> usize {
        self.value.size_hint()
    }
}

/// Conversions from a [`Value`] to the Rust type sqlx encodes for a
/// PostgreSQL type.
mod pg {
    use super::*;
    use std::str::FromStr;

    pub fn mismatch(param: &Value, target: &PgTypeInfo) -> sqlx::Error {
        sqlx::Error::Encode(
            format!("cannot bind a {} value as {}", param.type_name(), target.name()).into(),
        )
    }

    fn invalid(text: &str, target: &PgTypeInfo) -> sqlx::Error {
        sqlx::Error::Encode(format!("'{text}' is not a valid {}", target.name()).into())
    }

    pub fn to_bool(param: &Value, target: &PgTypeInfo) -> Result<bool, sqlx::Error> {
        match param {
            Value::Bool(v) => Ok(*v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(invalid(s, target)),
            },
            _ => Err(mismatch(param, target)),
        }
    }

    pub fn to_int<T: TryFrom<i64>>(param: &Value, target: &PgTypeInfo) -> Result<T, sqlx::Error> {
        let wide = match param {
            Value::Int(v) => *v,
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => *v as i64,
            Value::Text(s) => s.trim().parse().map_err(|_| invalid(s, target))?,
            _ => return Err(mismatch(param, target)),
        };
        T::try_from(wide).map_err(|_| {
            sqlx::Error::Encode(format!("{wide} is out of range for {}", target.name()).into())
        })
    }

    pub fn to_f64(param: &Value, target: &PgTypeInfo) -> Result<f64, sqlx::Error> {
        match param {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Text(s) => s.trim().parse().map_err(|_| invalid(s, target)),
            _ => Err(mismatch(param, target)),
        }
    }

    pub fn to_decimal(param: &Value, target: &PgTypeInfo) -> Result<Decimal, sqlx::Error> {
        match param {
            Value::Int(v) => Ok(Decimal::from(*v)),
            Value::Float(v) => Decimal::try_from(*v).map_err(|_| mismatch(param, target)),
            Value::Text(s) => Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .map_err(|_| invalid(s, target)),
            _ => Err(mismatch(param, target)),
        }
    }

    fn text<'a>(param: &'a Value, target: &PgTypeInfo) -> Result<&'a str, sqlx::Error> {
        match param {
            Value::Text(s) => Ok(s.trim()),
            _ => Err(mismatch(param, target)),
        }
    }

    /// Accepts RFC 3339, `T`- or space-separated local times, and bare dates.
    fn parse_local(s: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.naive_utc());
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Some(dt);
            }
        }
        NaiveDate::from_str(s)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    pub fn to_date(param: &Value, target: &PgTypeInfo) -> Result<NaiveDate, sqlx::Error> {
        let s = text(param, target)?;
        NaiveDate::from_str(s)
            .ok()
            .or_else(|| parse_local(s).map(|dt| dt.date()))
            .ok_or_else(|| invalid(s, target))
    }

    pub fn to_time(param: &Value, target: &PgTypeInfo) -> Result<NaiveTime, sqlx::Error> {
        let s = text(param, target)?;
        NaiveTime::from_str(s).map_err(|_| invalid(s, target))
    }

    pub fn to_timestamp(param: &Value, target: &PgTypeInfo) -> Result<NaiveDateTime, sqlx::Error> {
        let s = text(param, target)?;
        parse_local(s).ok_or_else(|| invalid(s, target))
    }

    /// Times without an offset are taken as UTC.
    pub fn to_timestamptz(param: &Value, target: &PgTypeInfo) -> Result<DateTime<Utc>, sqlx::Error> {
        let s = text(param, target)?;
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
            return Ok(dt.with_timezone(&Utc));
        }
        parse_local(s)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| invalid(s, target))
    }

    pub fn to_uuid(param: &Value, target: &PgTypeInfo) -> Result<Uuid, sqlx::Error> {
        let s = text(param, target)?;
        Uuid::parse_str(s).map_err(|_| invalid(s, target))
    }
}

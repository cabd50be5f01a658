//! Parameter binding for PostgreSQL statements.
//!
//! Each [`Binding`] is bound with its native PostgreSQL type so the server
//! never has to guess, except for `NULL`, which is sent with an unspecified
//! type OID and lets the server infer it from the surrounding expression.
//! Text aimed at a non-text position is cast in the SQL itself (see
//! `executor::prepare_sql`), since every parameter travels in binary form.

use crate::models::Binding;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::types::Json;
use sqlx::{Encode, Postgres, Type};

/// A `NULL` whose type the server resolves from context.
///
/// Binding `None::<String>` would declare the parameter as `text`, which the
/// server then refuses to assign to e.g. an `integer` column.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Binding,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        Binding::Null => query.bind(UntypedNull),
        Binding::Bool(v) => query.bind(*v),
        Binding::Int(v) => query.bind(*v),
        Binding::Float(v) => query.bind(*v),
        Binding::Text(v) => query.bind(v.as_str()),
        Binding::Uuid(v) => query.bind(*v),
        Binding::Timestamp(v) => query.bind(*v),
        Binding::Json(v) => query.bind(Json(v)),
        Binding::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind every parameter in order.
pub(crate) fn bind_all<'q>(
    sql: &'q str,
    params: &'q [Binding],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_postgres_param(query, param))
}

use super::{Connection, ConnectionError};
use bytes::{BufMut, BytesMut};
use itertools::Itertools;
use postgres::{
    fallible_iterator::FallibleIterator,
    types::{to_sql_checked, FromSql, IsNull, ToSql, Type},
    Client, NoTls, Statement,
};
use serde_json::value::RawValue;
use std::{error::Error, iter};
use tracing::{debug, error, info};

/// version byte prefixed to the binary representation of `jsonb`
const JSONB_VERSION: u8 = 1;

#[derive(Debug)]
/// A single JSON document bound as-is, without re-encoding.
///
/// The server infers the parameter type from the target column, the same bytes are valid for
/// `text`, `json` and (with a version prefix) `jsonb`.
struct Payload<'a>(&'a RawValue);

impl ToSql for Payload<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if *ty == Type::JSONB {
            out.put_u8(JSONB_VERSION);
        }
        out.extend_from_slice(self.0.get().as_bytes());

        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        [
            Type::JSON,
            Type::JSONB,
            Type::TEXT,
            Type::VARCHAR,
            Type::BPCHAR,
        ]
        .contains(ty)
    }

    to_sql_checked!();
}

/// Destination for a column value nobody is interested in.
///
/// Scanning into it forces the driver to decode each value so the timed section covers the full
/// result set, the value itself is dropped on the spot.
struct Discard;

impl<'a> FromSql<'a> for Discard {
    fn from_sql(_: &Type, _: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Discard)
    }

    fn from_sql_null(_: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Discard)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Synchronous PostgreSQL session
pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    pub fn connect(params: &str) -> Result<Self, ConnectionError> {
        match Client::connect(params, NoTls) {
            Ok(client) => {
                info!("Opened PostgreSQL connection");

                Ok(Self { client })
            }
            Err(error) => {
                error!(error = ?error, "Failed to open PostgreSQL connection: {error}");

                Err(ConnectionError::Postgres(error))
            }
        }
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        self.client.close()?;

        info!("Closed PostgreSQL connection");

        Ok(())
    }

    fn client(&mut self) -> Result<&mut Client, ConnectionError> {
        if self.client.is_closed() {
            Err(ConnectionError::Closed)
        } else {
            Ok(&mut self.client)
        }
    }
}

impl Connection for PostgresConnection {
    type Statement = Statement;

    fn batch_execute(&mut self, statement: &str) -> Result<(), ConnectionError> {
        debug!(statement = statement, "Executing statement");

        Ok(self.client()?.batch_execute(statement)?)
    }

    fn prepare(&mut self, statement: &str) -> Result<Statement, ConnectionError> {
        Ok(self.client()?.prepare(statement)?)
    }

    fn execute(&mut self, statement: &Statement, params: &[&RawValue]) -> Result<u64, ConnectionError> {
        let payloads = params.iter().map(|&raw| Payload(raw)).collect_vec();
        let params = payloads
            .iter()
            .map(|payload| payload as &(dyn ToSql + Sync))
            .collect_vec();

        Ok(self.client()?.execute(statement, &params)?)
    }

    fn drain(&mut self, statement: &Statement) -> Result<u64, ConnectionError> {
        let mut rows = self
            .client()?
            .query_raw(statement, iter::empty::<&dyn ToSql>())?;
        let mut counter = 0;

        while let Some(row) = rows.next()? {
            for index in 0..row.len() {
                row.try_get::<_, Discard>(index)?;
            }

            counter += 1;
        }

        Ok(counter)
    }

    fn query_i64(&mut self, query: &str) -> Result<i64, ConnectionError> {
        Ok(self.client()?.query_one(query, &[])?.try_get(0)?)
    }

    fn query_text(&mut self, query: &str) -> Result<String, ConnectionError> {
        Ok(self.client()?.query_one(query, &[])?.try_get(0)?)
    }
}

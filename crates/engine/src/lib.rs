pub mod config;
pub mod error;
pub mod request;

pub use config::{DEFAULT_MAX_BATCH_ROWS, EngineConfig};
pub use error::EngineError;
pub use request::{Arg, Operation, Reply, Request};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use stepgate_core::{ConnectionId, StatementId};
use stepgate_storage::{Connection, MultiStep, Statement, Step, insert_all};
use tracing::debug;

use crate::request::Args;

/// Operation dispatch over registries of open connections and prepared
/// statements, addressed by id.
///
/// Registry locks are never held across a call into storage.
pub struct Engine {
    config: EngineConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    statements: RwLock<HashMap<StatementId, Arc<Statement>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            statements: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connection(&self, id: ConnectionId) -> Result<Arc<Connection>, EngineError> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvalidConnection(id))
    }

    pub fn statement(&self, id: StatementId) -> Result<Arc<Statement>, EngineError> {
        self.statements
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvalidStatement(id))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.read().len()
    }

    /// Run the operation named `op`. The argument count and every argument
    /// type are checked before any handle is looked up.
    pub fn call(&self, op: &str, args: Vec<Arg>) -> Result<Reply, EngineError> {
        let operation = Operation::lookup(op)?;
        let args = Args::new(operation, &args)?;
        debug!(op = operation.name(), "dispatch");

        match operation {
            Operation::Open => {
                let path = args.text(0)?;
                let connection = Connection::open(path, &self.config.connection)?;
                let id = connection.id();
                self.connections.write().insert(id, connection);
                Ok(Reply::Connection(id))
            }
            Operation::Close => {
                let id = args.connection(0)?;
                self.connection(id)?.close()?;
                self.connections.write().remove(&id);
                Ok(Reply::Ok)
            }
            Operation::Execute => {
                let (id, sql) = (args.connection(0)?, args.text(1)?);
                self.connection(id)?.execute(sql)?;
                Ok(Reply::Ok)
            }
            Operation::Changes => {
                let id = args.connection(0)?;
                let changes = self.connection(id)?.changes()?;
                Ok(Reply::Integer(i64::try_from(changes).unwrap_or(i64::MAX)))
            }
            Operation::LastInsertRowid => {
                let id = args.connection(0)?;
                Ok(Reply::Integer(self.connection(id)?.last_insert_rowid()?))
            }
            Operation::Interrupt => {
                let id = args.connection(0)?;
                self.connection(id)?.interrupt();
                Ok(Reply::Ok)
            }
            Operation::Serialize => {
                let (id, schema) = (args.connection(0)?, args.text(1)?);
                Ok(Reply::Bytes(self.connection(id)?.serialize(schema)?))
            }
            Operation::Deserialize => {
                let (id, schema, bytes) = (args.connection(0)?, args.text(1)?, args.bytes(2)?);
                self.connection(id)?.deserialize(schema, bytes)?;
                Ok(Reply::Ok)
            }
            Operation::EnableLoadExtension => {
                let (id, enabled) = (args.connection(0)?, args.boolean(1)?);
                self.connection(id)?.set_load_extension(enabled)?;
                Ok(Reply::Ok)
            }
            Operation::Prepare => {
                let (id, sql) = (args.connection(0)?, args.text(1)?);
                let statement = self.connection(id)?.prepare(sql)?;
                let statement_id = statement.id();
                self.statements.write().insert(statement_id, Arc::new(statement));
                Ok(Reply::Statement(statement_id))
            }
            Operation::Bind => {
                let (id, values) = (args.statement(0)?, args.values(1)?);
                self.statement(id)?.bind(values)?;
                Ok(Reply::Ok)
            }
            Operation::Step => {
                let id = args.statement(0)?;
                Ok(match self.statement(id)?.step()? {
                    Step::Row(row) => Reply::Row(row),
                    Step::Done => Reply::Done,
                    Step::Busy => Reply::Busy,
                })
            }
            Operation::MultiStep => {
                let (id, max_rows) = (args.statement(0)?, args.integer(1)?);
                let max_rows = usize::try_from(max_rows)
                    .map_err(|_| EngineError::BadArgument {
                        op: operation.name(),
                        index: 1,
                        expected: "a non-negative integer",
                    })?
                    .min(self.config.max_batch_rows);
                Ok(match self.statement(id)?.multi_step(max_rows)? {
                    MultiStep::Done(rows) => Reply::Rows { rows, done: true },
                    MultiStep::Rows(rows) => Reply::Rows { rows, done: false },
                    MultiStep::Busy => Reply::Busy,
                })
            }
            Operation::Columns => {
                let id = args.statement(0)?;
                Ok(Reply::Columns(self.statement(id)?.columns()?))
            }
            Operation::Reset => {
                let id = args.statement(0)?;
                self.statement(id)?.reset()?;
                Ok(Reply::Ok)
            }
            Operation::Release => {
                let id = args.statement(0)?;
                let released = self.statements.write().remove(&id);
                // Finalised once the last in-flight call drops its reference.
                drop(released);
                debug!(statement = %id, "released statement");
                Ok(Reply::Ok)
            }
            Operation::InsertAll => {
                let (id, statement_id, rows) =
                    (args.connection(0)?, args.statement(1)?, args.rows(2)?);
                let connection = self.connection(id)?;
                let statement = self.statement(statement_id)?;
                insert_all(&connection, &statement, rows)?;
                Ok(Reply::Ok)
            }
        }
    }

    /// Decode a msgpack [`Request`], run it, and encode the outcome as a
    /// msgpack `Result<Reply, String>`.
    pub fn call_encoded(&self, request: &[u8]) -> Vec<u8> {
        let outcome = rmp_serde::from_slice::<Request>(request)
            .map_err(|e| EngineError::Serialization(e.to_string()))
            .and_then(|Request { op, args }| self.call(&op, args))
            .map_err(|e| e.to_string());
        rmp_serde::to_vec(&outcome).unwrap_or_default()
    }

    /// Close every registered connection, releasing all statements first.
    /// Returns the first close failure; connections that fail to close stay
    /// registered.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let statements: Vec<_> = self.statements.write().drain().collect();
        drop(statements);

        let ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        let mut first_error = None;
        for id in ids {
            match self.call(Operation::Close.name(), vec![Arg::Connection(id)]) {
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_core::Value;

    fn open(engine: &Engine) -> Result<ConnectionId, EngineError> {
        match engine.call("open", vec![Arg::from(":memory:")])? {
            Reply::Connection(id) => Ok(id),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn open_registers_connection() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::default();
        let id = open(&engine)?;
        assert_eq!(engine.connection_count(), 1);
        assert!(engine.connection(id)?.is_open());
        Ok(())
    }

    #[test]
    fn close_unregisters_connection() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::default();
        let id = open(&engine)?;
        assert_eq!(engine.call("close", vec![Arg::from(id)])?, Reply::Ok);
        assert_eq!(engine.connection_count(), 0);
        assert!(matches!(
            engine.call("changes", vec![Arg::from(id)]),
            Err(EngineError::InvalidConnection(_))
        ));
        Ok(())
    }

    #[test]
    fn type_errors_win_over_unknown_handles() {
        let engine = Engine::default();
        let result = engine.call("execute", vec![Arg::from(ConnectionId::new()), Arg::from(1_i64)]);
        assert!(matches!(result, Err(EngineError::BadArgument { index: 1, .. })));
    }

    #[test]
    fn multi_step_is_capped_by_config() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::new(EngineConfig {
            max_batch_rows: 2,
            ..EngineConfig::default()
        });
        let id = open(&engine)?;
        engine.call(
            "execute",
            vec![
                Arg::from(id),
                Arg::from("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);"),
            ],
        )?;
        let Reply::Statement(stmt) =
            engine.call("prepare", vec![Arg::from(id), Arg::from("SELECT n FROM t ORDER BY n")])?
        else {
            panic!("expected a statement");
        };

        let first = engine.call("multi_step", vec![Arg::from(stmt), Arg::from(100_i64)])?;
        assert_eq!(
            first,
            Reply::Rows {
                rows: vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
                done: false,
            }
        );
        let second = engine.call("multi_step", vec![Arg::from(stmt), Arg::from(100_i64)])?;
        assert_eq!(
            second,
            Reply::Rows {
                rows: vec![vec![Value::Integer(3)]],
                done: true,
            }
        );
        Ok(())
    }

    #[test]
    fn negative_batch_size_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::default();
        let id = open(&engine)?;
        let Reply::Statement(stmt) = engine.call("prepare", vec![Arg::from(id), Arg::from("SELECT 1")])?
        else {
            panic!("expected a statement");
        };
        assert!(matches!(
            engine.call("multi_step", vec![Arg::from(stmt), Arg::from(-1_i64)]),
            Err(EngineError::BadArgument { op: "multi_step", index: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn shutdown_closes_everything() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::default();
        let id = open(&engine)?;
        engine.call("prepare", vec![Arg::from(id), Arg::from("SELECT 1")])?;
        let connection = engine.connection(id)?;
        engine.shutdown()?;
        assert_eq!(engine.statement_count(), 0);
        assert_eq!(engine.connection_count(), 0);
        assert!(!connection.is_open());
        Ok(())
    }
}

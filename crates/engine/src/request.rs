use serde::{Deserialize, Serialize};
use stepgate_core::{ConnectionId, Row, StatementId, Value};

use crate::error::EngineError;

/// One positional argument to an engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Connection(ConnectionId),
    Statement(StatementId),
    Value(Value),
    Values(Vec<Value>),
    Rows(Vec<Row>),
}

impl From<ConnectionId> for Arg {
    fn from(id: ConnectionId) -> Self {
        Arg::Connection(id)
    }
}

impl From<StatementId> for Arg {
    fn from(id: StatementId) -> Self {
        Arg::Statement(id)
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Value(Value::from(text))
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Value(Value::Integer(n))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Ok,
    Connection(ConnectionId),
    Statement(StatementId),
    Integer(i64),
    Row(Row),
    Done,
    Busy,
    /// A `multi_step` batch; `done` is set once the statement completed.
    Rows { rows: Vec<Row>, done: bool },
    Columns(Vec<String>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub op: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Close,
    Execute,
    Changes,
    LastInsertRowid,
    Interrupt,
    Serialize,
    Deserialize,
    EnableLoadExtension,
    Prepare,
    Bind,
    Step,
    MultiStep,
    Columns,
    Reset,
    Release,
    InsertAll,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::Open,
        Operation::Close,
        Operation::Execute,
        Operation::Changes,
        Operation::LastInsertRowid,
        Operation::Interrupt,
        Operation::Serialize,
        Operation::Deserialize,
        Operation::EnableLoadExtension,
        Operation::Prepare,
        Operation::Bind,
        Operation::Step,
        Operation::MultiStep,
        Operation::Columns,
        Operation::Reset,
        Operation::Release,
        Operation::InsertAll,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Execute => "execute",
            Operation::Changes => "changes",
            Operation::LastInsertRowid => "last_insert_rowid",
            Operation::Interrupt => "interrupt",
            Operation::Serialize => "serialize",
            Operation::Deserialize => "deserialize",
            Operation::EnableLoadExtension => "enable_load_extension",
            Operation::Prepare => "prepare",
            Operation::Bind => "bind",
            Operation::Step => "step",
            Operation::MultiStep => "multi_step",
            Operation::Columns => "columns",
            Operation::Reset => "reset",
            Operation::Release => "release",
            Operation::InsertAll => "insert_all",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Operation::Open
            | Operation::Close
            | Operation::Changes
            | Operation::LastInsertRowid
            | Operation::Interrupt
            | Operation::Step
            | Operation::Columns
            | Operation::Reset
            | Operation::Release => 1,
            Operation::Execute
            | Operation::Serialize
            | Operation::EnableLoadExtension
            | Operation::Prepare
            | Operation::Bind
            | Operation::MultiStep => 2,
            Operation::Deserialize | Operation::InsertAll => 3,
        }
    }

    pub fn lookup(name: &str) -> Result<Self, EngineError> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))
    }
}

/// Typed access to an argument list whose length already matches the
/// operation's arity.
pub(crate) struct Args<'a> {
    op: &'static str,
    args: &'a [Arg],
}

impl<'a> Args<'a> {
    pub(crate) fn new(op: Operation, args: &'a [Arg]) -> Result<Self, EngineError> {
        if args.len() != op.arity() {
            return Err(EngineError::BadArity {
                op: op.name(),
                expected: op.arity(),
                actual: args.len(),
            });
        }
        Ok(Self { op: op.name(), args })
    }

    fn bad(&self, index: usize, expected: &'static str) -> EngineError {
        EngineError::BadArgument {
            op: self.op,
            index,
            expected,
        }
    }

    pub(crate) fn connection(&self, index: usize) -> Result<ConnectionId, EngineError> {
        match self.args.get(index) {
            Some(Arg::Connection(id)) => Ok(*id),
            _ => Err(self.bad(index, "a connection")),
        }
    }

    pub(crate) fn statement(&self, index: usize) -> Result<StatementId, EngineError> {
        match self.args.get(index) {
            Some(Arg::Statement(id)) => Ok(*id),
            _ => Err(self.bad(index, "a statement")),
        }
    }

    pub(crate) fn text(&self, index: usize) -> Result<&'a str, EngineError> {
        match self.args.get(index) {
            Some(Arg::Value(Value::Text(text))) => Ok(text.as_str()),
            _ => Err(self.bad(index, "text")),
        }
    }

    pub(crate) fn integer(&self, index: usize) -> Result<i64, EngineError> {
        match self.args.get(index) {
            Some(Arg::Value(Value::Integer(n))) => Ok(*n),
            _ => Err(self.bad(index, "an integer")),
        }
    }

    pub(crate) fn boolean(&self, index: usize) -> Result<bool, EngineError> {
        match self.args.get(index) {
            Some(Arg::Value(Value::Boolean(flag))) => Ok(*flag),
            _ => Err(self.bad(index, "a boolean")),
        }
    }

    /// Binary payloads may arrive tagged as a blob or as raw bytes.
    pub(crate) fn bytes(&self, index: usize) -> Result<&'a [u8], EngineError> {
        match self.args.get(index) {
            Some(Arg::Value(Value::Blob(bytes) | Value::Bytes(bytes))) => Ok(bytes.as_slice()),
            _ => Err(self.bad(index, "binary data")),
        }
    }

    pub(crate) fn values(&self, index: usize) -> Result<&'a [Value], EngineError> {
        match self.args.get(index) {
            Some(Arg::Values(values)) => Ok(values.as_slice()),
            _ => Err(self.bad(index, "a list of values")),
        }
    }

    pub(crate) fn rows(&self, index: usize) -> Result<&'a [Row], EngineError> {
        match self.args.get(index) {
            Some(Arg::Rows(rows)) => Ok(rows.as_slice()),
            _ => Err(self.bad(index, "a list of rows")),
        }
    }
}

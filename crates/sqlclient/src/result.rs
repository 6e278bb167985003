//! Result tables, rows and server messages.

use std::borrow::Cow;
use std::sync::Arc;

use sqlclient_types::{Charset, TypedValue};
use tds_protocol::{ColumnMetadata, MessageToken};

/// Whether a server message came from an ERROR or an INFO token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// ERROR token.
    Error,
    /// INFO token.
    Info,
}

/// An error or informational message reported by the server.
///
/// Messages never alter a [`ResultTable`]; they are collected alongside
/// tables in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Token the message arrived in.
    pub kind: MessageKind,
    /// Message number.
    pub number: i32,
    /// Severity class (0-25).
    pub severity: u8,
    /// Error state.
    pub state: u8,
    /// Message text.
    pub message: String,
    /// Server that produced the message.
    pub server: Option<String>,
    /// Procedure the message was raised in.
    pub procedure: Option<String>,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Lowest severity that terminates a command.
    pub const ERROR_SEVERITY: u8 = 11;

    /// Lowest severity that terminates the connection.
    pub const FATAL_SEVERITY: u8 = 20;

    pub(crate) fn from_token(kind: MessageKind, token: MessageToken) -> Self {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);
        Self {
            kind,
            number: token.number,
            severity: token.class,
            state: token.state,
            message: token.message,
            server: non_empty(token.server),
            procedure: non_empty(token.procedure),
            line: token.line,
        }
    }

    /// Whether this message terminates the command that raised it.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error && self.severity >= Self::ERROR_SEVERITY
    }

    /// Whether this message terminates the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_error() && self.severity >= Self::FATAL_SEVERITY
    }
}

/// One row of a result table.
///
/// Values are in column order and can be looked up by index or by name.
/// Text is available in the connection's output charset through
/// [`Row::get_text`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnMetadata]>,
    values: Vec<TypedValue>,
    charset: Charset,
}

impl Row {
    pub(crate) fn new(
        columns: Arc<[ColumnMetadata]>,
        values: Vec<TypedValue>,
        charset: Charset,
    ) -> Self {
        Self {
            columns,
            values,
            charset,
        }
    }

    /// Value at a column index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TypedValue> {
        self.values.get(index)
    }

    /// Value of the first column named `name`, compared case-insensitively.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&TypedValue> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    /// Text value at `index` in the output charset the row was read with.
    ///
    /// Returns `None` for NULLs and for values that are not text.
    #[must_use]
    pub fn get_text(&self, index: usize) -> Option<Cow<'_, [u8]>> {
        self.get_encoded(index, &self.charset)
    }

    /// Text value of the column named `name` in the row's output charset.
    #[must_use]
    pub fn get_text_by_name(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        self.get_by_name(name)
            .and_then(TypedValue::as_str)
            .map(|text| self.charset.encode(text))
    }

    /// Output charset the row was read with.
    #[must_use]
    pub fn charset(&self) -> &Charset {
        &self.charset
    }

    /// Text value at `index` encoded in `charset`.
    ///
    /// Returns `None` for NULLs and for values that are not text.
    #[must_use]
    pub fn get_encoded(&self, index: usize, charset: &Charset) -> Option<Cow<'_, [u8]>> {
        self.get(index)
            .and_then(TypedValue::as_str)
            .map(|text| charset.encode(text))
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(column name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.values.iter())
    }

    /// Values in column order.
    #[must_use]
    pub fn values(&self) -> &[TypedValue] {
        &self.values
    }

    /// Take the values.
    #[must_use]
    pub fn into_values(self) -> Vec<TypedValue> {
        self.values
    }
}

/// A result set: column metadata plus rows in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    columns: Arc<[ColumnMetadata]>,
    rows: Vec<Row>,
    rows_affected: Option<u64>,
    charset: Charset,
}

impl ResultTable {
    pub(crate) fn new(columns: Vec<ColumnMetadata>, charset: Charset) -> Self {
        Self {
            columns: columns.into(),
            rows: Vec::new(),
            rows_affected: None,
            charset,
        }
    }

    pub(crate) fn push(&mut self, values: Vec<TypedValue>) {
        let row = Row::new(Arc::clone(&self.columns), values, self.charset);
        self.rows.push(row);
    }

    pub(crate) fn set_rows_affected(&mut self, count: Option<u64>) {
        self.rows_affected = count;
    }

    /// Column metadata in ordinal order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Rows in arrival order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row count reported by the closing DONE, if any.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Number of rows received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Take the rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Everything one command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    /// Result tables in arrival order.
    pub tables: Vec<ResultTable>,
    /// Non-terminating server messages in arrival order.
    pub messages: Vec<ServerMessage>,
    /// Last RETURNSTATUS value, if the batch produced one.
    pub return_status: Option<i32>,
}

impl ExecuteResult {
    /// First table, if any.
    #[must_use]
    pub fn first_table(&self) -> Option<&ResultTable> {
        self.tables.first()
    }

    /// First value of the first row of the first table.
    #[must_use]
    pub fn scalar(&self) -> Option<&TypedValue> {
        self.first_table()
            .and_then(|t| t.rows().first())
            .and_then(|r| r.get(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{TypeId, TypeInfo};

    fn table() -> ResultTable {
        table_in(Charset::UTF_8)
    }

    fn table_in(charset: Charset) -> ResultTable {
        let mut table = ResultTable::new(
            vec![
                ColumnMetadata::new("id", TypeId::IntN, TypeInfo::with_length(4)),
                ColumnMetadata::new("Name", TypeId::NVarChar, TypeInfo::with_length(100)),
            ],
            charset,
        );
        table.push(vec![TypedValue::Int(1), TypedValue::String("caf\u{e9}".into())]);
        table.push(vec![TypedValue::Int(2), TypedValue::Null]);
        table
    }

    #[test]
    fn test_row_lookup() {
        let table = table();
        let row = &table.rows()[0];
        assert_eq!(row.get(0), Some(&TypedValue::Int(1)));
        assert_eq!(row.get_by_name("NAME").and_then(TypedValue::as_str), Some("caf\u{e9}"));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.get(2), None);

        let pairs: Vec<_> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(pairs, ["id", "Name"]);
    }

    #[test]
    fn test_get_encoded() {
        let table = table();
        let latin1 = Charset::for_label("iso-8859-1").unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.get_encoded(1, &latin1).unwrap().as_ref(), b"caf\xe9");
        assert_eq!(row.get_encoded(1, &Charset::UTF_8).unwrap().as_ref(), "caf\u{e9}".as_bytes());
        assert!(row.get_encoded(0, &Charset::UTF_8).is_none());
        assert!(table.rows()[1].get_encoded(1, &Charset::UTF_8).is_none());
    }

    #[test]
    fn test_get_text_uses_row_charset() {
        let table = table_in(Charset::for_label("iso-8859-1").unwrap());
        let row = &table.rows()[0];
        assert_eq!(row.charset().name(), "windows-1252");
        assert_eq!(row.get_text(1).unwrap().as_ref(), b"caf\xe9");
        assert_eq!(row.get_text_by_name("name").unwrap().as_ref(), b"caf\xe9");
        assert!(row.get_text(0).is_none());
        assert!(table.rows()[1].get_text(1).is_none());
    }

    #[test]
    fn test_table_shape() {
        let table = table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_names().collect::<Vec<_>>(), ["id", "Name"]);
        assert_eq!(table.columns().len(), 2);
    }

    #[test]
    fn test_message_severity() {
        let mut msg = ServerMessage {
            kind: MessageKind::Error,
            number: 50000,
            severity: 10,
            state: 1,
            message: "note".into(),
            server: None,
            procedure: None,
            line: 1,
        };
        assert!(!msg.is_error());
        msg.severity = 11;
        assert!(msg.is_error());
        assert!(!msg.is_fatal());
        msg.severity = 20;
        assert!(msg.is_fatal());
        msg.kind = MessageKind::Info;
        assert!(!msg.is_error());
    }

    #[test]
    fn test_scalar() {
        let result = ExecuteResult {
            tables: vec![table()],
            ..ExecuteResult::default()
        };
        assert_eq!(result.scalar(), Some(&TypedValue::Int(1)));
        assert_eq!(ExecuteResult::default().scalar(), None);
    }
}

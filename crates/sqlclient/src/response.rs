//! Response token stream parsing.
//!
//! [`ResponseParser`] walks one response message token by token and turns it
//! into [`ResponseEvent`]s. Its state is explicit: it is either waiting for a
//! token with no result set open, or it holds the schema of an open table.
//! [`ParserState::next`] is the whole transition table and has no side
//! effects, so it can be tested on its own.
//!
//! ```text
//! AwaitingToken --COLMETADATA--> HaveSchema
//! AwaitingToken --COLMETADATA(no columns)--> AwaitingToken
//! HaveSchema    --ROW/NBCROW--> HaveSchema      (row appended)
//! HaveSchema    --COLMETADATA--> HaveSchema     (table emitted, new one opened)
//! any           --DONE*--> AwaitingToken        (open table emitted)
//! any           --ERROR/INFO/ENVCHANGE/other--> unchanged
//! AwaitingToken --ROW/NBCROW--> error
//! ```

use bytes::Bytes;
use sqlclient_types::{DecodeOptions, decode_row};
use tds_protocol::{ColMetaData, Done, EnvChange, Token, TokenParser, TokenType};

use crate::error::{Error, Result};
use crate::result::{ExecuteResult, MessageKind, ResultTable, ServerMessage};

/// Parser state between tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// No result set is open.
    #[default]
    AwaitingToken,
    /// Column metadata is in effect and a table is open.
    HaveSchema,
}

/// Token categories that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    /// COLMETADATA with at least one column.
    Schema,
    /// COLMETADATA announcing no metadata.
    EmptySchema,
    /// ROW or NBCROW.
    Row,
    /// DONE, DONEPROC or DONEINPROC.
    Done,
    /// Any other token.
    Other,
}

impl TokenClass {
    /// Classify a decoded token.
    #[must_use]
    pub fn of(token: &Token) -> Self {
        match token {
            Token::ColMetaData(meta) if meta.is_empty() => Self::EmptySchema,
            Token::ColMetaData(_) => Self::Schema,
            Token::Row(_) => Self::Row,
            Token::Done(_) | Token::DoneProc(_) | Token::DoneInProc(_) => Self::Done,
            _ => Self::Other,
        }
    }

    fn of_type(token_type: TokenType) -> Self {
        match token_type {
            TokenType::ColMetaData => Self::Schema,
            TokenType::Row | TokenType::NbcRow => Self::Row,
            TokenType::Done | TokenType::DoneProc | TokenType::DoneInProc => Self::Done,
            _ => Self::Other,
        }
    }
}

impl ParserState {
    /// State after a token of class `token`, or `None` if the token is not
    /// allowed here.
    #[must_use]
    pub fn next(self, token: TokenClass) -> Option<Self> {
        use ParserState::{AwaitingToken, HaveSchema};
        match (self, token) {
            (_, TokenClass::Schema) => Some(HaveSchema),
            (_, TokenClass::EmptySchema | TokenClass::Done) => Some(AwaitingToken),
            (HaveSchema, TokenClass::Row) => Some(HaveSchema),
            (AwaitingToken, TokenClass::Row) => None,
            (state, TokenClass::Other) => Some(state),
        }
    }
}

/// One observable step of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// A result table was closed.
    Table(ResultTable),
    /// An ERROR or INFO token.
    Message(ServerMessage),
    /// A session setting changed.
    EnvChange(EnvChange),
    /// A RETURNSTATUS token.
    ReturnStatus(i32),
    /// A DONE, DONEPROC or DONEINPROC token.
    Done(Done),
}

/// Streaming parser over one response message.
#[derive(Debug)]
pub struct ResponseParser {
    tokens: TokenParser,
    state: ParserState,
    schema: Option<ColMetaData>,
    table: Option<ResultTable>,
    options: DecodeOptions,
    pending: Option<ResponseEvent>,
}

impl ResponseParser {
    /// Parse `payload` with the given decoder settings.
    #[must_use]
    pub fn new(payload: Bytes, options: DecodeOptions) -> Self {
        Self {
            tokens: TokenParser::new(payload),
            state: ParserState::AwaitingToken,
            schema: None,
            table: None,
            options,
            pending: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Next event, or `None` when the message is exhausted.
    ///
    /// A table still open when the bytes run out is emitted as if a DONE had
    /// closed it.
    pub fn next_event(&mut self) -> Result<Option<ResponseEvent>> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }

        loop {
            if let Some(token_type) = self.tokens.peek_token_type() {
                let class = TokenClass::of_type(token_type);
                if self.state.next(class).is_none() {
                    self.table = None;
                    return Err(Error::Protocol(format!(
                        "{token_type:?} token without column metadata"
                    )));
                }
            }

            let token = match self.tokens.next_token_with_metadata(self.schema.as_ref()) {
                Ok(Some(token)) => token,
                Ok(None) => {
                    self.state = ParserState::AwaitingToken;
                    self.schema = None;
                    return Ok(self.table.take().map(ResponseEvent::Table));
                }
                Err(e) => {
                    self.table = None;
                    return Err(e.into());
                }
            };

            let class = TokenClass::of(&token);
            let next = self.state.next(class).ok_or_else(|| {
                Error::Protocol(format!("{:?} token without column metadata", token.token_type()))
            })?;
            tracing::debug!(
                token = ?token.token_type(),
                from = ?self.state,
                to = ?next,
                "token"
            );
            self.state = next;

            match token {
                Token::ColMetaData(meta) => {
                    let closed = self.table.take();
                    if meta.is_empty() {
                        self.schema = None;
                    } else {
                        let columns = meta.columns.clone();
                        self.table = Some(ResultTable::new(columns, self.options.charset));
                        self.schema = Some(meta);
                    }
                    if let Some(table) = closed {
                        return Ok(Some(ResponseEvent::Table(table)));
                    }
                }
                Token::Row(row) => {
                    let (Some(schema), Some(table)) = (self.schema.as_ref(), self.table.as_mut())
                    else {
                        return Err(Error::Protocol("row token without column metadata".into()));
                    };
                    match decode_row(&row, schema, &self.options) {
                        Ok(values) => table.push(values),
                        Err(e) => {
                            self.table = None;
                            return Err(e.into());
                        }
                    }
                }
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    self.schema = None;
                    let event = ResponseEvent::Done(done);
                    if let Some(mut table) = self.table.take() {
                        table.set_rows_affected(done.rows_affected());
                        self.pending = Some(event);
                        return Ok(Some(ResponseEvent::Table(table)));
                    }
                    return Ok(Some(event));
                }
                Token::Error(msg) => {
                    return Ok(Some(ResponseEvent::Message(ServerMessage::from_token(
                        MessageKind::Error,
                        msg,
                    ))));
                }
                Token::Info(msg) => {
                    return Ok(Some(ResponseEvent::Message(ServerMessage::from_token(
                        MessageKind::Info,
                        msg,
                    ))));
                }
                Token::EnvChange(change) => return Ok(Some(ResponseEvent::EnvChange(change))),
                Token::ReturnStatus(status) => return Ok(Some(ResponseEvent::ReturnStatus(status))),
                Token::Order(_) | Token::LoginAck(_) => {}
            }
        }
    }
}

/// Parse a whole response into tables and messages.
///
/// Unlike the executor this does not stop at errors: every table and every
/// message in the payload is collected. A decoding fault returns the
/// messages gathered before it inside the error.
pub fn parse_response(payload: Bytes, options: DecodeOptions) -> Result<ExecuteResult> {
    let mut parser = ResponseParser::new(payload, options);
    let mut result = ExecuteResult::default();
    loop {
        match parser.next_event() {
            Ok(Some(ResponseEvent::Table(table))) => result.tables.push(table),
            Ok(Some(ResponseEvent::Message(message))) => result.messages.push(message),
            Ok(Some(ResponseEvent::ReturnStatus(status))) => result.return_status = Some(status),
            Ok(Some(ResponseEvent::EnvChange(_) | ResponseEvent::Done(_))) => {}
            Ok(None) => return Ok(result),
            Err(e) => return Err(e.with_messages(result.messages)),
        }
    }
}

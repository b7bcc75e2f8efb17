//! Text form of [`MessageQuery`].
//!
//! ```text
//! query   := segment (("," | ";") segment)*
//! segment := field op value | ("skip" | "take") ["="] value
//! op      := "=" | ">" | "<"
//! ```
//!
//! Field names are case-insensitive. Whitespace around tokens is ignored.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use super::MessageQuery;
use crate::foundation::error::{QueryParseError, QueryResult};
use crate::foundation::message::{MessageKind, ProcessingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    Greater,
    Less,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '=' => Some(Self::Equal),
            '>' => Some(Self::Greater),
            '<' => Some(Self::Less),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Greater => ">",
            Self::Less => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Created,
    ContentType,
    ErrorType,
    Status,
    Kind,
    Duration,
    Skip,
    Take,
}

impl Field {
    fn lookup(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "id" => Some(Self::Id),
            "created" => Some(Self::Created),
            "contenttype" => Some(Self::ContentType),
            "errortype" => Some(Self::ErrorType),
            "status" => Some(Self::Status),
            "type" => Some(Self::Kind),
            "duration" => Some(Self::Duration),
            "skip" => Some(Self::Skip),
            "take" => Some(Self::Take),
            _ => None,
        }
    }

    /// Pagination fields take a bare value.
    fn is_bare(self) -> bool {
        matches!(self, Self::Skip | Self::Take)
    }

    fn accepts(self, op: Operator) -> bool {
        match self {
            Self::Created | Self::Duration => true,
            _ => op == Operator::Equal,
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Op(Operator),
    /// End of a `,`/`;` separated segment.
    End,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for segment in input.split([',', ';']) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        match segment.char_indices().find_map(|(i, c)| Operator::from_char(c).map(|op| (i, op))) {
            Some((index, op)) => {
                let (field, value) = (segment[..index].trim(), segment[index + 1..].trim());
                if !field.is_empty() {
                    tokens.push(Token::Word(field));
                }
                tokens.push(Token::Op(op));
                if !value.is_empty() {
                    tokens.push(Token::Word(value));
                }
            }
            // `skip 10` and `take 5` have no operator.
            None => match segment.split_once(char::is_whitespace) {
                Some((field, value)) => {
                    tokens.push(Token::Word(field));
                    tokens.push(Token::Word(value.trim()));
                }
                None => tokens.push(Token::Word(segment)),
            },
        }
        tokens.push(Token::End);
    }
    tokens
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum State<'a> {
    Field,
    Operation { field: Field, name: &'a str },
    Value { field: Field, name: &'a str, op: Operator },
    Done,
}

/// Parses a textual query.
///
/// # Example
///
/// ```rust,ignore
/// let query = parse("status=Completed; duration>100, take 10")?;
/// ```
pub fn parse(input: &str) -> QueryResult<MessageQuery> {
    let mut query = MessageQuery::new();
    let mut state = State::Field;

    for token in tokenize(input) {
        state = match (state, token) {
            (State::Field, Token::Word(name)) => {
                let field = Field::lookup(name)
                    .ok_or_else(|| QueryParseError::UnknownField(name.to_string()))?;
                if field.is_bare() {
                    State::Value {
                        field,
                        name,
                        op: Operator::Equal,
                    }
                } else {
                    State::Operation { field, name }
                }
            }
            (State::Field, Token::Op(op)) => {
                return Err(QueryParseError::UnexpectedToken(op.symbol().to_string()));
            }
            (State::Field | State::Done, Token::End) => State::Field,

            (State::Operation { field, name }, Token::Op(op)) => {
                if !field.accepts(op) {
                    return Err(QueryParseError::UnsupportedOperator {
                        field: name.to_string(),
                        operator: op.symbol().to_string(),
                    });
                }
                State::Value { field, name, op }
            }
            (State::Operation { name, .. }, Token::Word(word)) => {
                return Err(QueryParseError::UnsupportedOperator {
                    field: name.to_string(),
                    operator: word.to_string(),
                });
            }

            // An optional `=` between a pagination field and its value.
            (
                State::Value {
                    field,
                    name,
                    op: Operator::Equal,
                },
                Token::Op(Operator::Equal),
            ) if field.is_bare() => State::Value {
                field,
                name,
                op: Operator::Equal,
            },
            (State::Value { field, name, op }, Token::Word(value)) => {
                query = apply(query, field, name, op, value)?;
                State::Done
            }
            (State::Value { field, name, .. }, Token::Op(op)) if field.is_bare() => {
                return Err(QueryParseError::UnsupportedOperator {
                    field: name.to_string(),
                    operator: op.symbol().to_string(),
                });
            }
            (State::Operation { name, .. } | State::Value { name, .. }, Token::End) => {
                return Err(QueryParseError::MissingValue(name.to_string()));
            }

            (_, Token::Word(word)) => {
                return Err(QueryParseError::UnexpectedToken(word.to_string()));
            }
            (_, Token::Op(op)) => {
                return Err(QueryParseError::UnexpectedToken(op.symbol().to_string()));
            }
        };
    }

    Ok(query)
}

fn apply(
    query: MessageQuery,
    field: Field,
    name: &str,
    op: Operator,
    value: &str,
) -> QueryResult<MessageQuery> {
    let invalid = |reason: String| QueryParseError::InvalidValue {
        field: name.to_string(),
        value: value.to_string(),
        reason,
    };

    Ok(match field {
        Field::Id => query.with_id(Uuid::parse_str(value).map_err(|e| invalid(e.to_string()))?),
        Field::Created => {
            let at = parse_timestamp(value).ok_or_else(|| {
                invalid("expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' or 'YYYY-MM-DD'".into())
            })?;
            match op {
                Operator::Equal => query.created_at(at),
                Operator::Greater => query.created_after(at),
                Operator::Less => query.created_before(at),
            }
        }
        Field::ContentType => query.with_content_type(value),
        Field::ErrorType => query.with_error_type(value),
        Field::Status => query.with_status(
            ProcessingStatus::from_str(value).map_err(|_| invalid("unknown status".into()))?,
        ),
        Field::Kind => query.with_kind(
            MessageKind::from_str(value).map_err(|_| invalid("unknown message type".into()))?,
        ),
        Field::Duration => {
            let ms: u64 = value.parse().map_err(|e| invalid(format!("{e}")))?;
            match op {
                Operator::Equal => query.duration_equal(ms),
                Operator::Greater => query.duration_above(ms),
                Operator::Less => query.duration_below(ms),
            }
        }
        Field::Skip => query.skip(value.parse().map_err(|e| invalid(format!("{e}")))?),
        Field::Take => query.take(value.parse().map_err(|e| invalid(format!("{e}")))?),
    })
}

/// Parses a UTC timestamp in one of the accepted layouts.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

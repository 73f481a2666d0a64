//! Text command protocol.
//!
//! Each input line is `[timestamp] command -k value -k value ...`, where every
//! key is a single lowercase letter. Lists inside a value are separated by
//! `|`, and `_` stands for an empty list.
//!
//! Parsing only checks shape and types. Whether a request makes sense is up to
//! the services.

use std::str::FromStr;

use crate::service::{NewTrain, NewUser, ProfileUpdate, Purchase, SortKey, TicketQuery};
use crate::types::{Date, FixedStr, StationName, Text, TrainId, UserName};

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddUser(NewUser),
    Login {
        username: UserName,
        password: Text,
    },
    Logout {
        username: UserName,
    },
    QueryProfile {
        operator: UserName,
        username: UserName,
    },
    ModifyProfile {
        operator: UserName,
        username: UserName,
        update: ProfileUpdate,
    },
    AddTrain(NewTrain),
    DeleteTrain {
        id: TrainId,
    },
    ReleaseTrain {
        id: TrainId,
    },
    QueryTrain {
        id: TrainId,
        date: Date,
    },
    QueryTicket(TicketQuery),
    QueryTransfer(TicketQuery),
    BuyTicket(Purchase),
    QueryOrder {
        username: UserName,
    },
    RefundTicket {
        username: UserName,
        nth: u32,
    },
    /// Drop all data.
    Clean,
    Exit,
}

/// Split the leading `[timestamp]` off a line.
///
/// Returns `None` for the timestamp if the line does not start with one.
#[must_use]
pub fn split_timestamp(line: &str) -> (Option<&str>, &str) {
    let line = line.trim();
    match line.split_once(' ') {
        Some((first, rest)) if first.starts_with('[') && first.ends_with(']') => (Some(first), rest),
        None if line.starts_with('[') && line.ends_with(']') => (Some(line), ""),
        _ => (None, line),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let name = tokens.next().ok_or(CommandError::Empty)?;
        let args = Args::parse(tokens)?;

        let command = match name {
            "add_user" => Self::AddUser(NewUser {
                operator: args.optional('c').map(UserName::from),
                username: args.text('u')?,
                password: args.text('p')?,
                name: args.text('n')?,
                mail: args.text('m')?,
                privilege: args.value('g')?,
            }),
            "login" => Self::Login {
                username: args.text('u')?,
                password: args.text('p')?,
            },
            "logout" => Self::Logout {
                username: args.text('u')?,
            },
            "query_profile" => Self::QueryProfile {
                operator: args.text('c')?,
                username: args.text('u')?,
            },
            "modify_profile" => Self::ModifyProfile {
                operator: args.text('c')?,
                username: args.text('u')?,
                update: ProfileUpdate {
                    password: args.optional('p').map(FixedStr::from),
                    name: args.optional('n').map(FixedStr::from),
                    mail: args.optional('m').map(FixedStr::from),
                    privilege: args.optional_value('g')?,
                },
            },
            "add_train" => Self::AddTrain(NewTrain {
                id: args.text('i')?,
                station_count: args.value('n')?,
                seat_count: args.value('m')?,
                stations: args.list::<String>('s')?.iter().map(|s| StationName::from(s.as_str())).collect(),
                prices: args.list('p')?,
                start_time: args.value('x')?,
                travel_times: args.list('t')?,
                stopover_times: args.list('o')?,
                sale_start: args.pair('d')?.0,
                sale_end: args.pair('d')?.1,
                kind: args.kind('y')?,
            }),
            "delete_train" => Self::DeleteTrain { id: args.text('i')? },
            "release_train" => Self::ReleaseTrain { id: args.text('i')? },
            "query_train" => Self::QueryTrain {
                id: args.text('i')?,
                date: args.value('d')?,
            },
            "query_ticket" => Self::QueryTicket(args.ticket_query()?),
            "query_transfer" => Self::QueryTransfer(args.ticket_query()?),
            "buy_ticket" => Self::BuyTicket(Purchase {
                username: args.text('u')?,
                train: args.text('i')?,
                date: args.value('d')?,
                from: args.text('f')?,
                to: args.text('t')?,
                count: args.value('n')?,
                queue: args.optional_value('q')?.unwrap_or(false),
            }),
            "query_order" => Self::QueryOrder {
                username: args.text('u')?,
            },
            "refund_ticket" => Self::RefundTicket {
                username: args.text('u')?,
                nth: args.optional_value('n')?.unwrap_or(1),
            },
            "clean" | "clear" => Self::Clean,
            "exit" => Self::Exit,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// `-k value` arguments of one command, by key letter.
struct Args<'a> {
    values: [Option<&'a str>; 26],
}

impl<'a> Args<'a> {
    fn parse(mut tokens: impl Iterator<Item = &'a str>) -> Result<Self, CommandError> {
        let mut values = [None; 26];
        while let Some(flag) = tokens.next() {
            let key = match flag.as_bytes() {
                [b'-', key @ b'a'..=b'z'] => *key,
                _ => return Err(CommandError::MalformedFlag(flag.to_string())),
            };
            let slot = &mut values[usize::from(key - b'a')];
            if slot.is_some() {
                return Err(CommandError::DuplicateFlag(char::from(key)));
            }
            *slot = Some(tokens.next().ok_or_else(|| CommandError::MissingValue(char::from(key)))?);
        }
        Ok(Self { values })
    }

    fn optional(&self, key: char) -> Option<&'a str> {
        let index = u32::from(key).checked_sub(u32::from('a'))?;
        self.values.get(usize::try_from(index).ok()?).copied().flatten()
    }

    fn required(&self, key: char) -> Result<&'a str, CommandError> {
        self.optional(key).ok_or(CommandError::MissingArgument(key))
    }

    fn text<const N: usize>(&self, key: char) -> Result<FixedStr<N>, CommandError> {
        self.required(key).map(FixedStr::from)
    }

    fn value<T: FromStr>(&self, key: char) -> Result<T, CommandError> {
        let raw = self.required(key)?;
        raw.parse().map_err(|_| CommandError::invalid(key, raw))
    }

    fn optional_value<T: FromStr>(&self, key: char) -> Result<Option<T>, CommandError> {
        self.optional(key)
            .map(|raw| raw.parse().map_err(|_| CommandError::invalid(key, raw)))
            .transpose()
    }

    /// A `|`-separated list, `_` for none.
    fn list<T: FromStr>(&self, key: char) -> Result<Vec<T>, CommandError> {
        let raw = self.required(key)?;
        if raw == "_" {
            return Ok(Vec::new());
        }
        raw.split('|')
            .map(|item| item.parse().map_err(|_| CommandError::invalid(key, raw)))
            .collect()
    }

    /// Exactly two `|`-separated values.
    fn pair<T: FromStr + Copy>(&self, key: char) -> Result<(T, T), CommandError> {
        match self.list::<T>(key)?.as_slice() {
            [a, b] => Ok((*a, *b)),
            _ => Err(CommandError::invalid(key, self.required(key)?)),
        }
    }

    /// A single ASCII letter.
    fn kind(&self, key: char) -> Result<u8, CommandError> {
        let raw = self.required(key)?;
        match raw.as_bytes() {
            [kind] if kind.is_ascii_alphabetic() => Ok(*kind),
            _ => Err(CommandError::invalid(key, raw)),
        }
    }

    fn ticket_query(&self) -> Result<TicketQuery, CommandError> {
        let sort = match self.optional('p') {
            None | Some("time") => SortKey::Time,
            Some("cost") => SortKey::Cost,
            Some(other) => return Err(CommandError::invalid('p', other)),
        };
        Ok(TicketQuery {
            from: self.text('s')?,
            to: self.text('t')?,
            date: self.value('d')?,
            sort,
        })
    }
}

/// Errors for lines that do not form a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing after the timestamp.
    Empty,
    UnknownCommand(String),
    /// A token in key position is not `-` plus a lowercase letter.
    MalformedFlag(String),
    /// A key is the last token of the line.
    MissingValue(char),
    DuplicateFlag(char),
    /// A required key is absent.
    MissingArgument(char),
    /// A value does not parse as the key's type.
    InvalidArgument { key: char, value: String },
}

impl CommandError {
    fn invalid(key: char, value: &str) -> Self {
        Self::InvalidArgument {
            key,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::UnknownCommand(name) => write!(f, "unknown command: {name}"),
            Self::MalformedFlag(token) => write!(f, "malformed flag: {token:?}"),
            Self::MissingValue(key) => write!(f, "missing value for -{key}"),
            Self::DuplicateFlag(key) => write!(f, "duplicate flag -{key}"),
            Self::MissingArgument(key) => write!(f, "missing required argument -{key}"),
            Self::InvalidArgument { key, value } => write!(f, "invalid value for -{key}: {value:?}"),
        }
    }
}

impl std::error::Error for CommandError {}

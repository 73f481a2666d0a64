//! User accounts and login sessions.
//!
//! Accounts are never deleted, so a user's record position is stable and
//! doubles as the user's key in the order index. Sessions are kept in memory
//! only and vanish on restart.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::service::{Rejection, ServiceResult, open_tree};
use crate::storage::btree::BPlusTree;
use crate::storage::codec::{CodecError, FixedCodec, read_i32, write_i32};
use crate::storage::RecordFile;
use crate::types::{Text, UserName};

/// Privilege granted to the very first account.
pub const ROOT_PRIVILEGE: i32 = 10;

/// A stored account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct User {
    pub username: UserName,
    pub password: Text,
    pub name: Text,
    pub mail: Text,
    pub privilege: i32,
}

mod offsets {
    pub const USERNAME: usize = 0;
    pub const PASSWORD: usize = 24;
    pub const NAME: usize = 56;
    pub const MAIL: usize = 88;
    pub const PRIVILEGE: usize = 120;
    pub const END: usize = 124;
}

impl FixedCodec for User {
    const WIDTH: usize = offsets::END;

    fn encode(&self, buf: &mut [u8]) {
        self.username.encode(&mut buf[offsets::USERNAME..]);
        self.password.encode(&mut buf[offsets::PASSWORD..]);
        self.name.encode(&mut buf[offsets::NAME..]);
        self.mail.encode(&mut buf[offsets::MAIL..]);
        write_i32(buf, offsets::PRIVILEGE, self.privilege);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            username: UserName::decode(&buf[offsets::USERNAME..])?,
            password: Text::decode(&buf[offsets::PASSWORD..])?,
            name: Text::decode(&buf[offsets::NAME..])?,
            mail: Text::decode(&buf[offsets::MAIL..])?,
            privilege: read_i32(buf, offsets::PRIVILEGE),
        })
    }
}

/// Profile line: `username name mail privilege`.
impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.username, self.name, self.mail, self.privilege)
    }
}

/// Request to create an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Logged-in user creating the account. Ignored for the first account.
    pub operator: Option<UserName>,
    pub username: UserName,
    pub password: Text,
    pub name: Text,
    pub mail: Text,
    pub privilege: i32,
}

/// Fields to change in a profile; `None` keeps the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    pub password: Option<Text>,
    pub name: Option<Text>,
    pub mail: Option<Text>,
    pub privilege: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    privilege: i32,
    pos: u32,
}

/// Account storage plus the set of logged-in users.
pub struct UserService {
    index: BPlusTree<UserName, u32>,
    data: RecordFile<User>,
    sessions: BTreeMap<UserName, Session>,
}

impl UserService {
    pub fn open(dir: &Path, order: Option<usize>) -> ServiceResult<Self> {
        Ok(Self {
            index: open_tree(dir, "UserIndex.dat", order)?,
            data: RecordFile::open(&dir.join("UserData.dat"))?,
            sessions: BTreeMap::new(),
        })
    }

    /// Number of accounts ever created.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Record position of a logged-in user.
    pub fn session_pos(&self, username: &UserName) -> ServiceResult<u32> {
        self.sessions
            .get(username)
            .map(|s| s.pos)
            .ok_or_else(|| Rejection::NotLoggedIn.into())
    }

    pub fn add_user(&mut self, request: &NewUser) -> ServiceResult<()> {
        let privilege = if self.data.is_empty() {
            ROOT_PRIVILEGE
        } else {
            let operator = request.operator.ok_or(Rejection::NotLoggedIn)?;
            let session = self.session(&operator)?;
            if session.privilege <= request.privilege {
                return Err(Rejection::InsufficientPrivilege.into());
            }
            if self.lookup(&request.username)?.is_some() {
                return Err(Rejection::DuplicateUser.into());
            }
            request.privilege
        };

        let user = User {
            username: request.username,
            password: request.password,
            name: request.name,
            mail: request.mail,
            privilege,
        };
        let pos = self.data.push(&user)?;
        self.index.insert(user.username, pos)?;
        tracing::debug!(user = %user.username, pos, privilege, "added user");
        Ok(())
    }

    pub fn login(&mut self, username: &UserName, password: &Text) -> ServiceResult<()> {
        let pos = self.lookup(username)?.ok_or(Rejection::UnknownUser)?;
        if self.sessions.contains_key(username) {
            return Err(Rejection::AlreadyLoggedIn.into());
        }
        let user = self.data.read(pos)?;
        if user.password != *password {
            return Err(Rejection::WrongPassword.into());
        }
        self.sessions.insert(
            *username,
            Session {
                privilege: user.privilege,
                pos,
            },
        );
        Ok(())
    }

    pub fn logout(&mut self, username: &UserName) -> ServiceResult<()> {
        self.sessions
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| Rejection::NotLoggedIn.into())
    }

    pub fn query_profile(&mut self, operator: &UserName, username: &UserName) -> ServiceResult<User> {
        let (_, user) = self.accessible(operator, username)?;
        Ok(user)
    }

    /// Apply `update` to `username`'s profile and return the new profile.
    ///
    /// The operator must be the user or outrank them, and can only hand out
    /// privileges below their own.
    pub fn modify_profile(
        &mut self,
        operator: &UserName,
        username: &UserName,
        update: &ProfileUpdate,
    ) -> ServiceResult<User> {
        let (pos, mut user) = self.accessible(operator, username)?;
        if let Some(privilege) = update.privilege
            && privilege >= self.session(operator)?.privilege
        {
            return Err(Rejection::InsufficientPrivilege.into());
        }

        if let Some(password) = update.password {
            user.password = password;
        }
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(mail) = update.mail {
            user.mail = mail;
        }
        if let Some(privilege) = update.privilege {
            user.privilege = privilege;
            if let Some(session) = self.sessions.get_mut(username) {
                session.privilege = privilege;
            }
        }
        self.data.write(pos, &user)?;
        Ok(user)
    }

    /// Drop every account and session.
    pub fn clear(&mut self) -> ServiceResult<()> {
        self.sessions.clear();
        self.index.clear()?;
        self.data.clear()?;
        Ok(())
    }

    pub fn flush(&mut self) -> ServiceResult<()> {
        self.index.flush()?;
        self.data.flush()?;
        Ok(())
    }

    fn session(&self, username: &UserName) -> ServiceResult<Session> {
        self.sessions
            .get(username)
            .copied()
            .ok_or_else(|| Rejection::NotLoggedIn.into())
    }

    fn lookup(&mut self, username: &UserName) -> ServiceResult<Option<u32>> {
        Ok(self.index.find(username)?.first().copied())
    }

    /// Resolve `username` for a profile operation by `operator`.
    fn accessible(&mut self, operator: &UserName, username: &UserName) -> ServiceResult<(u32, User)> {
        let session = self.session(operator)?;
        if operator == username {
            return Ok((session.pos, self.data.read(session.pos)?));
        }
        let pos = self.lookup(username)?.ok_or(Rejection::UnknownUser)?;
        let user = self.data.read(pos)?;
        if session.privilege <= user.privilege {
            return Err(Rejection::InsufficientPrivilege.into());
        }
        Ok((pos, user))
    }
}

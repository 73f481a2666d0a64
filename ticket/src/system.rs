//! The ticket system: command dispatch over the three services.

use std::io::{BufRead, Write};

use crate::command::{self, Command};
use crate::config::EngineConfig;
use crate::service::{ServiceError, ServiceResult, TicketService, TrainService, UserService};

/// What to do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Print the line and read the next command.
    Continue(String),
    /// Print the line and stop.
    Exit(String),
}

impl Flow {
    /// The output line.
    #[must_use]
    pub fn line(&self) -> &str {
        match self {
            Self::Continue(line) | Self::Exit(line) => line,
        }
    }
}

/// All persistent state, opened from one data directory.
pub struct TicketSystem {
    users: UserService,
    trains: TrainService,
    tickets: TicketService,
}

impl TicketSystem {
    /// Open or create every data file in `config.data_directory`.
    ///
    /// The directory must exist.
    pub fn open(config: &EngineConfig) -> Result<Self, SystemError> {
        let dir = config.data_directory.as_path();
        let system = Self {
            users: UserService::open(dir, config.tree_order)?,
            trains: TrainService::open(dir, config.tree_order)?,
            tickets: TicketService::open(dir, config.tree_order)?,
        };
        tracing::info!(
            data_directory = %dir.display(),
            users = system.users.len(),
            trains = system.trains.len(),
            orders = system.tickets.len(),
            "opened ticket system"
        );
        Ok(system)
    }

    /// Run one input line.
    ///
    /// Malformed lines and refused requests answer `-1`. Only storage
    /// failures are returned as errors.
    pub fn execute(&mut self, line: &str) -> Result<Flow, SystemError> {
        let (timestamp, rest) = command::split_timestamp(line);
        let respond = |body: &str| match timestamp {
            Some(timestamp) => format!("{timestamp} {body}"),
            None => body.to_string(),
        };

        let command = match rest.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(line = rest, "malformed command: {e}");
                return Ok(Flow::Continue(respond("-1")));
            }
        };

        if command == Command::Exit {
            self.flush()?;
            return Ok(Flow::Exit(respond("bye")));
        }

        match self.dispatch(&command) {
            Ok(body) => Ok(Flow::Continue(respond(&body))),
            Err(ServiceError::Rejected(reason)) => {
                tracing::debug!(line = rest, "rejected: {reason}");
                Ok(Flow::Continue(respond("-1")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn dispatch(&mut self, command: &Command) -> ServiceResult<String> {
        const OK: &str = "0";

        let body = match command {
            Command::AddUser(request) => {
                self.users.add_user(request)?;
                OK.to_string()
            }
            Command::Login { username, password } => {
                self.users.login(username, password)?;
                OK.to_string()
            }
            Command::Logout { username } => {
                self.users.logout(username)?;
                OK.to_string()
            }
            Command::QueryProfile { operator, username } => {
                self.users.query_profile(operator, username)?.to_string()
            }
            Command::ModifyProfile {
                operator,
                username,
                update,
            } => self.users.modify_profile(operator, username, update)?.to_string(),
            Command::AddTrain(request) => {
                self.trains.add_train(request)?;
                OK.to_string()
            }
            Command::DeleteTrain { id } => {
                self.trains.delete_train(id)?;
                OK.to_string()
            }
            Command::ReleaseTrain { id } => {
                self.trains.release_train(id)?;
                OK.to_string()
            }
            Command::QueryTrain { id, date } => self.trains.query_train(id, *date)?,
            Command::QueryTicket(query) => TicketService::query_ticket(&mut self.trains, query)?,
            Command::QueryTransfer(query) => TicketService::query_transfer(&mut self.trains, query)?,
            Command::BuyTicket(purchase) => self.tickets.buy_ticket(&self.users, &mut self.trains, purchase)?,
            Command::QueryOrder { username } => self.tickets.query_order(&self.users, username)?,
            Command::RefundTicket { username, nth } => {
                self.tickets
                    .refund_ticket(&self.users, &mut self.trains, username, *nth)?;
                OK.to_string()
            }
            Command::Clean => {
                self.users.clear()?;
                self.trains.clear()?;
                self.tickets.clear()?;
                tracing::debug!("cleared all data");
                OK.to_string()
            }
            Command::Exit => "bye".to_string(),
        };
        Ok(body)
    }

    /// Read commands from `input` until `exit` or end of input, writing one
    /// response per command to `output`.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<(), SystemError> {
        for line in input.lines() {
            let line = line.map_err(SystemError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            let flow = self.execute(&line)?;
            writeln!(output, "{}", flow.line()).map_err(SystemError::Io)?;
            if matches!(flow, Flow::Exit(_)) {
                break;
            }
        }
        output.flush().map_err(SystemError::Io)?;
        self.flush()
    }

    /// Write every tree header and record count to disk.
    pub fn flush(&mut self) -> Result<(), SystemError> {
        self.users.flush()?;
        self.trains.flush()?;
        self.tickets.flush()?;
        Ok(())
    }
}

/// Fatal errors of the ticket system.
#[derive(Debug)]
pub enum SystemError {
    /// A storage failure inside a service.
    Service(ServiceError),
    /// Reading commands or writing responses failed.
    Io(std::io::Error),
}

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service(e) => write!(f, "service error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for SystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<ServiceError> for SystemError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            data_directory: dir.to_path_buf(),
            tree_order: Some(4),
        }
    }

    fn run_script(system: &mut TicketSystem, script: &str) -> String {
        let mut output = Vec::new();
        system.run(script.as_bytes(), &mut output).expect("run");
        String::from_utf8(output).expect("utf8")
    }

    const SETUP: &str = "\
[1] add_user -c nobody -u root -p rootpw -n Root -m root@x.org -g 3
[2] login -u root -p rootpw
[3] add_user -c root -u bob -p bobpw -n Bob -m bob@x.org -g 5
[4] add_train -i G1 -n 3 -m 5 -s A|B|C -p 50|70 -x 08:00 -t 120|180 -o 10 -d 06-01|06-03 -y G
[5] release_train -i G1
";

    #[test]
    fn test_user_session_flow() {
        let dir = tempdir().expect("tempdir");
        let mut system = TicketSystem::open(&config(dir.path())).expect("open");

        let out = run_script(
            &mut system,
            "\
[1] add_user -c nobody -u root -p rootpw -n Root -m root@x.org -g 3
[2] login -u root -p wrong
[3] login -u root -p rootpw
[4] login -u root -p rootpw
[5] query_profile -c root -u root
[6] add_user -c root -u bob -p bobpw -n Bob -m bob@x.org -g 10
[7] add_user -c root -u bob -p bobpw -n Bob -m bob@x.org -g 5
[8] modify_profile -c root -u bob -n Robert
[9] logout -u root
[10] logout -u root
[11] exit
",
        );
        assert_eq!(
            out,
            "\
[1] 0
[2] -1
[3] 0
[4] -1
[5] root Root root@x.org 10
[6] -1
[7] 0
[8] bob Robert bob@x.org 5
[9] 0
[10] -1
[11] bye
"
        );
    }

    #[test]
    fn test_train_and_ticket_flow() {
        let dir = tempdir().expect("tempdir");
        let mut system = TicketSystem::open(&config(dir.path())).expect("open");
        run_script(&mut system, SETUP);

        let flow = system.execute("[6] query_train -i G1 -d 06-02").expect("query_train");
        assert_eq!(
            flow.line(),
            "\
[6] G1 G
A xx-xx xx:xx -> 06-02 08:00 0 5
B 06-02 10:00 -> 06-02 10:10 50 5
C 06-02 13:10 -> xx-xx xx:xx 120 x"
        );

        let flow = system.execute("[7] buy_ticket -u root -i G1 -d 06-02 -n 2 -f A -t C").expect("buy");
        assert_eq!(flow, Flow::Continue("[7] 240".to_string()));

        let flow = system.execute("[8] query_ticket -s A -t C -d 06-02").expect("query_ticket");
        assert_eq!(flow.line(), "[8] 1\nG1 A 06-02 08:00 -> C 06-02 13:10 120 3");

        let flow = system
            .execute("[9] buy_ticket -u root -i G1 -d 06-02 -n 4 -f A -t B -q true")
            .expect("queue");
        assert_eq!(flow.line(), "[9] queue");

        let flow = system.execute("[10] refund_ticket -u root -n 2").expect("refund");
        assert_eq!(flow.line(), "[10] 0");

        let flow = system.execute("[11] query_order -u root").expect("query_order");
        assert_eq!(
            flow.line(),
            "\
[11] 2
[success] G1 A 06-02 08:00 -> B 06-02 10:00 50 4
[refunded] G1 A 06-02 08:00 -> C 06-02 13:10 120 2"
        );
    }

    #[test]
    fn test_malformed_lines_answer_minus_one() {
        let dir = tempdir().expect("tempdir");
        let mut system = TicketSystem::open(&config(dir.path())).expect("open");

        let out = run_script(
            &mut system,
            "\
[1] fly -u a
[2] login -u a
[3] query_train -i G1 -d 13-40
[4] exit
[5] login -u a -p b
",
        );
        assert_eq!(out, "[1] -1\n[2] -1\n[3] -1\n[4] bye\n");
    }

    #[test]
    fn test_clean_resets_everything() {
        let dir = tempdir().expect("tempdir");
        let mut system = TicketSystem::open(&config(dir.path())).expect("open");
        run_script(&mut system, SETUP);

        assert_eq!(system.execute("[6] clean").expect("clean").line(), "[6] 0");
        assert_eq!(
            system.execute("[7] query_train -i G1 -d 06-02").expect("query").line(),
            "[7] -1"
        );
        // The next account is the first one again, so no session is needed.
        assert_eq!(
            system
                .execute("[8] add_user -c x -u amy -p pw -n Amy -m amy@x.org -g 1")
                .expect("add_user")
                .line(),
            "[8] 0"
        );
        assert_eq!(system.execute("[9] login -u root -p rootpw").expect("login").line(), "[9] -1");
    }

    #[test]
    fn test_data_survives_restart() {
        let dir = tempdir().expect("tempdir");
        {
            let mut system = TicketSystem::open(&config(dir.path())).expect("open");
            run_script(&mut system, SETUP);
            system.execute("[6] buy_ticket -u root -i G1 -d 06-01 -n 1 -f B -t C").expect("buy");
            system.execute("[7] exit").expect("exit");
        }

        let mut system = TicketSystem::open(&config(dir.path())).expect("reopen");
        // Sessions are not persisted.
        assert_eq!(system.execute("[8] query_order -u root").expect("query").line(), "[8] -1");
        system.execute("[9] login -u root -p rootpw").expect("login");
        assert_eq!(
            system.execute("[10] query_order -u root").expect("query").line(),
            "[10] 1\n[success] G1 B 06-01 10:10 -> C 06-01 13:10 70 1"
        );
        assert_eq!(
            system.execute("[11] query_ticket -s B -t C -d 06-01").expect("query").line(),
            "[11] 1\nG1 B 06-01 10:10 -> C 06-01 13:10 70 4"
        );
    }
}

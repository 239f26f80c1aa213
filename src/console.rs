//! Console — stdin/stdout command loop over the engine, query and log facades.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::engine::Engine;
use crate::error::Result;
use crate::logs::LogStore;
use crate::query::ResultQuery;
use crate::shell::ShellCommand;

const HELP: &str = "\
commands:
  run [timeout_ms] <shell command>   start a command as an operation
  get <id>                           current state of an operation
  cancel <id>                        request cancellation
  join <id>                          wait for an operation to settle
  list                               all operations, newest first
  log <name> <json>                  append an entry to a named log
  logs <name> [limit]                read a named log
  entry <id>                         read one log entry
  drop <name>                        delete a named log
  quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Run {
        timeout_ms: Option<u64>,
        command: String,
    },
    Get(String),
    Cancel(String),
    Join(String),
    List,
    Log {
        name: String,
        data: Value,
    },
    Logs {
        name: String,
        limit: usize,
    },
    Entry(String),
    Drop(String),
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let id = |what: &str| {
            if rest.is_empty() {
                Err(format!("usage: {verb} <{what}>"))
            } else {
                Ok(rest.to_string())
            }
        };

        match verb {
            "run" => {
                let (timeout_ms, command) = match rest.split_once(char::is_whitespace) {
                    Some((first, tail)) => match first.parse::<u64>() {
                        Ok(ms) => (Some(ms), tail.trim()),
                        Err(_) => (None, rest),
                    },
                    None => (None, rest),
                };
                if command.is_empty() {
                    return Err("usage: run [timeout_ms] <shell command>".to_string());
                }
                Ok(Self::Run {
                    timeout_ms,
                    command: command.to_string(),
                })
            }
            "get" => id("id").map(Self::Get),
            "cancel" => id("id").map(Self::Cancel),
            "join" => id("id").map(Self::Join),
            "list" => Ok(Self::List),
            "log" => {
                let Some((name, json)) = rest.split_once(char::is_whitespace) else {
                    return Err("usage: log <name> <json>".to_string());
                };
                let data = serde_json::from_str(json.trim()).map_err(|e| format!("invalid json: {e}"))?;
                Ok(Self::Log {
                    name: name.to_string(),
                    data,
                })
            }
            "logs" => {
                let mut parts = rest.split_whitespace();
                let Some(name) = parts.next() else {
                    return Err("usage: logs <name> [limit]".to_string());
                };
                let limit = match parts.next() {
                    Some(n) => n.parse().map_err(|_| format!("invalid limit: {n}"))?,
                    None => 0,
                };
                Ok(Self::Logs {
                    name: name.to_string(),
                    limit,
                })
            }
            "entry" => id("entry id").map(Self::Entry),
            "drop" => id("name").map(Self::Drop),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "/quit" => Ok(Self::Quit),
            other => Err(format!("unknown command: {other} (try 'help')")),
        }
    }
}

/// Interactive front end over a shared engine.
pub struct Console {
    engine: Arc<Engine>,
    query: ResultQuery,
    logs: LogStore,
}

impl Console {
    pub fn new(engine: Arc<Engine>) -> Self {
        let store = Arc::clone(engine.store());
        let limit = engine.config().default_log_limit;
        Self {
            query: ResultQuery::new(Arc::clone(&store), limit),
            logs: LogStore::new(store, limit),
            engine,
        }
    }

    /// Execute one command and render its output. `None` means quit.
    pub async fn handle(&self, command: ConsoleCommand) -> Result<Option<String>> {
        let config = self.engine.config();
        let out = match command {
            ConsoleCommand::Run {
                timeout_ms,
                command,
            } => {
                let wait = config.effective_timeout(timeout_ms);
                let snap = self.engine.execute(ShellCommand::new(command), Some(wait)).await?;
                pretty(&snap)
            }
            ConsoleCommand::Get(id) => pretty(&self.query.get_result(&id).await?),
            ConsoleCommand::Cancel(id) => pretty(&self.engine.cancel(&id).await?),
            ConsoleCommand::Join(id) => pretty(&self.engine.join(&id, config.max_timeout).await?),
            ConsoleCommand::List => pretty(&self.query.list_operations().await?),
            ConsoleCommand::Log { name, data } => {
                let id = self.logs.append(&name, &data).await?;
                format!("appended {id}")
            }
            ConsoleCommand::Logs { name, limit } => {
                pretty(&self.query.get_logs_by_name(&name, limit).await?)
            }
            ConsoleCommand::Entry(id) => match self.logs.get_entry(&id).await? {
                Some(entry) => pretty(&entry),
                None => format!("no log entry {id}"),
            },
            ConsoleCommand::Drop(name) => {
                let removed = self.logs.delete(&name).await?;
                format!("deleted {removed} entries from {name}")
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Ok(None),
        };
        Ok(Some(out))
    }

    /// Read commands from stdin until EOF or `quit`.
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        eprint!("> ");
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Error reading stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                eprint!("> ");
                continue;
            }

            match ConsoleCommand::parse(&line) {
                Ok(command) => match self.handle(command).await {
                    Ok(Some(out)) => println!("{out}"),
                    Ok(None) => break,
                    Err(e) => eprintln!("error: {e}"),
                },
                Err(usage) => eprintln!("{usage}"),
            }
            eprint!("> ");
        }
        Ok(())
    }
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

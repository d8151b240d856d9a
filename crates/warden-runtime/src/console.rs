//! Line commands read from stdin while `warden run` is supervising.

use std::str::FromStr;

use thiserror::Error;
use warden_core::ActivitySignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, token: String },
    /// Log out from the app (not from the warning prompt).
    SignOut { reason: String },
    Navigate { path: String },
    Activity(ActivitySignal),
    /// Warning prompt: stay signed in.
    Extend,
    /// Warning prompt: log out now.
    Logout,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}` (type `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown activity signal `{0}`")]
    Signal(String),
}

pub const HELP: &str = "\
commands:
  login <user> <token>   sign in (publishes login-succeeded)
  signout [reason]       log out from the app
  nav <path>             navigate to a route
  activity [signal]      user interaction (mouse_move by default)
  mouse_down | mouse_move | key_press | scroll | touch_start | click
  extend                 answer the warning: stay signed in
  logout                 answer the warning: log out
  status                 print the session status as JSON
  help                   show this text
  quit                   stop supervising and exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "login" => match rest.as_slice() {
            [username, token] => Command::Login {
                username: (*username).to_string(),
                token: (*token).to_string(),
            },
            [username, "Bearer", token] | [username, "bearer", token] => Command::Login {
                username: (*username).to_string(),
                token: format!("Bearer {token}"),
            },
            _ => return Err(CommandError::Usage("login <user> <token>")),
        },
        "signout" | "sign-out" => Command::SignOut {
            reason: if rest.is_empty() {
                "User logout".to_string()
            } else {
                rest.join(" ")
            },
        },
        "nav" | "navigate" | "go" => match rest.as_slice() {
            [path] => Command::Navigate {
                path: normalize_path(path),
            },
            _ => return Err(CommandError::Usage("nav <path>")),
        },
        "activity" => match rest.as_slice() {
            [] => Command::Activity(ActivitySignal::MouseMove),
            [signal] => Command::Activity(signal_from(signal)?),
            _ => return Err(CommandError::Usage("activity [signal]")),
        },
        "extend" => Command::Extend,
        "logout" => Command::Logout,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => match ActivitySignal::from_str(other) {
            Ok(signal) => Command::Activity(signal),
            Err(_) => return Err(CommandError::Unknown(head.to_string())),
        },
    };
    Ok(Some(command))
}

fn signal_from(word: &str) -> Result<ActivitySignal, CommandError> {
    ActivitySignal::from_str(word).map_err(|_| CommandError::Signal(word.to_string()))
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

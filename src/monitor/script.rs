//! Reaction script execution
//!
//! On a subscribed state change the monitor spawns the configured command
//! with placeholder tokens substituted into its arguments. Execution is
//! bounded by the configured timeout; a child that overruns it is killed.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script command is empty")]
    Empty,
    #[error("Unterminated quote in script command")]
    UnterminatedQuote,
    #[error("Failed to spawn script: {0}")]
    Spawn(std::io::Error),
    #[error("Script exceeded its timeout and was killed")]
    Timeout,
    #[error("Script returned {0}")]
    Exit(i32),
    #[error("Script was terminated by a signal")]
    Killed,
}

/// Split a command template into argv, honoring single and double quotes.
pub fn tokenize(template: &str) -> Result<Vec<String>, ScriptError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ScriptError::UnterminatedQuote);
    }
    if in_token {
        args.push(current);
    }
    if args.is_empty() {
        return Err(ScriptError::Empty);
    }
    Ok(args)
}

/// Replace every occurrence of each placeholder in each argument.
pub fn substitute(args: &[String], vars: &[(&str, String)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let mut out = arg.clone();
            for (token, value) in vars {
                if out.contains(token) {
                    out = out.replace(token, value);
                }
            }
            out
        })
        .collect()
}

/// The executed command line as one string, for the post-run log. Empty
/// arguments are skipped.
pub fn command_line(args: &[String]) -> String {
    args.iter()
        .filter(|a| !a.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn the script and wait for it, bounded by `timeout`.
pub async fn run_script(args: &[String], timeout: Duration) -> Result<(), ScriptError> {
    let (program, rest) = args.split_first().ok_or(ScriptError::Empty)?;

    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(ScriptError::Spawn)?;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.map_err(ScriptError::Spawn)?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(ScriptError::Timeout);
        }
    };

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ScriptError::Exit(code)),
        None => Err(ScriptError::Killed),
    }
}

//! Runtime control of a training session.
//!
//! Commands are single-letter lines:
//!
//! | Line | Command |
//! |------|---------|
//! | `r` | toggle rendering |
//! | `q` | save models and stop |
//! | `m` | extend the step budget |
//! | `l` | shorten the step budget |
//! | `i` | increase exploration |
//! | `d` | decrease exploration |
//! | `z` | zero exploration |

use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleRender,
    SaveAndQuit,
    ExtendRun,
    ShortenRun,
    IncreaseExploration,
    DecreaseExploration,
    ZeroExploration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "r" => Ok(Command::ToggleRender),
            "q" => Ok(Command::SaveAndQuit),
            "m" => Ok(Command::ExtendRun),
            "l" => Ok(Command::ShortenRun),
            "i" => Ok(Command::IncreaseExploration),
            "d" => Ok(Command::DecreaseExploration),
            "z" => Ok(Command::ZeroExploration),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Non-blocking source of commands, polled once per environment step.
pub trait CommandSource {
    /// Everything received since the last poll, in order.
    fn poll(&mut self) -> Vec<Command>;
}

/// Source that never issues commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommands;

impl CommandSource for NoCommands {
    fn poll(&mut self) -> Vec<Command> {
        Vec::new()
    }
}

/// Commands arriving as text lines on a channel.
#[derive(Debug)]
pub struct ChannelCommands {
    rx: Receiver<String>,
}

impl ChannelCommands {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }

    /// Creates a connected sender and source.
    pub fn channel() -> (Sender<String>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }
}

impl CommandSource for ChannelCommands {
    fn poll(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse() {
                Ok(command) => {
                    debug!(?command, "command received");
                    commands.push(command);
                }
                Err(err) => warn!(%err, "ignoring command"),
            }
        }
        commands
    }
}

/// Commands typed on standard input, read by a background thread.
#[derive(Debug)]
pub struct StdinCommands {
    inner: ChannelCommands,
}

impl StdinCommands {
    /// Spawns the reader thread. It exits when stdin closes or the source is
    /// dropped.
    pub fn spawn() -> io::Result<Self> {
        let (tx, inner) = ChannelCommands::channel();
        thread::Builder::new()
            .name("stdin-commands".into())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("stdin command reader stopped");
            })?;
        Ok(Self { inner })
    }
}

impl CommandSource for StdinCommands {
    fn poll(&mut self) -> Vec<Command> {
        self.inner.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_letter() {
        let parsed: Vec<Command> = ["r", "q", "m", "l", "i", "d", "z"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(
            parsed,
            vec![
                Command::ToggleRender,
                Command::SaveAndQuit,
                Command::ExtendRun,
                Command::ShortenRun,
                Command::IncreaseExploration,
                Command::DecreaseExploration,
                Command::ZeroExploration,
            ]
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(" q\n".parse::<Command>(), Ok(Command::SaveAndQuit));
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert_eq!(
            "x".parse::<Command>(),
            Err(UnknownCommand("x".to_string()))
        );
    }

    #[test]
    fn channel_poll_drains_and_skips_unknown() {
        let (tx, mut source) = ChannelCommands::channel();
        for line in ["r", "bogus", "", "z"] {
            tx.send(line.to_string()).unwrap();
        }
        assert_eq!(
            source.poll(),
            vec![Command::ToggleRender, Command::ZeroExploration]
        );
        assert!(source.poll().is_empty());
    }

    #[test]
    fn poll_survives_disconnected_sender() {
        let (tx, mut source) = ChannelCommands::channel();
        tx.send("q".to_string()).unwrap();
        drop(tx);
        assert_eq!(source.poll(), vec![Command::SaveAndQuit]);
        assert!(source.poll().is_empty());
    }
}

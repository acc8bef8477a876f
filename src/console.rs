//! Line-oriented command surface: one command per stdin line, replies and
//! playback notices printed by the `ConsoleNotifier`.

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::manager::{RequestContext, SessionManager};

pub const HELP: &str = "\
Commands:
  play <link>   queue a Spotify or YouTube track/playlist
  play          resume the queue
  skip          skip the current track
  stop          stop and leave the voice channel
  shuffle       shuffle the queue
  clear         empty the queue
  queue         show what's playing and up next
  help          show this help
  quit          exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play(Option<String>),
    Skip,
    Stop,
    Shuffle,
    Clear,
    Queue,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("`{0}` takes no arguments")]
    UnexpectedArgument(String),
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    ///
    /// A leading `!` is accepted so chat-style commands can be pasted in.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, CommandError> {
        let line = line.trim();
        let line = line.strip_prefix('!').unwrap_or(line);
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        if word.is_empty() {
            return Ok(None);
        }

        let word = word.to_ascii_lowercase();
        if word == "play" || word == "p" {
            let link = (!rest.is_empty()).then(|| rest.to_string());
            return Ok(Some(ConsoleCommand::Play(link)));
        }

        let command = match word.as_str() {
            "skip" | "next" => ConsoleCommand::Skip,
            "stop" | "leave" => ConsoleCommand::Stop,
            "shuffle" => ConsoleCommand::Shuffle,
            "clear" => ConsoleCommand::Clear,
            "queue" | "q" => ConsoleCommand::Queue,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return Err(CommandError::Unknown(word)),
        };
        if !rest.is_empty() {
            return Err(CommandError::UnexpectedArgument(word));
        }
        Ok(Some(command))
    }
}

pub enum LineAction {
    Continue,
    Quit,
}

/// Drives a `SessionManager` from text input for a single guild
pub struct Console {
    manager: Arc<SessionManager>,
    ctx: RequestContext,
}

impl Console {
    pub fn new(manager: Arc<SessionManager>, ctx: RequestContext) -> Self {
        Self { manager, ctx }
    }

    pub async fn handle_line(&self, line: &str) -> LineAction {
        let command = match ConsoleCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return LineAction::Continue,
            Err(e) => {
                eprintln!("{}", e);
                return LineAction::Continue;
            }
        };
        debug!(?command, "console command");

        // Failures are already reported to the text channel by the manager
        let _ = match command {
            ConsoleCommand::Play(link) => self.manager.play(&self.ctx, link.as_deref()).await,
            ConsoleCommand::Skip => self.manager.skip(&self.ctx).await,
            ConsoleCommand::Stop => self.manager.stop(&self.ctx).await,
            ConsoleCommand::Shuffle => {
                self.manager.shuffle(&self.ctx);
                Ok(())
            }
            ConsoleCommand::Clear => {
                self.manager.clear(&self.ctx);
                Ok(())
            }
            ConsoleCommand::Queue => self.manager.queue(&self.ctx).await,
            ConsoleCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleCommand::Quit => return LineAction::Quit,
        };
        LineAction::Continue
    }

    /// Read commands until EOF or `quit`
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if let LineAction::Quit = self.handle_line(&line).await {
                break;
            }
        }
        // Leave the voice channel on the way out
        let _ = self.manager.stop(&self.ctx).await;
        Ok(())
    }
}

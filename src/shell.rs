//! Interactive line-based front end. Each line becomes one [`Message`].

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::app::Message;

pub const HELP: &str = "\
Commands:
  open [PATH]   load a photo (no PATH opens a file dialog)
  fetch         download the style model
  predict       run the model on the current photo
  cancel        stop a running transform
  save PATH     write the current image to PATH
  status        show what is loaded
  logs          export the debug log
  help          show this list
  quit          exit";

#[derive(Debug)]
pub enum ShellCommand {
    Send(Message),
    Help,
    Blank,
}

pub fn parse_command(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let path = (!rest.is_empty()).then(|| PathBuf::from(rest));

    let message = match word.to_lowercase().as_str() {
        "" => return Ok(ShellCommand::Blank),
        "help" | "?" => return Ok(ShellCommand::Help),
        "open" => Message::OpenFile(path),
        "fetch" | "download" => Message::FetchModel,
        "predict" | "transform" => Message::Predict,
        "cancel" => Message::CancelTransform,
        "save" => Message::SaveImage(path.ok_or_else(|| "Usage: save PATH".to_string())?),
        "status" => Message::ShowStatus,
        "logs" => Message::ExportDebugLogs,
        "quit" | "exit" => Message::Quit,
        other => return Err(format!("Unknown command: {}. Type `help` for a list.", other)),
    };
    Ok(ShellCommand::Send(message))
}

/// Reads commands from stdin until EOF, which counts as `quit`.
pub fn spawn_reader(sender: UnboundedSender<Message>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read from stdin: {}", e);
                    break;
                }
            };
            match parse_command(&line) {
                Ok(ShellCommand::Send(message)) => {
                    if sender.send(message).is_err() {
                        return;
                    }
                }
                Ok(ShellCommand::Help) => println!("{}", HELP),
                Ok(ShellCommand::Blank) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
        debug!("stdin closed");
        let _ = sender.send(Message::Quit);
    });
}

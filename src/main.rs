mod app;
mod build_info;
mod config;
mod download;
mod exif_utils;
mod file_io;
mod inference;
mod logging;
mod settings;
mod shell;

#[cfg(test)]
mod test_support;

#[allow(unused_imports)]
use log::{Level, trace, debug, info, warn, error};

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::app::{App, Message, PresentOptions};
use crate::build_info::BuildInfo;
use crate::settings::UserSettings;

#[derive(Parser, Debug)]
#[command(
    name = "photostyler",
    version = BuildInfo::display_version(),
    long_version = BuildInfo::detailed_info(),
    about = "Pick a photo, fetch a style-transfer model and run it through a native inference library"
)]
struct Cli {
    /// Use this settings file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the model into the storage directory
    Fetch,
    /// Style one photo and exit
    Transform {
        image: PathBuf,
        /// Save the result here (format from the extension)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
        /// Download the model first
        #[arg(long)]
        fetch: bool,
        /// Open the result in the default image viewer
        #[arg(long)]
        open: bool,
    },
    /// Interactive session (default)
    Shell,
    /// Show the effective settings, or create/edit the settings file
    Settings {
        /// Write a commented settings file if none exists
        #[arg(long)]
        init: bool,
        /// Change a value in the settings file
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Print where panic and debug logs are written
    Logs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let shared_log_buffer = logging::setup_logger();
    logging::setup_panic_hook(Arc::clone(&shared_log_buffer));
    info!("PhotoStyler {} starting", BuildInfo::display_version());
    debug!("{}", BuildInfo::detailed_info().replace('\n', ", "));

    let settings_path = cli.settings.clone().unwrap_or_else(UserSettings::settings_path);
    let command = cli.command.unwrap_or(Command::Shell);

    let steps = match command {
        Command::Settings { init, set } => return settings_command(&settings_path, init, &set),
        Command::Logs => {
            println!("{}", logging::get_log_directory().display());
            return ExitCode::SUCCESS;
        }
        Command::Fetch => Some((vec![Message::FetchModel], PresentOptions::default())),
        Command::Transform { image, output, fetch, open } => {
            let mut steps = vec![Message::OpenFile(Some(image))];
            if fetch {
                steps.push(Message::FetchModel);
            }
            steps.push(Message::Predict);
            Some((steps, PresentOptions { output, open }))
        }
        Command::Shell => None,
    };

    let settings = UserSettings::load(cli.settings.as_deref());
    config::init(&settings);
    let (sender, receiver) = mpsc::unbounded_channel();
    let app = App::new(config::get(), sender.clone()).with_log_buffer(shared_log_buffer);

    let app = match steps {
        Some((steps, present)) => app.with_presentation(present).with_steps(steps),
        None => {
            println!("PhotoStyler {}. Type `help` for commands.", BuildInfo::display_version());
            shell::spawn_reader(sender);
            app
        }
    };

    if app.run(receiver).await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn settings_command(path: &Path, init: bool, assignments: &[String]) -> ExitCode {
    if init {
        if path.exists() {
            println!("Settings file already exists at {}", path.display());
        } else if let Err(e) = UserSettings::default().save(path) {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        } else {
            println!("Wrote default settings to {}", path.display());
        }
    }

    if !assignments.is_empty() {
        let mut settings = UserSettings::load_file(path);
        for assignment in assignments {
            let Some((key, value)) = assignment.split_once('=') else {
                eprintln!("Expected KEY=VALUE, got '{}'", assignment);
                return ExitCode::FAILURE;
            };
            if let Err(e) = settings.set_value(key.trim(), value) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        if let Err(e) = settings.save(path) {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
        println!("Updated {}", path.display());
    }

    let mut effective = UserSettings::load(Some(path));
    if !effective.api_key.is_empty() {
        effective.api_key = "********".to_string();
    }
    println!("# {}", path.display());
    match serde_yaml::to_string(&effective) {
        Ok(yaml) => print!("{}", yaml),
        Err(e) => {
            eprintln!("Failed to render settings: {}", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

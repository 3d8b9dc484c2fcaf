//! Console commands
//! This module defines the commands the user can type while the client runs.

use std::str::FromStr;

use anyhow::Result;
use log::info;

use crate::error::BleError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Scan for the target and connect to the first match
    Scan,
    StopScan,
    /// Close the current session
    Close,
    Status,
    /// Raise the default alert locally
    Test,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" | "connect" => Ok(ConsoleCommand::Scan),
            "stop" => Ok(ConsoleCommand::StopScan),
            "close" | "disconnect" => Ok(ConsoleCommand::Close),
            "status" => Ok(ConsoleCommand::Status),
            "test" => Ok(ConsoleCommand::Test),
            "help" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("Unknown command: {:?}", other)),
        }
    }
}

pub const HELP_TEXT: &str = "Commands: scan, stop, close, status, test, help, quit";

/// Runs one command. Returns `false` when the client should exit.
pub async fn execute(command: ConsoleCommand, app_state: &AppState) -> Result<bool> {
    let bluetooth_manager_arc = app_state.get_bluetooth_manager_arc();
    let mut bluetooth_manager_guard = bluetooth_manager_arc.lock().await;

    match command {
        ConsoleCommand::Scan => match bluetooth_manager_guard.start_scan().await {
            // Already reported through the status line.
            Err(BleError::PermissionDenied | BleError::ScannerUnavailable | BleError::SessionActive) => {}
            other => other?,
        },
        ConsoleCommand::StopScan => bluetooth_manager_guard.stop_scan().await,
        ConsoleCommand::Close => bluetooth_manager_guard.disconnect().await,
        ConsoleCommand::Status => {
            let snapshot = bluetooth_manager_guard.snapshot().await;
            println!("Status: {}", *app_state.status.borrow());
            println!(
                "Session #{}: {:?}, subscription {:?}, scanning: {}",
                snapshot.generation,
                snapshot.state,
                snapshot.subscription,
                bluetooth_manager_guard.is_scanning()
            );
            if let Some(error) = snapshot.last_error {
                println!("Last error: {}", error);
            }
        }
        ConsoleCommand::Test => bluetooth_manager_guard.test_alert(),
        ConsoleCommand::Help => println!("{}", HELP_TEXT),
        ConsoleCommand::Quit => {
            info!("Quit requested");
            return Ok(false);
        }
    }
    Ok(true)
}

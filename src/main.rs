use anyhow::Result;
use handy_alert_lib::commands::{self, ConsoleCommand, HELP_TEXT};
use handy_alert_lib::config::AppConfig;
use handy_alert_lib::logging;
use handy_alert_lib::state::AppState;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::load_or_init().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using default: {:#}", e);
            AppConfig::default()
        }
    };
    logging::init(&config.log_level);
    info!("Starting handy-alert");

    let app_state = AppState::new(config).await?;
    if app_state.config.scan.auto_start {
        if let Err(e) = commands::execute(ConsoleCommand::Scan, &app_state).await {
            warn!("Initial scan did not start: {}", e);
        }
    }
    println!("{}", HELP_TEXT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(command) => match commands::execute(command, &app_state).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("{}", e),
                    },
                    Err(e) => println!("{}\n{}", e, HELP_TEXT),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    app_state.bluetooth_manager.lock().await.shutdown().await;
    info!("Bye");
    Ok(())
}

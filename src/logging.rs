use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Parses a level name, defaulting to `Info` for anything unknown
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

/// Installs the global logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) {
    let result = env_logger::Builder::new()
        .filter_level(parse_level(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .parse_default_env()
        .try_init();

    if let Err(e) = result {
        eprintln!("Logger already initialized: {}", e);
    }
}

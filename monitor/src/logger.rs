use std::fs;
use std::path::Path;

use anyhow::Result;

const LOG_FILE_PREFIX: &str = "ltnm_";

/// Install a fern dispatcher writing to stdout and to a timestamped file in
/// `log_dir`. Only the newest log file is kept across runs.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    prune_old_logs(log_dir)?;

    let log_path = log_dir.join(format!(
        "{}{}.log",
        LOG_FILE_PREFIX,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    let level = log_level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

/// Delete every earlier monitor log in the directory, keeping only the most
/// recently modified one.
fn prune_old_logs(log_dir: &Path) -> Result<()> {
    let mut logs: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"))
        })
        .collect();
    logs.sort_by_key(|entry| {
        std::cmp::Reverse(
            entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });
    for stale in logs.iter().skip(1) {
        if let Err(e) = fs::remove_file(stale.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", stale.path(), e);
        }
    }
    Ok(())
}

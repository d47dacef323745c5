//! Detecting whether a device reboot actually happened after the agent
//! asked for one.
//!
//! Grounded on `tedge_agent`'s `restart_operation_handler`: drop a marker
//! file stamped with the current time before requesting the reboot, then
//! on the next process start compare that stamp against the system
//! uptime from `/proc/uptime`. If the system has been up for less time
//! than has passed since the marker was written, a reboot happened in
//! between; if the marker is missing entirely (a tmpfs `/tmp` was wiped),
//! a reboot is assumed to have happened too.

use camino::Utf8Path;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use time::OffsetDateTime;

const RESTART_MARKER_FILE: &str = "tedge_update_agent_restart";
const PROC_UPTIME: &str = "/proc/uptime";

#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not convert timestamp {timestamp}: {error_msg}")]
    TimestampConversion { timestamp: i64, error_msg: String },

    #[error("Could not parse /proc/uptime")]
    UptimeParse,
}

pub fn create_restart_marker(marker_dir: &Utf8Path) -> Result<(), RestartError> {
    let path = marker_dir.join(RESTART_MARKER_FILE);
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    file.write_all(OffsetDateTime::now_utc().unix_timestamp().to_string().as_bytes())?;
    Ok(())
}

pub fn restart_marker_exists(marker_dir: &Utf8Path) -> bool {
    marker_dir.join(RESTART_MARKER_FILE).exists()
}

fn restart_marker_timestamp(marker_dir: &Utf8Path) -> Result<OffsetDateTime, RestartError> {
    let mut file = File::open(marker_dir.join(RESTART_MARKER_FILE))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let unix_timestamp: i64 = contents
        .trim()
        .parse()
        .map_err(|_| RestartError::UptimeParse)?;

    OffsetDateTime::from_unix_timestamp(unix_timestamp).map_err(|error| RestartError::TimestampConversion {
        timestamp: unix_timestamp,
        error_msg: error.to_string(),
    })
}

fn system_boot_time() -> Result<OffsetDateTime, RestartError> {
    let uptime_file = File::open(PROC_UPTIME)?;
    let mut buf_reader = std::io::BufReader::new(uptime_file);
    let mut buffer = String::new();
    buf_reader.read_to_string(&mut buffer)?;

    let uptime_secs: f64 = buffer
        .split(' ')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(RestartError::UptimeParse)?;

    Ok(OffsetDateTime::now_utc() - time::Duration::seconds(uptime_secs as i64))
}

/// `true` if the system has rebooted since `create_restart_marker` was
/// last called.
pub fn has_rebooted(marker_dir: &Utf8Path) -> Result<bool, RestartError> {
    if !restart_marker_exists(marker_dir) {
        return Ok(true);
    }

    let boot_time = system_boot_time()?;
    let marker_time = restart_marker_timestamp(marker_dir)?;

    Ok(boot_time > marker_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tedge_test_utils::fs::TempTedgeDir;

    #[test]
    fn missing_marker_is_treated_as_a_reboot() {
        let temp_dir = TempTedgeDir::new();
        assert!(has_rebooted(&temp_dir.utf8_path_buf()).unwrap());
    }

    #[test]
    fn marker_written_just_now_is_not_a_reboot() {
        let temp_dir = TempTedgeDir::new();
        create_restart_marker(&temp_dir.utf8_path_buf()).unwrap();
        // The marker was written after the system booted (uptime > 0 in
        // any real environment), so no reboot could have happened since.
        assert!(!has_rebooted(&temp_dir.utf8_path_buf()).unwrap());
    }
}

//! XDG path helpers for recordings and transformed results
//!
//! Layout under the app-private data directory:
//!   ~/.local/share/rave-remote/recordings/    finalized clips
//!   ~/.local/share/rave-remote/transformed/   downloaded results
//!   ~/.local/share/rave-remote/tmp/           in-flight captures

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const APP_DIR_NAME: &str = "rave-remote";

/// Root data directory: ~/.local/share/rave-remote/
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Permanent home of finalized recordings.
pub fn recordings_dir() -> PathBuf {
    data_dir().join("recordings")
}

/// Output directory for downloaded transformation results.
pub fn transformed_dir() -> PathBuf {
    data_dir().join("transformed")
}

/// Scratch directory for captures that are still being written.
pub fn capture_tmp_dir() -> PathBuf {
    data_dir().join("tmp")
}

/// Location of the persisted application state.
pub fn state_file() -> PathBuf {
    data_dir().join("state.json")
}

/// Create a directory (parents included) and hand the path back.
pub fn ensure_dir(dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

/// Delete leftover `capture_*.wav` files from a previous run. A capture
/// abandoned mid-start (process killed, quit while the stream was opening)
/// leaves its scratch file behind; nothing else lives in this directory.
pub fn sweep_capture_tmp(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("capture_") && name.ends_with(".wav")) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => log::info!("Removed stale capture {:?}", entry.path()),
            Err(e) => log::warn!("Failed to remove stale capture {:?}: {}", entry.path(), e),
        }
    }
}

/// Milliseconds since the Unix epoch. Used to stamp filenames; a wall-clock
/// timestamp is unique enough here and avoids a date-formatting dependency.
pub fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Permanent filename for a finalized recording: recording_{epochMillis}.wav
pub fn generate_recording_path(dir: &Path) -> PathBuf {
    dir.join(format!("recording_{}.wav", epoch_millis()))
}

/// Filename for a downloaded result: {epochMillis}_output.wav
pub fn generate_output_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}_output.wav", epoch_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dirs_nest_under_app_dir() {
        for dir in [recordings_dir(), transformed_dir(), capture_tmp_dir()] {
            assert!(dir.to_string_lossy().contains(APP_DIR_NAME));
        }
        assert_eq!(state_file().file_name().unwrap(), "state.json");
    }

    #[test]
    fn recording_path_has_expected_shape() {
        let path = generate_recording_path(Path::new("/tmp"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn output_path_has_expected_shape() {
        let path = generate_output_path(Path::new("/tmp"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_output.wav"));
    }

    #[test]
    fn sweep_removes_only_stale_captures() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = tmp.path().join("capture_abc.wav");
        let other = tmp.path().join("notes.txt");
        fs::write(&stale, b"riff").unwrap();
        fs::write(&other, b"keep").unwrap();

        sweep_capture_tmp(tmp.path());
        assert!(!stale.exists());
        assert!(other.exists());

        // missing directory is fine too
        sweep_capture_tmp(&tmp.path().join("nope"));
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a").join("b");
        ensure_dir(&target).unwrap();
        ensure_dir(&target).unwrap();
        assert!(target.is_dir());
    }
}

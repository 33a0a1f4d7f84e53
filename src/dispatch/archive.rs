//! Local fallback storage for messages that could not be published.
//!
//! Each archived message is the raw input, byte for byte, in
//! `{archive_dir}/{exchange}-{queue}-{YYYYMMDD-HHMMSS}.{pid}.email.txt`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Mail2RmqError, Result};

/// Suffix shared by every archive file.
pub const ARCHIVE_SUFFIX: &str = "email.txt";

/// Give up after this many same-second collisions.
const MAX_COLLISIONS: usize = 10_000;

/// Write `raw` to a new archive file and return its path.
///
/// The file is created exclusively and never overwrites an existing archive.
/// It is flushed to disk before this returns.
pub fn archive(exchange: &str, queue: &str, raw: &[u8], archive_dir: &Path) -> Result<PathBuf> {
    let path = write_new(archive_dir, &archive_base_name(exchange, queue), |file| {
        file.write_all(raw)?;
        file.sync_all()
    })?;
    tracing::info!(path = %path.display(), bytes = raw.len(), "Message archived");
    Ok(path)
}

/// Create the first free numbered name and fill it with `write`.
///
/// A file whose write fails is removed, so a partial archive never remains.
fn write_new<F>(archive_dir: &Path, base: &str, write: F) -> Result<PathBuf>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    for n in 0..MAX_COLLISIONS {
        let path = archive_dir.join(numbered(base, n));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(Mail2RmqError::Archive { path, source }),
        };

        if let Err(source) = write(&mut file) {
            drop(file);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Partial archive not removed");
            }
            return Err(Mail2RmqError::Archive { path, source });
        }
        return Ok(path);
    }

    Err(Mail2RmqError::Archive {
        path: archive_dir.join(numbered(base, MAX_COLLISIONS)),
        source: std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "too many archive files with the same name",
        ),
    })
}

/// `{exchange}-{queue}-{YYYYMMDD-HHMMSS}.{pid}`, local time.
fn archive_base_name(exchange: &str, queue: &str) -> String {
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    format!(
        "{}-{}-{ts}.{}",
        sanitize_name_part(exchange),
        sanitize_name_part(queue),
        std::process::id()
    )
}

fn numbered(base: &str, n: usize) -> String {
    if n == 0 {
        format!("{base}.{ARCHIVE_SUFFIX}")
    } else {
        format!("{base}-{n}.{ARCHIVE_SUFFIX}")
    }
}

/// Replace path separators and other awkward characters with `_`.
fn sanitize_name_part(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Queue1\r\n\r\nBody \xE9\r\n";

    #[test]
    fn test_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive("mail2rmq", "Queue1", RAW, dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), RAW);
    }

    #[test]
    fn test_archive_filename_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive("mail2rmq", "Queue1", RAW, dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        let pid_suffix = format!(".{}.email.txt", std::process::id());
        assert!(name.starts_with("mail2rmq-Queue1-"), "{name}");
        assert!(name.ends_with(&pid_suffix), "{name}");

        // YYYYMMDD-HHMMSS
        let ts = &name["mail2rmq-Queue1-".len()..name.len() - pid_suffix.len()];
        assert_eq!(ts.len(), 15);
        assert!(chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d-%H%M%S").is_ok());
    }

    #[test]
    fn test_same_second_archives_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| archive("ex", "Q", format!("msg {i}").as_bytes(), dir.path()).unwrap())
            .collect();
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        for (i, p) in paths.iter().enumerate() {
            assert_eq!(std::fs::read_to_string(p).unwrap(), format!("msg {i}"));
        }
    }

    #[test]
    fn test_archive_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = archive("ex", "Q", RAW, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Mail2RmqError::Archive { .. }));
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_new(dir.path(), "ex-Q-partial", |file| {
            file.write_all(b"From: a@b.com\r\n")?;
            Err(std::io::Error::other("disk full"))
        })
        .unwrap_err();

        match err {
            Mail2RmqError::Archive { path, source } => {
                assert_eq!(source.to_string(), "disk full");
                assert!(!path.exists());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sanitize_name_part() {
        assert_eq!(sanitize_name_part("a/b"), "a_b");
        assert_eq!(sanitize_name_part("Queue1"), "Queue1");
        assert_eq!(sanitize_name_part(""), "unknown");
    }

    #[test]
    fn test_numbered() {
        assert_eq!(numbered("x.1", 0), "x.1.email.txt");
        assert_eq!(numbered("x.1", 2), "x.1-2.email.txt");
    }
}

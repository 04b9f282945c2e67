/// Helper utilities for dcborg-cli

use std::error::Error;
use std::fs;
use std::path::Path;

use crate::utils::{MTAB_PATH, PROC_MOUNTS_PATH};

/// Render an error and every `source()` below it, one cause per line
pub fn error_report(err: &(dyn Error + 'static)) -> String {
    let mut report = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        report.push_str("\n  caused by: ");
        report.push_str(&cause.to_string());
        source = cause.source();
    }
    report
}

/// Truncate string with ellipsis (counts characters, not bytes)
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        "*".repeat(chars.len())
    } else {
        let start: String = chars[..visible_chars].iter().collect();
        let end: String = chars[chars.len() - visible_chars..].iter().collect();
        format!("{}...{}", start, end)
    }
}

/// Check if a file exists and is a regular file
pub fn is_file_readable<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists() && path.as_ref().is_file()
}

/// Whether `mountpoint` appears as the mount target of any line in an
/// mtab-formatted table
pub fn mtab_contains(mtab: &str, mountpoint: &Path) -> bool {
    mtab.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| Path::new(target) == mountpoint)
}

/// Check `mountpoint` against the live mount table
pub fn is_mountpoint(mountpoint: &Path) -> std::io::Result<bool> {
    let mtab = fs::read_to_string(MTAB_PATH).or_else(|_| fs::read_to_string(PROC_MOUNTS_PATH))?;
    Ok(mtab_contains(&mtab, mountpoint))
}

/// Name of the effective user of this process
pub fn current_user() -> Option<String> {
    use nix::unistd::{Uid, User};

    User::from_uid(Uid::effective())
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("0123456789abc", 10), "0123456...");
        assert_eq!(truncate_string("äöüäöüäöüäöü", 6), "äöü...");
    }

    #[test]
    fn test_mask_sensitive() {
        let token = "5e7f294e4c92a9aa661fae8d347d832d";
        let masked = mask_sensitive(token, 4);
        assert_eq!(masked, "5e7f...832d");
        assert_eq!(mask_sensitive("abc", 4), "***");
    }

    #[test]
    fn test_mtab_contains() {
        let mtab = "/dev/root / ext4 rw,noatime 0 0\n\
                    proc /proc proc rw,relatime 0 0\n\
                    /dev/sda1 /home/pi/docker/nextcloud/persistant-data/nc_data ext4 rw 0 0\n";

        assert!(mtab_contains(mtab, Path::new("/")));
        assert!(mtab_contains(
            mtab,
            Path::new("/home/pi/docker/nextcloud/persistant-data/nc_data")
        ));
        assert!(!mtab_contains(mtab, Path::new("/root2")));
        assert!(!mtab_contains(mtab, Path::new("/home/pi/docker")));
    }

    #[test]
    fn test_error_report_walks_sources() {
        let err = BackupError::ExecutorError {
            command: "borg info".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        };
        let report = error_report(&err);
        assert_eq!(
            report,
            "Failed to execute 'borg info'\n  caused by: No such file or directory"
        );
    }

    #[test]
    fn test_is_file_readable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(is_file_readable(file.path()));
        assert!(!is_file_readable(file.path().with_extension("missing")));
    }
}

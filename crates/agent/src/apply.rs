//! Verifying and unpacking downloaded rule archives into the live rule dir.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use fleet_core::RuleSetVersion;

use crate::error::AgentError;

/// Scratch directory under the rule dir, recreated for every archive.
pub const SCRATCH_DIR: &str = ".tmp_rules";
pub const RULES_ENTRY_NAME: &str = "console.rules";

/// Reject anything that is not a well-formed version before it reaches a path.
pub fn validate_version(version: &str) -> Result<(), AgentError> {
    if RuleSetVersion::is_valid(version) {
        Ok(())
    } else {
        Err(AgentError::InvalidVersion(version.to_string()))
    }
}

/// Live file name for a version's rules.
pub fn rules_file_name(version: &str) -> String {
    format!("console_{}.rules", version)
}

/// Compare the archive digest with the one the console advertised.
///
/// A response without a digest is accepted with a warning.
pub fn verify_digest(version: &str, bytes: &[u8], expected: Option<&str>) -> Result<String, AgentError> {
    let actual = hex::encode(Sha256::digest(bytes));
    match expected {
        Some(expected) if !expected.eq_ignore_ascii_case(&actual) => Err(AgentError::Integrity {
            version: version.to_string(),
            expected: expected.to_string(),
            actual,
        }),
        Some(_) => Ok(actual),
        None => {
            warn!(version, "archive served without digest");
            Ok(actual)
        }
    }
}

/// Extract `bytes` into a fresh scratch dir and move `console.rules` to
/// `RULE_DIR/console_<version>.rules`. The scratch dir never outlives the call.
pub fn apply_archive(rule_dir: &Path, version: &str, bytes: &[u8]) -> Result<PathBuf, AgentError> {
    validate_version(version)?;
    let scratch = rule_dir.join(SCRATCH_DIR);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    fs::create_dir_all(&scratch)?;

    let result = extract_and_move(&scratch, rule_dir, version, bytes);
    if let Err(e) = fs::remove_dir_all(&scratch) {
        debug!(path = %scratch.display(), error = %e, "scratch dir not removed");
    }
    result
}

fn extract_and_move(scratch: &Path, rule_dir: &Path, version: &str, bytes: &[u8]) -> Result<PathBuf, AgentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    archive.extract(scratch)?;

    let src = scratch.join(RULES_ENTRY_NAME);
    if !src.is_file() {
        return Err(AgentError::Archive(format!(
            "archive for {} has no {}",
            version, RULES_ENTRY_NAME
        )));
    }
    let dst = rule_dir.join(rules_file_name(version));
    fs::rename(&src, &dst)?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    const VERSION: &str = "2025.01.01-000000-e1";

    fn archive_with(name: &str, body: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn archive_lands_under_versioned_name() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive_with(RULES_ENTRY_NAME, "alert ip any any -> any any (sid:3000000;)\n");

        let path = apply_archive(dir.path(), VERSION, &bytes).unwrap();
        assert_eq!(path, dir.path().join("console_2025.01.01-000000-e1.rules"));
        assert!(fs::read_to_string(&path).unwrap().contains("sid:3000000"));
        assert!(!dir.path().join(SCRATCH_DIR).exists());
    }

    #[test]
    fn archive_without_rules_entry_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive_with("other.txt", "x");

        let err = apply_archive(dir.path(), VERSION, &bytes).unwrap_err();
        assert!(matches!(err, AgentError::Archive(_)));
        assert!(!dir.path().join(SCRATCH_DIR).exists());
        assert!(!dir.path().join(rules_file_name(VERSION)).exists());
    }

    #[test]
    fn garbage_bytes_are_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_archive(dir.path(), VERSION, b"not a zip").unwrap_err();
        assert!(matches!(err, AgentError::Archive(_)));
    }

    #[test]
    fn path_like_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_archive(dir.path(), "../../etc/passwd", b"").unwrap_err();
        assert!(matches!(err, AgentError::InvalidVersion(_)));
    }

    #[test]
    fn digest_mismatch_is_integrity_error() {
        let bytes = b"payload";
        let good = hex::encode(Sha256::digest(bytes));
        assert_eq!(verify_digest(VERSION, bytes, Some(&good)).unwrap(), good);
        assert_eq!(
            verify_digest(VERSION, bytes, Some(&good.to_uppercase())).unwrap(),
            good
        );
        assert!(verify_digest(VERSION, bytes, None).is_ok());

        let err = verify_digest(VERSION, bytes, Some("00ff")).unwrap_err();
        assert!(matches!(err, AgentError::Integrity { .. }));
    }
}

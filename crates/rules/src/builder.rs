//! Rule-set archive builder.
//!
//! The archive is written to a hidden temp file next to its final path,
//! digested, and only then renamed into place. The rule-set record is
//! updated last, so a `built` record always points at a complete file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use fleet_core::{ArtifactFile, FleetError, RuleItem, RuleSetStatus, RuleSetVersion};

use crate::RuleCatalog;

/// Name of the single rules file inside every archive.
pub const RULES_ENTRY_NAME: &str = "console.rules";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub version: String,
    pub engine: String,
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub item_count: usize,
}

/// Concatenate rule texts in sid order, one per line.
pub fn render_rules_file(items: &[RuleItem]) -> String {
    let mut out = String::new();
    for text in items.iter().map(|i| i.rule_text.trim()).filter(|t| !t.is_empty()) {
        out.push_str(text);
        out.push('\n');
    }
    out
}

fn write_archive(path: &Path, rules: &str) -> Result<(), FleetError> {
    let file = File::create(path).map_err(io_error)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(RULES_ENTRY_NAME, options).map_err(zip_error)?;
    zip.write_all(rules.as_bytes()).map_err(io_error)?;
    let mut inner = zip.finish().map_err(zip_error)?;
    inner.flush().map_err(io_error)?;
    Ok(())
}

/// Streamed SHA-256 of a file, hex encoded, plus its size.
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

fn io_error(e: io::Error) -> FleetError {
    FleetError::Storage(format!("archive I/O: {e}"))
}

fn zip_error(e: zip::result::ZipError) -> FleetError {
    FleetError::Storage(format!("archive encoding: {e}"))
}

impl RuleCatalog {
    /// Build (or rebuild) the archive for `version`.
    ///
    /// Rebuilding overwrites the archive and its digest; version and item
    /// membership are never touched.
    pub fn build(&self, version: &str) -> Result<BuildOutcome, FleetError> {
        let version = RuleSetVersion::parse(version)?;
        let set = self
            .store
            .get_rule_set(version.as_str())
            .ok_or_else(|| FleetError::rule_set_not_found(version.as_str()))?;
        let items = self.store.rule_items_for_version(version.as_str());
        let rules = render_rules_file(&items);

        let base_dir = &self.config.base_dir;
        fs::create_dir_all(base_dir).map_err(io_error)?;
        let final_path = base_dir.join(set.archive_filename());
        let tmp_path = base_dir.join(format!(
            ".{}.{}.tmp",
            set.archive_filename(),
            Uuid::new_v4().simple()
        ));

        let (sha256, size_bytes) = match publish(&tmp_path, &final_path, &rules) {
            Ok(digest) => digest,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(path = %tmp_path.display(), error = %cleanup, "temp archive not removed");
                    }
                }
                return Err(e);
            }
        };

        let now = self.clock.now();
        let artifact = ArtifactFile {
            path: final_path.to_string_lossy().into_owned(),
            sha256: sha256.clone(),
            size_bytes,
        };
        self.store
            .update_rule_set(version.as_str(), |s| {
                s.files.tar = Some(artifact.clone());
                s.status = RuleSetStatus::Built;
                s.active = false;
                s.build_time = Some(now);
            })?
            .ok_or_else(|| FleetError::rule_set_not_found(version.as_str()))?;

        info!(
            version = %version,
            items = items.len(),
            sha256 = %sha256,
            path = %artifact.path,
            "rule set built"
        );
        Ok(BuildOutcome {
            version: version.into_string(),
            engine: set.engine,
            path: artifact.path,
            sha256,
            size_bytes,
            item_count: items.len(),
        })
    }
}

/// Write to `tmp`, digest it, then rename over `target`.
fn publish(tmp: &Path, target: &Path, rules: &str) -> Result<(String, u64), FleetError> {
    write_archive(tmp, rules)?;
    let digest = sha256_file(tmp).map_err(io_error)?;
    fs::rename(tmp, target).map_err(io_error)?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::test_support::{catalog, indicator};
    use crate::EventRef;

    use super::*;

    fn read_entry(path: &str) -> String {
        let bytes = fs::read(path).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(RULES_ENTRY_NAME).unwrap();
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        text
    }

    fn drafted(cat: &RuleCatalog) -> String {
        cat.convert_event(
            &EventRef {
                event_id: 1,
                uuid: String::new(),
            },
            &[indicator("domain", "a.example"), indicator("ip-dst", "192.0.2.1")],
        )
        .unwrap()
        .version
        .unwrap()
    }

    #[test]
    fn build_publishes_archive_and_marks_built() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = catalog(tmp.path());
        let version = drafted(&cat);

        let out = cat.build(&version).unwrap();
        assert!(out.path.ends_with(&format!("snort3_{version}.zip")));
        assert_eq!(out.item_count, 2);

        let (digest, size) = sha256_file(Path::new(&out.path)).unwrap();
        assert_eq!(digest, out.sha256);
        assert_eq!(size, out.size_bytes);

        let text = read_entry(&out.path);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("sid:3000000"));
        assert!(lines[1].contains("sid:3000001"));

        let set = cat.store().get_rule_set(&version).unwrap();
        assert_eq!(set.status, RuleSetStatus::Built);
        assert!(!set.active);
        assert!(set.build_time.is_some());
        assert_eq!(set.archive().unwrap().sha256, out.sha256);
    }

    #[test]
    fn rebuild_keeps_version_and_matches_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = catalog(tmp.path());
        let version = drafted(&cat);

        cat.build(&version).unwrap();
        let again = cat.build(&version).unwrap();
        assert_eq!(again.version, version);
        let (digest, _) = sha256_file(Path::new(&again.path)).unwrap();
        assert_eq!(digest, again.sha256);
        assert_eq!(cat.store().links_for_version(&version).len(), 2);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = catalog(tmp.path());
        let version = drafted(&cat);
        cat.build(&version).unwrap();

        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("snort3_{version}.zip")]);
    }

    #[test]
    fn unknown_and_malformed_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = catalog(tmp.path());
        assert!(matches!(
            cat.build("2025.01.01-000000-e404"),
            Err(FleetError::NotFound { .. })
        ));
        assert!(matches!(
            cat.build("latest"),
            Err(FleetError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn rules_file_skips_blank_texts() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = catalog(tmp.path());
        let version = drafted(&cat);
        let mut items = cat.store().rule_items_for_version(&version);
        items[1].rule_text = "   ".to_string();
        assert_eq!(render_rules_file(&items).lines().count(), 1);
    }
}

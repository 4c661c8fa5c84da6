use crate::db::DB_FILE_NAME;
use anyhow::{bail, Context};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradebook.sqlite3";
pub const BUNDLE_FORMAT: &str = "gradebook-workspace-v1";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Row counts of the gradebook tables at export time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCounts {
    pub students: i64,
    pub courses: i64,
    pub grades: i64,
    pub enrollments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub format: String,
    pub bundle_id: String,
    pub app_version: String,
    pub exported_at: String,
    pub db_sha256: String,
    #[serde(default)]
    pub counts: BundleCounts,
}

#[derive(Debug, Clone)]
pub enum Restored {
    Bundle(BundleManifest),
    RawSqlite,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn count_rows(db_path: &Path) -> anyhow::Result<BundleCounts> {
    let conn = Connection::open(db_path)?;
    let count = |table: &str| -> anyhow::Result<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(BundleCounts {
        students: count("students")?,
        courses: count("courses")?,
        grades: count("grades")?,
        enrollments: count("enrollments")?,
    })
}

/// Zips the workspace database with a manifest describing it.
pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<BundleManifest> {
    let db_path = workspace.join(DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("no gradebook database in {}", workspace.display());
    }
    let counts = count_rows(&db_path).context("failed to read gradebook tables")?;
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("failed to read {}", db_path.display()))?;

    let manifest = BundleManifest {
        format: BUNDLE_FORMAT.to_string(),
        bundle_id: uuid::Uuid::new_v4().to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        db_sha256: sha256_hex(&db_bytes),
        counts,
    };

    if let Some(dir) = out_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = File::create(out_path).with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(MANIFEST_ENTRY, opts)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.start_file(DB_ENTRY, opts)?;
    zip.write_all(&db_bytes)?;
    zip.finish().context("failed to finalize bundle")?;

    tracing::info!(
        bundle_id = %manifest.bundle_id,
        grades = manifest.counts.grades,
        path = %out_path.display(),
        "gradebook bundle exported"
    );
    Ok(manifest)
}

fn read_magic(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

/// Writes `bytes` beside `dst` and renames it into place, so a failed
/// restore never leaves a half-written database.
fn replace_file(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let staged = dst.with_extension("sqlite3.importing");
    let mut f = File::create(&staged).with_context(|| format!("failed to create {}", staged.display()))?;
    f.write_all(bytes)?;
    f.sync_all()?;
    drop(f);
    std::fs::rename(&staged, dst).with_context(|| format!("failed to replace {}", dst.display()))?;
    Ok(())
}

fn read_bundle(in_path: &Path) -> anyhow::Result<(BundleManifest, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(in_path)?).context("not a readable zip bundle")?;

    let manifest: BundleManifest = {
        let entry = archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle has no manifest.json")?;
        let raw: serde_json::Value = serde_json::from_reader(entry).context("manifest.json is not JSON")?;
        let format = raw.get("format").and_then(|v| v.as_str()).unwrap_or("");
        if format != BUNDLE_FORMAT {
            bail!("unsupported bundle format: {:?}", format);
        }
        serde_json::from_value(raw).context("manifest.json is incomplete")?
    };

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle has no database entry")?
        .read_to_end(&mut db_bytes)?;
    let actual = sha256_hex(&db_bytes);
    if actual != manifest.db_sha256 {
        bail!(
            "database checksum mismatch: manifest {} but entry hashes to {}",
            manifest.db_sha256,
            actual
        );
    }
    if !db_bytes.starts_with(SQLITE_MAGIC) {
        bail!("database entry is not a sqlite file");
    }
    Ok((manifest, db_bytes))
}

/// Replaces the workspace database with the one in `in_path`: a bundle made by
/// [`export_workspace_bundle`], or a bare sqlite file. Any open connection to
/// the workspace must be closed first.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<Restored> {
    let head = read_magic(in_path)?;
    let (restored, bytes) = if head.starts_with(ZIP_MAGIC) {
        let (manifest, bytes) = read_bundle(in_path)?;
        (Restored::Bundle(manifest), bytes)
    } else if head == SQLITE_MAGIC {
        let bytes = std::fs::read(in_path)?;
        (Restored::RawSqlite, bytes)
    } else {
        bail!("{} is neither a gradebook bundle nor a sqlite file", in_path.display());
    };

    std::fs::create_dir_all(workspace)?;
    replace_file(&workspace.join(DB_FILE_NAME), &bytes)?;
    match &restored {
        Restored::Bundle(m) => tracing::info!(bundle_id = %m.bundle_id, "gradebook bundle restored"),
        Restored::RawSqlite => tracing::info!(path = %in_path.display(), "sqlite file restored"),
    }
    Ok(restored)
}

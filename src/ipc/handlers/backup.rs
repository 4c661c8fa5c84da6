use crate::backup::{self, Restored};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

/// A non-blank path param plus the selected workspace.
fn path_and_workspace(
    state: &AppState,
    req: &Request,
    key: &str,
) -> Result<(PathBuf, PathBuf), serde_json::Value> {
    let path = match req.params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    };
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))?;
    Ok((path, workspace))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (out, workspace) = match path_and_workspace(state, req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match backup::export_workspace_bundle(&workspace, &out) {
        Ok(manifest) => ok(
            &req.id,
            json!({
                "path": out.to_string_lossy(),
                "bundleId": manifest.bundle_id,
                "bundleFormat": manifest.format,
                "dbSha256": manifest.db_sha256,
                "counts": manifest.counts
            }),
        ),
        Err(e) => err(
            &req.id,
            "backup_export_failed",
            format!("{e:#}"),
            Some(json!({ "path": out.to_string_lossy() })),
        ),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (src, workspace) = match path_and_workspace(state, req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": src.to_string_lossy() })),
        );
    }

    // The database file is replaced underneath; close our handle first and
    // reopen whatever is in place afterwards, restored or not.
    state.db = None;
    let restored = backup::import_workspace_bundle(&src, &workspace);
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => {
            return err(
                &req.id,
                "db_open_failed",
                format!("{e:#}"),
                Some(json!({ "path": workspace.to_string_lossy() })),
            )
        }
    }

    match restored {
        Ok(Restored::Bundle(m)) => ok(
            &req.id,
            json!({
                "workspacePath": workspace.to_string_lossy(),
                "bundleFormatDetected": m.format,
                "bundleId": m.bundle_id,
                "counts": m.counts
            }),
        ),
        Ok(Restored::RawSqlite) => ok(
            &req.id,
            json!({
                "workspacePath": workspace.to_string_lossy(),
                "bundleFormatDetected": "sqlite3"
            }),
        ),
        Err(e) => err(
            &req.id,
            "backup_import_failed",
            format!("{e:#}"),
            Some(json!({ "path": src.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import(state, req)),
        _ => None,
    }
}

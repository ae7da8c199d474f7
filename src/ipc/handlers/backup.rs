use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn path_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn handle_export_workspace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(out_path) = path_param(req, "outPath") else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "checkpoint before export failed");
        }
    }

    match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(export) => ok(
            &req.id,
            json!({
                "path": out_path,
                "bundleFormat": export.bundle_format,
                "entryCount": export.entry_count,
                "dbSha256": export.db_sha256
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn handle_import_workspace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = path_param(req, "inPath") else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    let Some(workspace_path) = path_param(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
    else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The database file is replaced underneath any open handle.
    state.db = None;
    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = ?e, "workspace import failed");
            // Put the previous workspace back if there was one.
            if let Some(ws) = state.workspace.clone() {
                state.db = db::open_db(&ws).ok();
            }
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => {
            state.workspace = None;
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspace" => Some(handle_export_workspace(state, req)),
        "backup.importWorkspace" => Some(handle_import_workspace(state, req)),
        _ => None,
    }
}

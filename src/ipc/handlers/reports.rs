use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, from_calc, require_actor, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::pdf;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const SHEET_DIR: &str = "files/score_sheets";

fn thesis_exists(conn: &Connection, thesis_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM theses WHERE id = ?", [thesis_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }
    Ok(())
}

fn lecturer_scores(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_id = required_str(params, "thesisId")?;
    thesis_exists(conn, &thesis_id)?;

    let rows = calc::compute_lecturer_scores(conn, &thesis_id).map_err(from_calc)?;
    let total = calc::total_from_lecturer_scores(&rows);
    Ok(json!({ "items": rows, "totalScore": total }))
}

fn score_sheet(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_id = required_str(params, "thesisId")?;
    let sheet = calc::build_score_sheet(conn, &thesis_id).map_err(from_calc)?;
    Ok(json!(sheet))
}

fn generate_pdf(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let workspace = state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    require_actor(conn, params)?;

    let thesis_id = required_str(params, "thesisId")?;
    let sheet = calc::build_score_sheet(conn, &thesis_id).map_err(from_calc)?;

    let bytes = pdf::render_score_sheet(&sheet)
        .map_err(|e| HandlerErr::new("render_failed", e.to_string()))?;
    // A malformed stream is reported, never persisted.
    if !bytes.starts_with(b"%PDF") {
        return Err(HandlerErr::new(
            "render_failed",
            "generated stream is missing the PDF signature",
        ));
    }

    let dir = workspace.join(SHEET_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| HandlerErr::new("fs_write_failed", e.to_string()))?;
    let path = dir.join(format!("{}.pdf", sheet.thesis_code));
    std::fs::write(&path, &bytes)
        .map_err(|e| HandlerErr::new("fs_write_failed", e.to_string()))?;

    let abs = path.to_string_lossy().to_string();
    Ok(json!({
        "thesisId": thesis_id,
        "path": abs,
        "url": format!("file://{}", abs),
        "byteCount": bytes.len(),
        "totalScore": sheet.total_score,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "theses.lecturer_scores" => db_conn(state).and_then(|c| lecturer_scores(c, &req.params)),
        "theses.score_sheet" => db_conn(state).and_then(|c| score_sheet(c, &req.params)),
        "theses.generate_pdf" => generate_pdf(state, &req.params),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

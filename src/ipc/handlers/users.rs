use crate::auth;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, optional_str, require_actor, require_role, required_str, HandlerErr, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;
use uuid::Uuid;

const AVATAR_DIR: &str = "files/avatars";

fn fetch_user_json(
    conn: &Connection,
    workspace: &Path,
    user_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let row: Option<(
        String,
        String,
        String,
        Option<String>,
        String,
        Option<String>,
        i64,
        String,
    )> = conn
        .query_row(
            "SELECT id, username, full_name, email, role, avatar_path, is_active, created_at
             FROM users WHERE id = ?",
            [user_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((id, username, full_name, email, role, avatar_path, is_active, created_at)) = row
    else {
        return Err(HandlerErr::new("not_found", "user not found"));
    };

    let avatar_url = avatar_path
        .as_ref()
        .map(|rel| workspace.join(rel).to_string_lossy().to_string());
    Ok(json!({
        "id": id,
        "username": username,
        "fullName": full_name,
        "email": email,
        "role": role,
        "avatarUrl": avatar_url,
        "isActive": is_active != 0,
        "createdAt": created_at,
    }))
}

/// Multipart stand-in: the hosting layer hands us the decoded upload as
/// a temp file path; we copy it into the workspace file store.
fn store_avatar(workspace: &Path, src: &str) -> Result<String, HandlerErr> {
    let src_path = Path::new(src);
    if !src_path.is_file() {
        return Err(HandlerErr::new("bad_params", "avatar file not found"));
    }
    let ext = src_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_ascii_lowercase();
    let rel = format!("{}/{}.{}", AVATAR_DIR, Uuid::new_v4(), ext);
    let dest = workspace.join(&rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("fs_write_failed", e.to_string()))?;
    }
    std::fs::copy(src_path, &dest)
        .map_err(|e| HandlerErr::new("fs_write_failed", e.to_string()))?;
    Ok(rel)
}

fn workspace_of(state: &AppState) -> Result<&Path, HandlerErr> {
    state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn users_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let workspace = workspace_of(state)?;

    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    let full_name = required_str(params, "fullName")?;
    let email = optional_str(params, "email");

    let role_str = optional_str(params, "role").unwrap_or_else(|| "student".to_string());
    let Some(role) = Role::parse(&role_str) else {
        return Err(HandlerErr::new(
            "bad_params",
            "role must be one of: staff, lecturer, student, ministry",
        ));
    };

    // Elevated roles are staff-granted. First-run exception: while no
    // staff account exists the registration bootstraps one.
    if matches!(role, Role::Staff | Role::Ministry) {
        let staff_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'staff' AND is_active = 1",
                [],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?;
        if staff_count > 0 {
            let actor = require_actor(conn, params)?;
            require_role(&actor, Role::Staff)?;
        }
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "username already taken"));
    }

    let avatar_path = match optional_str(params, "avatarFile") {
        Some(src) => Some(store_avatar(workspace, &src)?),
        None => None,
    };

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, password_hash, full_name, email, role, avatar_path, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            auth::hash_password(&password),
            &full_name,
            &email,
            role.as_str(),
            &avatar_path,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    fetch_user_json(conn, workspace, &user_id)
}

fn users_current(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let workspace = workspace_of(state)?;
    let actor = require_actor(conn, params)?;
    fetch_user_json(conn, workspace, &actor.user_id)
}

fn users_update_current(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let workspace = workspace_of(state)?;
    let actor = require_actor(conn, params)?;

    if let Some(full_name) = optional_str(params, "fullName") {
        conn.execute(
            "UPDATE users SET full_name = ? WHERE id = ?",
            (&full_name, &actor.user_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(email) = optional_str(params, "email") {
        conn.execute(
            "UPDATE users SET email = ? WHERE id = ?",
            (&email, &actor.user_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(password) = optional_str(params, "password") {
        // Incoming passwords are raw; only the digest is persisted.
        conn.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            (auth::hash_password(&password), &actor.user_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(src) = optional_str(params, "avatarFile") {
        let rel = store_avatar(workspace, &src)?;
        conn.execute(
            "UPDATE users SET avatar_path = ? WHERE id = ?",
            (&rel, &actor.user_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    fetch_user_json(conn, workspace, &actor.user_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "users.create" => users_create(state, &req.params),
        "users.current" => users_current(state, &req.params),
        "users.update_current" => users_update_current(state, &req.params),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::AppState;

/// Fixed page size applied to every paginated list method.
pub const PAGE_SIZE: i64 = 5;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing numeric {}", key)))
}

pub fn page_param(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    match params.get("page") {
        None => Ok(1),
        Some(v) if v.is_null() => Ok(1),
        Some(v) => {
            let Some(page) = v.as_i64() else {
                return Err(HandlerErr::new("bad_params", "page must be an integer"));
            };
            if page < 1 {
                return Err(HandlerErr::new("bad_params", "page must be >= 1"));
            }
            Ok(page)
        }
    }
}

pub fn page_envelope(page: i64, total: i64, items: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "items": items,
        "page": page,
        "pageSize": PAGE_SIZE,
        "total": total,
        "pageCount": (total + PAGE_SIZE - 1) / PAGE_SIZE,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Lecturer,
    Student,
    Ministry,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "staff" => Some(Role::Staff),
            "lecturer" => Some(Role::Lecturer),
            "student" => Some(Role::Student),
            "ministry" => Some(Role::Ministry),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Lecturer => "lecturer",
            Role::Student => "student",
            Role::Ministry => "ministry",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

/// Resolves `params.actorId` into an active user. Absent actorId means
/// an anonymous caller (allowed on read-only surfaces); an unknown or
/// deactivated id is always rejected.
pub fn actor_from_params(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Option<Actor>, HandlerErr> {
    let Some(actor_id) = optional_str(params, "actorId") else {
        return Ok(None);
    };

    let row: Option<String> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ? AND is_active = 1",
            [&actor_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(role_str) = row else {
        return Err(HandlerErr::new("forbidden", "unknown or inactive actor"));
    };
    let Some(role) = Role::parse(&role_str) else {
        return Err(HandlerErr::new("forbidden", "actor has no recognized role"));
    };
    Ok(Some(Actor {
        user_id: actor_id,
        role,
    }))
}

pub fn require_actor(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Actor, HandlerErr> {
    actor_from_params(conn, params)?
        .ok_or_else(|| HandlerErr::new("forbidden", "authentication required"))
}

pub fn require_role(actor: &Actor, role: Role) -> Result<(), HandlerErr> {
    if actor.role == role {
        Ok(())
    } else {
        Err(HandlerErr::with_details(
            "forbidden",
            format!("{} role required", role.as_str()),
            json!({ "role": actor.role.as_str() }),
        ))
    }
}

/// Score submission requires a caller with the lecturer role and a
/// lecturer profile linked to their user account.
pub fn require_lecturer_actor(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(Actor, String), HandlerErr> {
    let actor = require_actor(conn, params)?;
    if actor.role != Role::Lecturer {
        return Err(HandlerErr::new("forbidden", "caller has no lecturer role"));
    }
    let lecturer_id: Option<String> = conn
        .query_row(
            "SELECT id FROM lecturers WHERE user_id = ?",
            [&actor.user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(lecturer_id) = lecturer_id else {
        return Err(HandlerErr::new(
            "forbidden",
            "caller has no lecturer profile",
        ));
    };
    Ok((actor, lecturer_id))
}

pub fn from_calc(e: crate::calc::CalcError) -> HandlerErr {
    let code = match e.code.as_str() {
        "not_found" => "not_found",
        "db_update_failed" => "db_update_failed",
        _ => "db_query_failed",
    };
    HandlerErr {
        code,
        message: e.message,
        details: e.details,
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

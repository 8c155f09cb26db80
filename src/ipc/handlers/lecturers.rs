use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, optional_str, page_envelope, page_param, require_actor, require_role, required_str,
    HandlerErr, Role, PAGE_SIZE,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::theses::{thesis_row_json, THESIS_SELECT};

fn lecturer_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let full_name: String = r.get(1)?;
    let faculty: String = r.get(2)?;
    let degree: Option<String> = r.get(3)?;
    let user_id: Option<String> = r.get(4)?;
    Ok(json!({
        "id": id,
        "fullName": full_name,
        "faculty": faculty,
        "degree": degree,
        "userId": user_id,
    }))
}

fn lecturers_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = page_param(params)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(q) = optional_str(params, "q") {
        clauses.push("LOWER(full_name) LIKE ?");
        args.push(Value::Text(format!("%{}%", q.to_lowercase())));
    }
    if let Some(faculty) = optional_str(params, "faculty") {
        clauses.push("faculty = ?");
        args.push(Value::Text(faculty));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM lecturers {}", where_sql),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, full_name, faculty, degree, user_id
             FROM lecturers {}
             ORDER BY full_name
             LIMIT ? OFFSET ?",
            where_sql
        ))
        .map_err(HandlerErr::db)?;
    args.push(Value::Integer(PAGE_SIZE));
    args.push(Value::Integer((page - 1) * PAGE_SIZE));
    let items = stmt
        .query_map(params_from_iter(args.iter()), lecturer_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(page_envelope(page, total, items))
}

fn lecturers_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let full_name = required_str(params, "fullName")?;
    let faculty = required_str(params, "faculty")?;
    let degree = optional_str(params, "degree");
    let user_id = optional_str(params, "userId");

    if let Some(uid) = &user_id {
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [uid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db)?;
        match role.as_deref() {
            None => return Err(HandlerErr::new("not_found", "user not found")),
            Some("lecturer") => {}
            Some(_) => {
                return Err(HandlerErr::new(
                    "validation",
                    "linked user must have the lecturer role",
                ))
            }
        }
        let linked: Option<i64> = conn
            .query_row("SELECT 1 FROM lecturers WHERE user_id = ?", [uid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(HandlerErr::db)?;
        if linked.is_some() {
            return Err(HandlerErr::new(
                "conflict",
                "user already linked to a lecturer",
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lecturers(id, user_id, full_name, faculty, degree) VALUES(?, ?, ?, ?, ?)",
        (&id, &user_id, &full_name, &faculty, &degree),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({
        "id": id,
        "fullName": full_name,
        "faculty": faculty,
        "degree": degree,
        "userId": user_id,
    }))
}

fn lecturer_exists(conn: &Connection, lecturer_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM lecturers WHERE id = ?", [lecturer_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "lecturer not found"));
    }
    Ok(())
}

fn lecturers_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    let row = conn
        .query_row(
            "SELECT id, full_name, faculty, degree, user_id FROM lecturers WHERE id = ?",
            [&lecturer_id],
            lecturer_json,
        )
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| HandlerErr::new("not_found", "lecturer not found"))
}

fn lecturers_councils(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    lecturer_exists(conn, &lecturer_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT cd.id, c.id, c.name, c.is_lock, p.id, p.name
             FROM council_details cd
             JOIN councils c ON c.id = cd.council_id
             JOIN positions p ON p.id = cd.position_id
             WHERE cd.lecturer_id = ?
             ORDER BY c.name",
        )
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([&lecturer_id], |r| {
            let cd_id: String = r.get(0)?;
            let council_id: String = r.get(1)?;
            let council_name: String = r.get(2)?;
            let is_lock: i64 = r.get(3)?;
            let position_id: String = r.get(4)?;
            let position_name: String = r.get(5)?;
            Ok(json!({
                "councilDetailId": cd_id,
                "councilId": council_id,
                "councilName": council_name,
                "isLock": is_lock != 0,
                "positionId": position_id,
                "positionName": position_name,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

fn lecturers_theses(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    lecturer_exists(conn, &lecturer_id)?;

    let mut stmt = conn
        .prepare(&format!(
            "{} JOIN thesis_lecturers tl ON tl.thesis_id = t.id
             WHERE tl.lecturer_id = ?
             ORDER BY t.code",
            THESIS_SELECT
        ))
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([&lecturer_id], thesis_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

/// Theses graded by councils where this lecturer sits in a reviewer
/// position (matched by position name, as the reference data is
/// free-form).
fn lecturers_theses_review(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    lecturer_exists(conn, &lecturer_id)?;

    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE t.council_id IN (
                 SELECT cd.council_id
                 FROM council_details cd
                 JOIN positions p ON p.id = cd.position_id
                 WHERE cd.lecturer_id = ? AND LOWER(p.name) LIKE '%reviewer%'
             )
             ORDER BY t.code",
            THESIS_SELECT
        ))
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([&lecturer_id], thesis_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "lecturers.list" => db_conn(state).and_then(|c| lecturers_list(c, &req.params)),
        "lecturers.create" => db_conn(state).and_then(|c| lecturers_create(c, &req.params)),
        "lecturers.get" => db_conn(state).and_then(|c| lecturers_get(c, &req.params)),
        "lecturers.councils" => db_conn(state).and_then(|c| lecturers_councils(c, &req.params)),
        "lecturers.theses" => db_conn(state).and_then(|c| lecturers_theses(c, &req.params)),
        "lecturers.theses_review" => {
            db_conn(state).and_then(|c| lecturers_theses_review(c, &req.params))
        }
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, optional_str, page_envelope, page_param, require_actor, require_role, required_str,
    HandlerErr, Role, PAGE_SIZE,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn council_row(conn: &Connection, council_id: &str) -> Result<(String, bool), HandlerErr> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT name, is_lock FROM councils WHERE id = ?",
            [council_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((name, is_lock)) = row else {
        return Err(HandlerErr::new("not_found", "council not found"));
    };
    Ok((name, is_lock != 0))
}

fn councils_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = page_param(params)?;
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM councils", [], |r| r.get(0))
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.is_lock,
                    (SELECT COUNT(*) FROM council_details cd WHERE cd.council_id = c.id),
                    (SELECT COUNT(*) FROM theses t WHERE t.council_id = c.id)
             FROM councils c
             ORDER BY c.name
             LIMIT ? OFFSET ?",
        )
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map((PAGE_SIZE, (page - 1) * PAGE_SIZE), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let is_lock: i64 = r.get(2)?;
            let member_count: i64 = r.get(3)?;
            let thesis_count: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "isLock": is_lock != 0,
                "memberCount": member_count,
                "thesisCount": thesis_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(page_envelope(page, total, items))
}

fn councils_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let name = required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO councils(id, name, is_lock) VALUES(?, ?, 0)",
        (&id, &name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id, "name": name, "isLock": false }))
}

fn council_members(conn: &Connection, council_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT cd.id, l.id, l.full_name, p.id, p.name
             FROM council_details cd
             JOIN lecturers l ON l.id = cd.lecturer_id
             JOIN positions p ON p.id = cd.position_id
             WHERE cd.council_id = ?
             ORDER BY p.name, l.full_name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([council_id], |r| {
        let cd_id: String = r.get(0)?;
        let lecturer_id: String = r.get(1)?;
        let lecturer_name: String = r.get(2)?;
        let position_id: String = r.get(3)?;
        let position_name: String = r.get(4)?;
        Ok(json!({
            "councilDetailId": cd_id,
            "lecturerId": lecturer_id,
            "lecturerName": lecturer_name,
            "positionId": position_id,
            "positionName": position_name,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn councils_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let council_id = required_str(params, "councilId")?;
    let (name, is_lock) = council_row(conn, &council_id)?;
    let members = council_members(conn, &council_id)?;
    Ok(json!({
        "id": council_id,
        "name": name,
        "isLock": is_lock,
        "members": members,
    }))
}

fn councils_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let council_id = required_str(params, "councilId")?;
    council_row(conn, &council_id)?;

    if let Some(name) = optional_str(params, "name") {
        conn.execute(
            "UPDATE councils SET name = ? WHERE id = ?",
            (&name, &council_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(is_lock) = params.get("isLock").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE councils SET is_lock = ? WHERE id = ?",
            (is_lock as i64, &council_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    let (name, is_lock) = council_row(conn, &council_id)?;
    Ok(json!({ "id": council_id, "name": name, "isLock": is_lock }))
}

fn councils_add_member(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let council_id = required_str(params, "councilId")?;
    let lecturer_id = required_str(params, "lecturerId")?;
    let position_id = required_str(params, "positionId")?;

    let (_, is_lock) = council_row(conn, &council_id)?;
    if is_lock {
        return Err(HandlerErr::new("locked", "council is locked"));
    }

    let lecturer: Option<i64> = conn
        .query_row("SELECT 1 FROM lecturers WHERE id = ?", [&lecturer_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if lecturer.is_none() {
        return Err(HandlerErr::new("not_found", "lecturer not found"));
    }
    let position: Option<i64> = conn
        .query_row("SELECT 1 FROM positions WHERE id = ?", [&position_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if position.is_none() {
        return Err(HandlerErr::new("not_found", "position not found"));
    }

    let member: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM council_details WHERE council_id = ? AND lecturer_id = ?",
            (&council_id, &lecturer_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if member.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "lecturer already sits on this council",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO council_details(id, council_id, lecturer_id, position_id) VALUES(?, ?, ?, ?)",
        (&id, &council_id, &lecturer_id, &position_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({
        "councilDetailId": id,
        "councilId": council_id,
        "lecturerId": lecturer_id,
        "positionId": position_id,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "councils.list" => db_conn(state).and_then(|c| councils_list(c, &req.params)),
        "councils.create" => db_conn(state).and_then(|c| councils_create(c, &req.params)),
        "councils.get" => db_conn(state).and_then(|c| councils_get(c, &req.params)),
        "councils.update" => db_conn(state).and_then(|c| councils_update(c, &req.params)),
        "councils.add_member" => db_conn(state).and_then(|c| councils_add_member(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

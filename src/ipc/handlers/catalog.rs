use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, require_actor, require_role, required_str, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

// Reference data shared by the whole system: majors, school years,
// council positions, grading criteria. Anonymous callers may list;
// creation is staff work.

fn list_named(conn: &Connection, table: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("SELECT id, name FROM {} ORDER BY name", table))
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

fn create_named(
    conn: &Connection,
    params: &serde_json::Value,
    table: &str,
    label: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let name = required_str(params, "name")?;
    let taken: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE name = ?", table),
            [&name],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if taken.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!("{} already exists", label),
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        &format!("INSERT INTO {}(id, name) VALUES(?, ?)", table),
        (&id, &name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id, "name": name }))
}

fn criteria_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, evaluation_method FROM criteria ORDER BY name")
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let method: String = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "evaluationMethod": method }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

fn criteria_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let name = required_str(params, "name")?;
    let method = required_str(params, "evaluationMethod")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO criteria(id, name, evaluation_method) VALUES(?, ?, ?)",
        (&id, &name, &method),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id, "name": name, "evaluationMethod": method }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "majors.list" => db_conn(state).and_then(|c| list_named(c, "majors")),
        "majors.create" => db_conn(state).and_then(|c| create_named(c, &req.params, "majors", "major")),
        "school_years.list" => db_conn(state).and_then(|c| list_named(c, "school_years")),
        "school_years.create" => {
            db_conn(state).and_then(|c| create_named(c, &req.params, "school_years", "school year"))
        }
        "positions.list" => db_conn(state).and_then(|c| list_named(c, "positions")),
        "positions.create" => {
            db_conn(state).and_then(|c| create_named(c, &req.params, "positions", "position"))
        }
        "criteria.list" => db_conn(state).and_then(criteria_list),
        "criteria.create" => db_conn(state).and_then(|c| criteria_create(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

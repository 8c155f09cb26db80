use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, optional_str, page_envelope, page_param, require_actor, require_role, required_str,
    HandlerErr, Role, PAGE_SIZE,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let student_no: String = r.get(1)?;
    let full_name: String = r.get(2)?;
    let major_id: String = r.get(3)?;
    let major_name: String = r.get(4)?;
    let user_id: Option<String> = r.get(5)?;
    let thesis_id: Option<String> = r.get(6)?;
    Ok(json!({
        "id": id,
        "studentNo": student_no,
        "fullName": full_name,
        "majorId": major_id,
        "majorName": major_name,
        "userId": user_id,
        "thesisId": thesis_id,
    }))
}

const STUDENT_SELECT: &str = "SELECT s.id, s.student_no, s.full_name, s.major_id, m.name, s.user_id, ts.thesis_id
     FROM students s
     JOIN majors m ON m.id = s.major_id
     LEFT JOIN thesis_students ts ON ts.student_id = s.id";

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = page_param(params)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(q) = optional_str(params, "q") {
        clauses.push("LOWER(s.full_name) LIKE ?");
        args.push(Value::Text(format!("%{}%", q.to_lowercase())));
    }
    if let Some(major_id) = optional_str(params, "majorId") {
        clauses.push("s.major_id = ?");
        args.push(Value::Text(major_id));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM students s JOIN majors m ON m.id = s.major_id {}",
                where_sql
            ),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(&format!(
            "{} {} ORDER BY s.full_name LIMIT ? OFFSET ?",
            STUDENT_SELECT, where_sql
        ))
        .map_err(HandlerErr::db)?;
    args.push(Value::Integer(PAGE_SIZE));
    args.push(Value::Integer((page - 1) * PAGE_SIZE));
    let items = stmt
        .query_map(params_from_iter(args.iter()), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(page_envelope(page, total, items))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let full_name = required_str(params, "fullName")?;
    let student_no = required_str(params, "studentNo")?;
    let major_id = required_str(params, "majorId")?;
    let user_id = optional_str(params, "userId");

    let major: Option<i64> = conn
        .query_row("SELECT 1 FROM majors WHERE id = ?", [&major_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if major.is_none() {
        return Err(HandlerErr::new("not_found", "major not found"));
    }

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_no = ?",
            [&student_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "student number already taken"));
    }

    if let Some(uid) = &user_id {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE id = ?", [uid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db)?;
        if found.is_none() {
            return Err(HandlerErr::new("not_found", "user not found"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, user_id, student_no, full_name, major_id) VALUES(?, ?, ?, ?, ?)",
        (&id, &user_id, &student_no, &full_name, &major_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    students_get_by_id(conn, &id)
}

fn students_get_by_id(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", STUDENT_SELECT),
        [student_id],
        student_json,
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    students_get_by_id(conn, &student_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "students.list" => db_conn(state).and_then(|c| students_list(c, &req.params)),
        "students.create" => db_conn(state).and_then(|c| students_create(c, &req.params)),
        "students.get" => db_conn(state).and_then(|c| students_get(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

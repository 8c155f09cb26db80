use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, from_calc, is_constraint_violation, optional_str, page_envelope, page_param,
    require_actor, require_role, required_f64, required_str, HandlerErr, Role, PAGE_SIZE,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub(super) const THESIS_SELECT: &str =
    "SELECT t.id, t.code, t.name, t.major_id, m.name, t.school_year_id, sy.name,
            t.council_id, c.name, t.total_score, t.created_at
     FROM theses t
     JOIN majors m ON m.id = t.major_id
     JOIN school_years sy ON sy.id = t.school_year_id
     LEFT JOIN councils c ON c.id = t.council_id";

pub(super) fn thesis_row_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let code: String = r.get(1)?;
    let name: String = r.get(2)?;
    let major_id: String = r.get(3)?;
    let major_name: String = r.get(4)?;
    let school_year_id: String = r.get(5)?;
    let school_year_name: String = r.get(6)?;
    let council_id: Option<String> = r.get(7)?;
    let council_name: Option<String> = r.get(8)?;
    let total_score: Option<f64> = r.get(9)?;
    let created_at: String = r.get(10)?;
    Ok(json!({
        "id": id,
        "code": code,
        "name": name,
        "majorId": major_id,
        "majorName": major_name,
        "schoolYearId": school_year_id,
        "schoolYearName": school_year_name,
        "councilId": council_id,
        "councilName": council_name,
        "totalScore": total_score,
        "createdAt": created_at,
    }))
}

fn thesis_by_id(conn: &Connection, thesis_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE t.id = ?", THESIS_SELECT),
        [thesis_id],
        thesis_row_json,
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "thesis not found"))
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db)
}

fn theses_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = page_param(params)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(q) = optional_str(params, "q") {
        clauses.push("(LOWER(t.name) LIKE ? OR LOWER(t.code) LIKE ?)");
        let needle = format!("%{}%", q.to_lowercase());
        args.push(Value::Text(needle.clone()));
        args.push(Value::Text(needle));
    }
    if let Some(major_id) = optional_str(params, "majorId") {
        clauses.push("t.major_id = ?");
        args.push(Value::Text(major_id));
    }
    if let Some(school_year_id) = optional_str(params, "schoolYearId") {
        clauses.push("t.school_year_id = ?");
        args.push(Value::Text(school_year_id));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM theses t {}", where_sql),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(&format!(
            "{} {} ORDER BY t.code LIMIT ? OFFSET ?",
            THESIS_SELECT, where_sql
        ))
        .map_err(HandlerErr::db)?;
    args.push(Value::Integer(PAGE_SIZE));
    args.push(Value::Integer((page - 1) * PAGE_SIZE));
    let items = stmt
        .query_map(params_from_iter(args.iter()), thesis_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(page_envelope(page, total, items))
}

fn theses_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let code = required_str(params, "code")?;
    let name = required_str(params, "name")?;
    let major_id = required_str(params, "majorId")?;
    let school_year_id = required_str(params, "schoolYearId")?;
    let council_id = optional_str(params, "councilId");

    if !exists(conn, "SELECT 1 FROM majors WHERE id = ?", &major_id)? {
        return Err(HandlerErr::new("not_found", "major not found"));
    }
    if !exists(conn, "SELECT 1 FROM school_years WHERE id = ?", &school_year_id)? {
        return Err(HandlerErr::new("not_found", "school year not found"));
    }
    if let Some(cid) = &council_id {
        if !exists(conn, "SELECT 1 FROM councils WHERE id = ?", cid)? {
            return Err(HandlerErr::new("not_found", "council not found"));
        }
    }
    if exists(conn, "SELECT 1 FROM theses WHERE code = ?", &code)? {
        return Err(HandlerErr::new("conflict", "thesis code already taken"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO theses(id, code, name, major_id, school_year_id, council_id, total_score, created_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, ?)",
        (
            &id,
            &code,
            &name,
            &major_id,
            &school_year_id,
            &council_id,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    thesis_by_id(conn, &id)
}

fn theses_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_id = required_str(params, "thesisId")?;
    let mut thesis = thesis_by_id(conn, &thesis_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT l.id, l.full_name
             FROM thesis_lecturers tl
             JOIN lecturers l ON l.id = tl.lecturer_id
             WHERE tl.thesis_id = ?
             ORDER BY l.full_name",
        )
        .map_err(HandlerErr::db)?;
    let supervisors = stmt
        .query_map([&thesis_id], |r| {
            let id: String = r.get(0)?;
            let full_name: String = r.get(1)?;
            Ok(json!({ "lecturerId": id, "fullName": full_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.full_name, s.student_no
             FROM thesis_students ts
             JOIN students s ON s.id = ts.student_id
             WHERE ts.thesis_id = ?
             ORDER BY s.full_name",
        )
        .map_err(HandlerErr::db)?;
    let students = stmt
        .query_map([&thesis_id], |r| {
            let id: String = r.get(0)?;
            let full_name: String = r.get(1)?;
            let student_no: String = r.get(2)?;
            Ok(json!({ "studentId": id, "fullName": full_name, "studentNo": student_no }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let criteria = calc::list_criteria(conn, &thesis_id).map_err(from_calc)?;
    let weight_spent = calc::weight_spent(conn, &thesis_id).map_err(from_calc)?;

    thesis["supervisors"] = json!(supervisors);
    thesis["students"] = json!(students);
    thesis["criteria"] = json!(criteria);
    thesis["weightSpent"] = json!(weight_spent);
    Ok(thesis)
}

fn theses_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let thesis_id = required_str(params, "thesisId")?;
    if !exists(conn, "SELECT 1 FROM theses WHERE id = ?", &thesis_id)? {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }

    if let Some(name) = optional_str(params, "name") {
        conn.execute(
            "UPDATE theses SET name = ? WHERE id = ?",
            (&name, &thesis_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(school_year_id) = optional_str(params, "schoolYearId") {
        if !exists(conn, "SELECT 1 FROM school_years WHERE id = ?", &school_year_id)? {
            return Err(HandlerErr::new("not_found", "school year not found"));
        }
        conn.execute(
            "UPDATE theses SET school_year_id = ? WHERE id = ?",
            (&school_year_id, &thesis_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    match params.get("councilId") {
        None => {}
        Some(v) if v.is_null() => {
            conn.execute(
                "UPDATE theses SET council_id = NULL WHERE id = ?",
                [&thesis_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        Some(_) => {
            let council_id = required_str(params, "councilId")?;
            if !exists(conn, "SELECT 1 FROM councils WHERE id = ?", &council_id)? {
                return Err(HandlerErr::new("not_found", "council not found"));
            }
            conn.execute(
                "UPDATE theses SET council_id = ? WHERE id = ?",
                (&council_id, &thesis_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }

    // Council reassignment changes which memberships count.
    calc::recompute_total_score(conn, &thesis_id).map_err(from_calc)?;
    thesis_by_id(conn, &thesis_id)
}

fn theses_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let thesis_id = required_str(params, "thesisId")?;
    if !exists(conn, "SELECT 1 FROM theses WHERE id = ?", &thesis_id)? {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicit delete in dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        (
            "DELETE FROM scores WHERE thesis_criteria_id IN (
               SELECT id FROM thesis_criteria WHERE thesis_id = ?
             )",
            "scores",
        ),
        ("DELETE FROM thesis_criteria WHERE thesis_id = ?", "thesis_criteria"),
        ("DELETE FROM thesis_students WHERE thesis_id = ?", "thesis_students"),
        ("DELETE FROM thesis_lecturers WHERE thesis_id = ?", "thesis_lecturers"),
        ("DELETE FROM theses WHERE id = ?", "theses"),
    ] {
        if let Err(e) = tx.execute(sql, [&thesis_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "deleted": true, "thesisId": thesis_id }))
}

fn theses_add_lecturer(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let thesis_id = required_str(params, "thesisId")?;
    let lecturer_id = required_str(params, "lecturerId")?;

    if !exists(conn, "SELECT 1 FROM theses WHERE id = ?", &thesis_id)? {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }
    let supervisor_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM thesis_lecturers WHERE thesis_id = ?",
            [&thesis_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if supervisor_count >= 2 {
        return Err(HandlerErr::new(
            "validation",
            "thesis already has two supervisors",
        ));
    }
    if !exists(conn, "SELECT 1 FROM lecturers WHERE id = ?", &lecturer_id)? {
        return Err(HandlerErr::new("not_found", "lecturer not found"));
    }
    let assigned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM thesis_lecturers WHERE thesis_id = ? AND lecturer_id = ?",
            (&thesis_id, &lecturer_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if assigned.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "lecturer already assigned to this thesis",
        ));
    }

    conn.execute(
        "INSERT INTO thesis_lecturers(thesis_id, lecturer_id) VALUES(?, ?)",
        (&thesis_id, &lecturer_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "thesisId": thesis_id, "lecturerId": lecturer_id }))
}

fn theses_add_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let thesis_id = required_str(params, "thesisId")?;
    let student_id = required_str(params, "studentId")?;

    let thesis_major: Option<String> = conn
        .query_row(
            "SELECT major_id FROM theses WHERE id = ?",
            [&thesis_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(thesis_major) = thesis_major else {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    };

    let student_major: Option<String> = conn
        .query_row(
            "SELECT major_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(student_major) = student_major else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let assigned: Option<String> = conn
        .query_row(
            "SELECT thesis_id FROM thesis_students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(existing) = assigned {
        return Err(HandlerErr::with_details(
            "conflict",
            "student already assigned to a thesis",
            json!({ "thesisId": existing }),
        ));
    }

    if student_major != thesis_major {
        return Err(HandlerErr::with_details(
            "validation",
            "student's major does not match the thesis's major",
            json!({ "thesisMajorId": thesis_major, "studentMajorId": student_major }),
        ));
    }

    if let Err(e) = conn.execute(
        "INSERT INTO thesis_students(thesis_id, student_id) VALUES(?, ?)",
        (&thesis_id, &student_id),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::new(
                "conflict",
                "student already assigned to a thesis",
            ));
        }
        return Err(HandlerErr::new("db_insert_failed", e.to_string()));
    }

    Ok(json!({ "thesisId": thesis_id, "studentId": student_id }))
}

fn theses_add_criteria(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Staff)?;

    let thesis_id = required_str(params, "thesisId")?;
    let criteria_id = required_str(params, "criteriaId")?;
    let weight = required_f64(params, "weight")?;

    if !exists(conn, "SELECT 1 FROM theses WHERE id = ?", &thesis_id)? {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }
    if !exists(conn, "SELECT 1 FROM criteria WHERE id = ?", &criteria_id)? {
        return Err(HandlerErr::new("not_found", "criteria not found"));
    }
    let attached: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM thesis_criteria WHERE thesis_id = ? AND criteria_id = ?",
            (&thesis_id, &criteria_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if attached.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "criteria already attached to this thesis",
        ));
    }
    if !(0.0..=1.0).contains(&weight) {
        return Err(HandlerErr::with_details(
            "validation",
            "weight must be within [0, 1]",
            json!({ "weight": weight }),
        ));
    }

    let spent = calc::weight_spent(conn, &thesis_id).map_err(from_calc)?;
    if spent + weight > calc::WEIGHT_BUDGET + calc::WEIGHT_EPS {
        return Err(HandlerErr::with_details(
            "validation",
            "criteria weights for a thesis cannot exceed 1.0",
            json!({ "weightSpent": spent, "requested": weight }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO thesis_criteria(id, thesis_id, criteria_id, weight) VALUES(?, ?, ?, ?)",
        (&id, &thesis_id, &criteria_id, weight),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::new(
                "conflict",
                "criteria already attached to this thesis",
            ));
        }
        return Err(HandlerErr::new("db_insert_failed", e.to_string()));
    }

    calc::recompute_total_score(conn, &thesis_id).map_err(from_calc)?;

    Ok(json!({
        "thesisCriteriaId": id,
        "thesisId": thesis_id,
        "criteriaId": criteria_id,
        "weight": weight,
        "weightSpent": spent + weight,
    }))
}

fn theses_criteria(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_id = required_str(params, "thesisId")?;
    if !exists(conn, "SELECT 1 FROM theses WHERE id = ?", &thesis_id)? {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }
    let items = calc::list_criteria(conn, &thesis_id).map_err(from_calc)?;
    let spent = calc::weight_spent(conn, &thesis_id).map_err(from_calc)?;
    Ok(json!({
        "items": items,
        "weightSpent": spent,
        "weightRemaining": (calc::WEIGHT_BUDGET - spent).max(0.0),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "theses.list" => db_conn(state).and_then(|c| theses_list(c, &req.params)),
        "theses.create" => db_conn(state).and_then(|c| theses_create(c, &req.params)),
        "theses.get" => db_conn(state).and_then(|c| theses_get(c, &req.params)),
        "theses.update" => db_conn(state).and_then(|c| theses_update(c, &req.params)),
        "theses.delete" => db_conn(state).and_then(|c| theses_delete(c, &req.params)),
        "theses.add_lecturer" => db_conn(state).and_then(|c| theses_add_lecturer(c, &req.params)),
        "theses.add_student" => db_conn(state).and_then(|c| theses_add_student(c, &req.params)),
        "theses.add_criteria" => db_conn(state).and_then(|c| theses_add_criteria(c, &req.params)),
        "theses.criteria" => db_conn(state).and_then(|c| theses_criteria(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

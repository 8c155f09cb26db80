use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, from_calc, is_constraint_violation, require_lecturer_actor, required_f64,
    required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn check_score_range(value: f64) -> Result<(), HandlerErr> {
    if !(calc::SCORE_MIN..=calc::SCORE_MAX).contains(&value) {
        return Err(HandlerErr::with_details(
            "validation",
            "score must be within [0, 10]",
            json!({ "scoreNumber": value }),
        ));
    }
    Ok(())
}

fn scores_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_criteria_id = required_str(params, "thesisCriteriaId")?;
    let score_number = required_f64(params, "scoreNumber")?;

    let target: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT tc.thesis_id, t.council_id
             FROM thesis_criteria tc
             JOIN theses t ON t.id = tc.thesis_id
             WHERE tc.id = ?",
            [&thesis_criteria_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((thesis_id, council_id)) = target else {
        return Err(HandlerErr::new("not_found", "thesis criteria not found"));
    };

    let (_, lecturer_id) = require_lecturer_actor(conn, params)?;

    let Some(council_id) = council_id else {
        return Err(HandlerErr::new(
            "forbidden",
            "caller is not a member of the thesis's grading council",
        ));
    };
    let membership: Option<(String, i64)> = conn
        .query_row(
            "SELECT cd.id, c.is_lock
             FROM council_details cd
             JOIN councils c ON c.id = cd.council_id
             WHERE cd.council_id = ? AND cd.lecturer_id = ?",
            (&council_id, &lecturer_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((council_detail_id, is_lock)) = membership else {
        return Err(HandlerErr::new(
            "forbidden",
            "caller is not a member of the thesis's grading council",
        ));
    };
    if is_lock != 0 {
        return Err(HandlerErr::new("locked", "council is locked"));
    }

    check_score_range(score_number)?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM scores WHERE thesis_criteria_id = ? AND council_detail_id = ?",
            (&thesis_criteria_id, &council_detail_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if existing.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "score already recorded for this criterion",
        ));
    }

    let id = Uuid::new_v4().to_string();
    // The UNIQUE constraint serializes racing submissions; the loser
    // surfaces as a conflict, not a crash.
    if let Err(e) = conn.execute(
        "INSERT INTO scores(id, thesis_criteria_id, council_detail_id, score_number, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, NULL)",
        (
            &id,
            &thesis_criteria_id,
            &council_detail_id,
            score_number,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::new(
                "conflict",
                "score already recorded for this criterion",
            ));
        }
        return Err(HandlerErr::new("db_insert_failed", e.to_string()));
    }

    let total = calc::recompute_total_score(conn, &thesis_id).map_err(from_calc)?;

    Ok(json!({
        "id": id,
        "thesisId": thesis_id,
        "thesisCriteriaId": thesis_criteria_id,
        "councilDetailId": council_detail_id,
        "scoreNumber": score_number,
        "totalScore": total,
    }))
}

fn scores_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let score_id = required_str(params, "scoreId")?;
    let score_number = required_f64(params, "scoreNumber")?;

    let row: Option<(String, String, i64, String)> = conn
        .query_row(
            "SELECT s.thesis_criteria_id, cd.lecturer_id, c.is_lock, tc.thesis_id
             FROM scores s
             JOIN council_details cd ON cd.id = s.council_detail_id
             JOIN councils c ON c.id = cd.council_id
             JOIN thesis_criteria tc ON tc.id = s.thesis_criteria_id
             WHERE s.id = ?",
            [&score_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((thesis_criteria_id, owner_lecturer_id, is_lock, thesis_id)) = row else {
        return Err(HandlerErr::new("not_found", "score not found"));
    };

    let (_, lecturer_id) = require_lecturer_actor(conn, params)?;
    if lecturer_id != owner_lecturer_id {
        return Err(HandlerErr::new(
            "forbidden",
            "only the original scorer may edit this score",
        ));
    }
    if is_lock != 0 {
        return Err(HandlerErr::new("locked", "council is locked"));
    }

    check_score_range(score_number)?;

    // Edited in place, never re-created.
    conn.execute(
        "UPDATE scores SET score_number = ?, updated_at = ? WHERE id = ?",
        (score_number, chrono::Utc::now().to_rfc3339(), &score_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let total = calc::recompute_total_score(conn, &thesis_id).map_err(from_calc)?;

    Ok(json!({
        "id": score_id,
        "thesisId": thesis_id,
        "thesisCriteriaId": thesis_criteria_id,
        "scoreNumber": score_number,
        "totalScore": total,
    }))
}

fn scores_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let thesis_id = required_str(params, "thesisId")?;
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM theses WHERE id = ?", [&thesis_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "thesis not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.thesis_criteria_id, cr.name, s.council_detail_id,
                    l.id, l.full_name, s.score_number, s.created_at, s.updated_at
             FROM scores s
             JOIN thesis_criteria tc ON tc.id = s.thesis_criteria_id
             JOIN criteria cr ON cr.id = tc.criteria_id
             JOIN council_details cd ON cd.id = s.council_detail_id
             JOIN lecturers l ON l.id = cd.lecturer_id
             WHERE tc.thesis_id = ?
             ORDER BY cr.name, l.full_name",
        )
        .map_err(HandlerErr::db)?;
    let items = stmt
        .query_map([&thesis_id], |r| {
            let id: String = r.get(0)?;
            let thesis_criteria_id: String = r.get(1)?;
            let criteria_name: String = r.get(2)?;
            let council_detail_id: String = r.get(3)?;
            let lecturer_id: String = r.get(4)?;
            let lecturer_name: String = r.get(5)?;
            let score_number: f64 = r.get(6)?;
            let created_at: String = r.get(7)?;
            let updated_at: Option<String> = r.get(8)?;
            Ok(json!({
                "id": id,
                "thesisCriteriaId": thesis_criteria_id,
                "criteriaName": criteria_name,
                "councilDetailId": council_detail_id,
                "lecturerId": lecturer_id,
                "lecturerName": lecturer_name,
                "scoreNumber": score_number,
                "createdAt": created_at,
                "updatedAt": updated_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "items": items }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "scores.create" => db_conn(state).and_then(|c| scores_create(c, &req.params)),
        "scores.update" => db_conn(state).and_then(|c| scores_update(c, &req.params)),
        "scores.list" => db_conn(state).and_then(|c| scores_list(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, require_actor, require_role, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

// Ministry-level aggregates over finished grading. AVG skips theses
// that have no total yet; scoredCount reports how many contributed.

fn grouped(conn: &Connection, sql: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db)?;
    stmt.query_map([], |r| {
        let name: String = r.get(0)?;
        let thesis_count: i64 = r.get(1)?;
        let scored_count: i64 = r.get(2)?;
        let avg: Option<f64> = r.get(3)?;
        Ok(json!({
            "name": name,
            "thesisCount": thesis_count,
            "scoredCount": scored_count,
            "averageTotalScore": avg.map(calc::round2),
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn stats_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(conn, params)?;
    require_role(&actor, Role::Ministry)?;

    let by_school_year = grouped(
        conn,
        "SELECT sy.name, COUNT(t.id), COUNT(t.total_score), AVG(t.total_score)
         FROM school_years sy
         LEFT JOIN theses t ON t.school_year_id = sy.id
         GROUP BY sy.id, sy.name
         ORDER BY sy.name",
    )?;
    let by_major = grouped(
        conn,
        "SELECT m.name, COUNT(t.id), COUNT(t.total_score), AVG(t.total_score)
         FROM majors m
         LEFT JOIN theses t ON t.major_id = m.id
         GROUP BY m.id, m.name
         ORDER BY m.name",
    )?;

    Ok(json!({
        "bySchoolYear": by_school_year,
        "byMajor": by_major,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "stats.summary" => db_conn(state).and_then(|c| stats_summary(c, &req.params)),
        _ => return None,
    };
    Some(match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

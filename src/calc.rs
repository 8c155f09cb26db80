use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;
pub const WEIGHT_BUDGET: f64 = 1.0;

/// Tolerance on the per-thesis weight budget so fractional weights that
/// sum to 1.0 on paper are not rejected over float dust.
pub const WEIGHT_EPS: f64 = 1e-9;

/// Half-up rounding to 2 decimals applied to every reported score:
/// `Int(100*x + 0.5) / 100`.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Weight already allocated to a thesis across its attached criteria.
pub fn weight_spent(conn: &Connection, thesis_id: &str) -> Result<f64, CalcError> {
    conn.query_row(
        "SELECT COALESCE(SUM(weight), 0.0) FROM thesis_criteria WHERE thesis_id = ?",
        [thesis_id],
        |r| r.get(0),
    )
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LecturerScore {
    pub council_detail_id: String,
    pub lecturer_id: String,
    pub lecturer_name: String,
    pub position_name: String,
    pub weighted_total: f64,
    pub scored_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaLine {
    pub thesis_criteria_id: String,
    pub criteria_id: String,
    pub name: String,
    pub evaluation_method: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheet {
    pub thesis_id: String,
    pub thesis_code: String,
    pub thesis_name: String,
    pub major_name: String,
    pub school_year_name: String,
    pub council_name: Option<String>,
    pub students: Vec<String>,
    pub supervisors: Vec<String>,
    pub criteria: Vec<CriteriaLine>,
    pub lecturer_scores: Vec<LecturerScore>,
    pub total_score: Option<f64>,
}

/// Per council member: Σ score × weight over the scores that member has
/// recorded for the thesis's criteria. Only memberships of the thesis's
/// current council count; rows left behind by a council swap drop out of
/// the aggregate.
pub fn compute_lecturer_scores(
    conn: &Connection,
    thesis_id: &str,
) -> Result<Vec<LecturerScore>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT cd.id, l.id, l.full_name, p.name,
                    SUM(s.score_number * tc.weight), COUNT(s.id)
             FROM scores s
             JOIN thesis_criteria tc ON tc.id = s.thesis_criteria_id
             JOIN theses t ON t.id = tc.thesis_id
             JOIN council_details cd ON cd.id = s.council_detail_id
                  AND cd.council_id = t.council_id
             JOIN lecturers l ON l.id = cd.lecturer_id
             JOIN positions p ON p.id = cd.position_id
             WHERE tc.thesis_id = ?
             GROUP BY cd.id, l.id, l.full_name, p.name
             ORDER BY p.name, l.full_name",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    stmt.query_map([thesis_id], |r| {
        let weighted: f64 = r.get(4)?;
        Ok(LecturerScore {
            council_detail_id: r.get(0)?,
            lecturer_id: r.get(1)?,
            lecturer_name: r.get(2)?,
            position_name: r.get(3)?,
            weighted_total: round2(weighted),
            scored_count: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Thesis total: mean of the weighted totals of members who have scored
/// at least one criterion. With Σweight ≤ 1 each member's total already
/// sits on the 0..10 scale; the mean keeps the thesis there regardless
/// of council size.
pub fn total_from_lecturer_scores(rows: &[LecturerScore]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let sum: f64 = rows.iter().map(|r| r.weighted_total).sum();
    Some(round2(sum / rows.len() as f64))
}

/// Re-derives `theses.total_score` from the raw score rows and persists
/// it. Invoked from every mutation site of its inputs; the stored column
/// is a convenience for list views, never a trusted cache.
pub fn recompute_total_score(
    conn: &Connection,
    thesis_id: &str,
) -> Result<Option<f64>, CalcError> {
    let rows = compute_lecturer_scores(conn, thesis_id)?;
    let total = total_from_lecturer_scores(&rows);
    conn.execute(
        "UPDATE theses SET total_score = ? WHERE id = ?",
        (total, thesis_id),
    )
    .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    Ok(total)
}

pub fn list_criteria(conn: &Connection, thesis_id: &str) -> Result<Vec<CriteriaLine>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT tc.id, cr.id, cr.name, cr.evaluation_method, tc.weight
             FROM thesis_criteria tc
             JOIN criteria cr ON cr.id = tc.criteria_id
             WHERE tc.thesis_id = ?
             ORDER BY cr.name",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([thesis_id], |r| {
        Ok(CriteriaLine {
            thesis_criteria_id: r.get(0)?,
            criteria_id: r.get(1)?,
            name: r.get(2)?,
            evaluation_method: r.get(3)?,
            weight: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

pub fn build_score_sheet(conn: &Connection, thesis_id: &str) -> Result<ScoreSheet, CalcError> {
    let head: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT t.code, t.name, m.name, sy.name, c.name
             FROM theses t
             JOIN majors m ON m.id = t.major_id
             JOIN school_years sy ON sy.id = t.school_year_id
             LEFT JOIN councils c ON c.id = t.council_id
             WHERE t.id = ?",
            [thesis_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let Some((code, name, major_name, school_year_name, council_name)) = head else {
        return Err(CalcError::new("not_found", "thesis not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT s.full_name, s.student_no
             FROM thesis_students ts
             JOIN students s ON s.id = ts.student_id
             WHERE ts.thesis_id = ?
             ORDER BY s.full_name",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let students = stmt
        .query_map([thesis_id], |r| {
            let full_name: String = r.get(0)?;
            let student_no: String = r.get(1)?;
            Ok(format!("{} ({})", full_name, student_no))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT l.full_name
             FROM thesis_lecturers tl
             JOIN lecturers l ON l.id = tl.lecturer_id
             WHERE tl.thesis_id = ?
             ORDER BY l.full_name",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let supervisors = stmt
        .query_map([thesis_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let criteria = list_criteria(conn, thesis_id)?;
    let lecturer_scores = compute_lecturer_scores(conn, thesis_id)?;
    let total_score = total_from_lecturer_scores(&lecturer_scores);

    Ok(ScoreSheet {
        thesis_id: thesis_id.to_string(),
        thesis_code: code,
        thesis_name: name,
        major_name,
        school_year_name,
        council_name,
        students,
        supervisors,
        criteria,
        lecturer_scores,
        total_score,
    })
}

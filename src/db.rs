use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("thesisd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL,
            avatar_path TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS majors(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS positions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturers(
            id TEXT PRIMARY KEY,
            user_id TEXT UNIQUE,
            full_name TEXT NOT NULL,
            faculty TEXT NOT NULL,
            degree TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lecturers_faculty ON lecturers(faculty)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT UNIQUE,
            student_no TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            major_id TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(major_id) REFERENCES majors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_major ON students(major_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS councils(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_lock INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS council_details(
            id TEXT PRIMARY KEY,
            council_id TEXT NOT NULL,
            lecturer_id TEXT NOT NULL,
            position_id TEXT NOT NULL,
            UNIQUE(council_id, lecturer_id),
            FOREIGN KEY(council_id) REFERENCES councils(id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id),
            FOREIGN KEY(position_id) REFERENCES positions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_council_details_council ON council_details(council_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_council_details_lecturer ON council_details(lecturer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS theses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            major_id TEXT NOT NULL,
            school_year_id TEXT NOT NULL,
            council_id TEXT,
            total_score REAL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(major_id) REFERENCES majors(id),
            FOREIGN KEY(school_year_id) REFERENCES school_years(id),
            FOREIGN KEY(council_id) REFERENCES councils(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_theses_major ON theses(major_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_theses_school_year ON theses(school_year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_theses_council ON theses(council_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS thesis_lecturers(
            thesis_id TEXT NOT NULL,
            lecturer_id TEXT NOT NULL,
            PRIMARY KEY(thesis_id, lecturer_id),
            FOREIGN KEY(thesis_id) REFERENCES theses(id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS thesis_students(
            thesis_id TEXT NOT NULL,
            student_id TEXT NOT NULL UNIQUE,
            PRIMARY KEY(thesis_id, student_id),
            FOREIGN KEY(thesis_id) REFERENCES theses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            evaluation_method TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS thesis_criteria(
            id TEXT PRIMARY KEY,
            thesis_id TEXT NOT NULL,
            criteria_id TEXT NOT NULL,
            weight REAL NOT NULL,
            UNIQUE(thesis_id, criteria_id),
            FOREIGN KEY(thesis_id) REFERENCES theses(id),
            FOREIGN KEY(criteria_id) REFERENCES criteria(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_thesis_criteria_thesis ON thesis_criteria(thesis_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            thesis_criteria_id TEXT NOT NULL,
            council_detail_id TEXT NOT NULL,
            score_number REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(thesis_criteria_id, council_detail_id),
            FOREIGN KEY(thesis_criteria_id) REFERENCES thesis_criteria(id),
            FOREIGN KEY(council_detail_id) REFERENCES council_details(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_thesis_criteria ON scores(thesis_criteria_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_council_detail ON scores(council_detail_id)",
        [],
    )?;

    Ok(conn)
}

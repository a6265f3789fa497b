use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "tpp.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL,
            school TEXT,
            grade TEXT,
            overall_average INTEGER,
            overall_performance_status TEXT,
            last_term_updated INTEGER,
            last_term_submitted_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(email)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            name TEXT NOT NULL,
            level INTEGER,
            final_percentage REAL,
            grade_average REAL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, term, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_records_student
         ON subject_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_records_student_term
         ON subject_records(student_id, term)",
        [],
    )?;

    // One row per (student, term): the persisted aggregate, overwritten
    // wholesale on every submit or re-aggregation.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_summaries(
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            average INTEGER NOT NULL,
            status TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            submitted_at TEXT,
            PRIMARY KEY(student_id, term),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_term_summaries_student
         ON term_summaries(student_id)",
        [],
    )?;

    Ok(conn)
}

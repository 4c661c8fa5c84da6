use crate::grading::{self, GpaEntry, GradeLetter};
use crate::reconcile::{Reconciliation, ScoreRecord};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            year INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            gpa REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_column(&conn, "students", "updated_at", "TEXT")?;
    for col in ["phone", "date_of_birth", "enrollment_date", "address"] {
        ensure_column(&conn, "students", col, "TEXT NOT NULL DEFAULT ''")?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credits INTEGER NOT NULL,
            department TEXT NOT NULL DEFAULT '',
            semester TEXT NOT NULL DEFAULT '',
            capacity INTEGER NOT NULL DEFAULT 0,
            enrollment_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;
    for col in ["description", "schedule", "room"] {
        ensure_column(&conn, "courses", col, "TEXT NOT NULL DEFAULT ''")?;
    }

    // No UNIQUE(student_id, course_id): restored or legacy data may carry
    // duplicates, and bulk updates must be able to see them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            score REAL NOT NULL,
            grade TEXT NOT NULL,
            credits INTEGER NOT NULL,
            semester TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_column(&conn, "grades", "updated_at", "TEXT")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_course_student ON grades(course_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            enrollment_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course_student ON enrollments(course_id, student_id)",
        [],
    )?;

    Ok(conn)
}

/// Adds `column` to `table` when a workspace predates it.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
        [],
    )
    .with_context(|| format!("failed to add {}.{}", table, column))?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn today_stamp() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub enrollment_date: String,
    pub year: i64,
    pub status: String,
    pub address: String,
    pub gpa: f64,
    /// Courses the student is actively enrolled in.
    pub course_ids: Vec<i64>,
    pub updated_at: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudentFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub enrollment_date: Option<String>,
    pub year: Option<i64>,
    pub status: Option<String>,
    pub address: Option<String>,
}

const STUDENT_COLUMNS: &str = "id, first_name, last_name, email, phone, date_of_birth, \
     enrollment_date, year, status, address, gpa, updated_at";

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        date_of_birth: row.get(5)?,
        enrollment_date: row.get(6)?,
        year: row.get(7)?,
        status: row.get(8)?,
        address: row.get(9)?,
        gpa: row.get(10)?,
        course_ids: Vec::new(),
        updated_at: row.get(11)?,
    })
}

/// Active enrollments grouped by student, course ids in enrollment order.
fn active_course_ids(conn: &Connection) -> anyhow::Result<HashMap<i64, Vec<i64>>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, course_id FROM enrollments WHERE status = 'active' ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
    while let Some(row) = rows.next()? {
        out.entry(row.get(0)?).or_default().push(row.get(1)?);
    }
    Ok(out)
}

pub fn students_list(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let sql = format!("SELECT {} FROM students ORDER BY id", STUDENT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut enrolled = active_course_ids(conn)?;
    for s in &mut rows {
        s.course_ids = enrolled.remove(&s.id).unwrap_or_default();
    }
    Ok(rows)
}

pub fn student_get(conn: &Connection, id: i64) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    let Some(mut s) = conn.query_row(&sql, [id], student_from_row).optional()? else {
        return Ok(None);
    };
    s.course_ids = enrollments_for(conn, Some(id), None)?
        .into_iter()
        .filter(|e| e.status == "active")
        .map(|e| e.course_id)
        .collect();
    Ok(Some(s))
}

/// `first_name` and `last_name` must be present; the rest fall back to column
/// defaults, and the enrollment date to today.
pub fn student_insert(conn: &Connection, f: &StudentFields) -> anyhow::Result<i64> {
    let today = today_stamp();
    conn.execute(
        "INSERT INTO students(first_name, last_name, email, phone, date_of_birth, enrollment_date,
                              year, status, address, gpa, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        rusqlite::params![
            f.first_name.as_deref().unwrap_or(""),
            f.last_name.as_deref().unwrap_or(""),
            f.email.as_deref().unwrap_or(""),
            f.phone.as_deref().unwrap_or(""),
            f.date_of_birth.as_deref().unwrap_or(""),
            f.enrollment_date.as_deref().unwrap_or(&today),
            f.year.unwrap_or(1),
            f.status.as_deref().unwrap_or("active"),
            f.address.as_deref().unwrap_or(""),
            now_stamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn student_update(conn: &Connection, id: i64, f: &StudentFields) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE students SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            date_of_birth = COALESCE(?, date_of_birth),
            enrollment_date = COALESCE(?, enrollment_date),
            year = COALESCE(?, year),
            status = COALESCE(?, status),
            address = COALESCE(?, address),
            updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            f.first_name.as_deref(),
            f.last_name.as_deref(),
            f.email.as_deref(),
            f.phone.as_deref(),
            f.date_of_birth.as_deref(),
            f.enrollment_date.as_deref(),
            f.year,
            f.status.as_deref(),
            f.address.as_deref(),
            now_stamp(),
            id,
        ],
    )?;
    Ok(changed > 0)
}

/// Removes the student with every grade and enrollment recorded for them.
pub fn student_delete(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [id])?;
    release_student_enrollments(&tx, id)?;
    let changed = tx.execute("DELETE FROM students WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(changed > 0)
}

pub fn student_exists(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// GPA inputs for a student straight from stored letter symbols, so letters
/// the scale does not know still take part (as 0.0 points).
pub fn student_gpa_entries(conn: &Connection, student_id: i64) -> anyhow::Result<Vec<GpaEntry>> {
    let mut stmt =
        conn.prepare("SELECT grade, credits FROM grades WHERE student_id = ? ORDER BY id")?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(GpaEntry {
                letter: r.get(0)?,
                credits: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Recomputes and stores the cached GPA for a student.
pub fn refresh_student_gpa(conn: &Connection, student_id: i64) -> anyhow::Result<f64> {
    let entries = student_gpa_entries(conn, student_id)?;
    let gpa = grading::compute_gpa(&entries);
    conn.execute(
        "UPDATE students SET gpa = ?, updated_at = ? WHERE id = ?",
        (gpa, now_stamp(), student_id),
    )?;
    Ok(gpa)
}

// ---------------------------------------------------------------------------
// Courses

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub credits: i64,
    pub department: String,
    pub semester: String,
    pub schedule: String,
    pub room: String,
    pub capacity: i64,
    pub enrollment_count: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct CourseFields {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub credits: Option<i64>,
    pub department: Option<String>,
    pub semester: Option<String>,
    pub schedule: Option<String>,
    pub room: Option<String>,
    pub capacity: Option<i64>,
    pub enrollment_count: Option<i64>,
    pub status: Option<String>,
}

const COURSE_COLUMNS: &str = "id, code, name, description, credits, department, semester, \
     schedule, room, capacity, enrollment_count, status";

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        credits: row.get(4)?,
        department: row.get(5)?,
        semester: row.get(6)?,
        schedule: row.get(7)?,
        room: row.get(8)?,
        capacity: row.get(9)?,
        enrollment_count: row.get(10)?,
        status: row.get(11)?,
    })
}

pub fn courses_list(conn: &Connection) -> anyhow::Result<Vec<Course>> {
    let sql = format!("SELECT {} FROM courses ORDER BY id", COURSE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn course_get(conn: &Connection, id: i64) -> anyhow::Result<Option<Course>> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    Ok(conn.query_row(&sql, [id], course_from_row).optional()?)
}

pub fn course_insert(conn: &Connection, f: &CourseFields) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO courses(code, name, description, credits, department, semester, schedule, room,
                             capacity, enrollment_count, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            f.code.as_deref().unwrap_or(""),
            f.name.as_deref().unwrap_or(""),
            f.description.as_deref().unwrap_or(""),
            f.credits.unwrap_or(crate::reconcile::DEFAULT_CREDITS),
            f.department.as_deref().unwrap_or(""),
            f.semester.as_deref().unwrap_or(""),
            f.schedule.as_deref().unwrap_or(""),
            f.room.as_deref().unwrap_or(""),
            f.capacity.unwrap_or(0),
            f.enrollment_count.unwrap_or(0),
            f.status.as_deref().unwrap_or("active"),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn course_update(conn: &Connection, id: i64, f: &CourseFields) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE courses SET
            code = COALESCE(?, code),
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            credits = COALESCE(?, credits),
            department = COALESCE(?, department),
            semester = COALESCE(?, semester),
            schedule = COALESCE(?, schedule),
            room = COALESCE(?, room),
            capacity = COALESCE(?, capacity),
            enrollment_count = COALESCE(?, enrollment_count),
            status = COALESCE(?, status)
         WHERE id = ?",
        rusqlite::params![
            f.code.as_deref(),
            f.name.as_deref(),
            f.description.as_deref(),
            f.credits,
            f.department.as_deref(),
            f.semester.as_deref(),
            f.schedule.as_deref(),
            f.room.as_deref(),
            f.capacity,
            f.enrollment_count,
            f.status.as_deref(),
            id,
        ],
    )?;
    Ok(changed > 0)
}

/// Removes the course, its grades and its enrollments. Returns the students
/// whose grades were removed so their GPAs can be refreshed.
pub fn course_delete(conn: &Connection, id: i64) -> anyhow::Result<Option<Vec<i64>>> {
    let tx = conn.unchecked_transaction()?;
    let affected = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT student_id FROM grades WHERE course_id = ? ORDER BY student_id",
        )?;
        let rows = stmt.query_map([id], |r| r.get::<_, i64>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    tx.execute("DELETE FROM grades WHERE course_id = ?", [id])?;
    tx.execute("DELETE FROM enrollments WHERE course_id = ?", [id])?;
    let changed = tx.execute("DELETE FROM courses WHERE id = ?", [id])?;
    if changed == 0 {
        return Ok(None);
    }
    for sid in &affected {
        refresh_student_gpa(&tx, *sid)?;
    }
    tx.commit()?;
    Ok(Some(affected))
}

// ---------------------------------------------------------------------------
// Enrollments

pub const ENROLLMENT_STATUSES: [&str; 3] = ["active", "completed", "dropped"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub enrollment_date: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollment {
    pub enrolled: Vec<Enrollment>,
    /// Students that already held an active enrollment in the course.
    pub already_enrolled: Vec<i64>,
}

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        course_id: row.get(2)?,
        enrollment_date: row.get(3)?,
        status: row.get(4)?,
    })
}

/// Enrollments filtered by student and/or course; `None` matches any.
pub fn enrollments_for(
    conn: &Connection,
    student_id: Option<i64>,
    course_id: Option<i64>,
) -> anyhow::Result<Vec<Enrollment>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, course_id, enrollment_date, status
         FROM enrollments
         WHERE (?1 IS NULL OR student_id = ?1) AND (?2 IS NULL OR course_id = ?2)
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map((student_id, course_id), enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn enrollment_get(conn: &Connection, id: i64) -> anyhow::Result<Option<Enrollment>> {
    Ok(conn
        .query_row(
            "SELECT id, student_id, course_id, enrollment_date, status FROM enrollments WHERE id = ?",
            [id],
            enrollment_from_row,
        )
        .optional()?)
}

pub fn enrollment_is_active(conn: &Connection, student_id: i64, course_id: i64) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments
         WHERE student_id = ? AND course_id = ? AND status = 'active'",
        (student_id, course_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn bump_enrollment_count(conn: &Connection, course_id: i64, delta: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE courses SET enrollment_count = MAX(enrollment_count + ?, 0) WHERE id = ?",
        (delta, course_id),
    )?;
    Ok(())
}

/// Enrolls each student in the course with today's date, skipping students
/// already actively enrolled. The course's enrollment count moves with the
/// rows inserted, in the same transaction.
pub fn enroll_many(conn: &Connection, course_id: i64, student_ids: &[i64]) -> anyhow::Result<BulkEnrollment> {
    let today = today_stamp();
    let tx = conn.unchecked_transaction()?;
    let mut out = BulkEnrollment::default();
    for &sid in student_ids {
        if enrollment_is_active(&tx, sid, course_id)? {
            if !out.already_enrolled.contains(&sid) {
                out.already_enrolled.push(sid);
            }
            continue;
        }
        tx.execute(
            "INSERT INTO enrollments(student_id, course_id, enrollment_date, status)
             VALUES(?, ?, ?, 'active')",
            (sid, course_id, &today),
        )
        .with_context(|| format!("failed to enroll student {} in course {}", sid, course_id))?;
        out.enrolled.push(Enrollment {
            id: tx.last_insert_rowid(),
            student_id: sid,
            course_id,
            enrollment_date: today.clone(),
            status: "active".to_string(),
        });
    }
    bump_enrollment_count(&tx, course_id, out.enrolled.len() as i64)?;
    tx.commit()?;
    Ok(out)
}

/// Moves an enrollment between active, completed and dropped, keeping the
/// course's enrollment count in step. Returns `None` for an unknown id.
pub fn enrollment_set_status(conn: &Connection, id: i64, status: &str) -> anyhow::Result<Option<Enrollment>> {
    let tx = conn.unchecked_transaction()?;
    let Some(mut e) = enrollment_get(&tx, id)? else {
        return Ok(None);
    };
    let delta = match (e.status == "active", status == "active") {
        (true, false) => -1,
        (false, true) => 1,
        _ => 0,
    };
    tx.execute("UPDATE enrollments SET status = ? WHERE id = ?", (status, id))?;
    if delta != 0 {
        bump_enrollment_count(&tx, e.course_id, delta)?;
    }
    tx.commit()?;
    e.status = status.to_string();
    Ok(Some(e))
}

/// Drops a student's enrollments, releasing the seats the active ones held.
fn release_student_enrollments(conn: &Connection, student_id: i64) -> anyhow::Result<()> {
    for e in enrollments_for(conn, Some(student_id), None)? {
        if e.status == "active" {
            bump_enrollment_count(conn, e.course_id, -1)?;
        }
    }
    conn.execute("DELETE FROM enrollments WHERE student_id = ?", [student_id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Grades

const GRADE_COLUMNS: &str = "id, student_id, course_id, score, grade, credits, semester";

fn score_record_from_row(row: &Row<'_>) -> rusqlite::Result<ScoreRecord> {
    let score: f64 = row.get(3)?;
    let symbol: String = row.get(4)?;
    Ok(ScoreRecord {
        id: Some(row.get(0)?),
        student_id: row.get(1)?,
        course_id: row.get(2)?,
        score,
        // The letter is derived data; re-derive it if the stored symbol is foreign.
        grade: GradeLetter::parse(&symbol).unwrap_or_else(|| grading::classify(score)),
        credits: row.get(5)?,
        semester: row.get(6)?,
    })
}

fn query_grades(conn: &Connection, where_sql: &str, params: &[i64]) -> anyhow::Result<Vec<ScoreRecord>> {
    let sql = format!(
        "SELECT {} FROM grades {} ORDER BY id",
        GRADE_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), score_record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn grades_all(conn: &Connection) -> anyhow::Result<Vec<ScoreRecord>> {
    query_grades(conn, "", &[])
}

pub fn grades_by_student(conn: &Connection, student_id: i64) -> anyhow::Result<Vec<ScoreRecord>> {
    query_grades(conn, "WHERE student_id = ?", &[student_id])
}

pub fn grades_by_course(conn: &Connection, course_id: i64) -> anyhow::Result<Vec<ScoreRecord>> {
    query_grades(conn, "WHERE course_id = ?", &[course_id])
}

pub fn grades_by_pair(
    conn: &Connection,
    student_id: i64,
    course_id: i64,
) -> anyhow::Result<Vec<ScoreRecord>> {
    query_grades(
        conn,
        "WHERE student_id = ? AND course_id = ?",
        &[student_id, course_id],
    )
}

pub fn grade_get(conn: &Connection, id: i64) -> anyhow::Result<Option<ScoreRecord>> {
    Ok(query_grades(conn, "WHERE id = ?", &[id])?.into_iter().next())
}

fn grade_insert_tx(conn: &Connection, r: &ScoreRecord, stamp: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO grades(student_id, course_id, score, grade, credits, semester, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            r.student_id,
            r.course_id,
            r.score,
            r.grade.as_str(),
            r.credits,
            &r.semester,
            stamp,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

fn grade_update_tx(conn: &Connection, id: i64, r: &ScoreRecord, stamp: &str) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE grades SET score = ?, grade = ?, credits = ?, semester = ?, updated_at = ?
         WHERE id = ?",
        (r.score, r.grade.as_str(), r.credits, &r.semester, stamp, id),
    )?;
    Ok(changed > 0)
}

/// Raw insert that skips reconciliation; only tests use it to seed duplicates.
#[cfg(test)]
pub fn grade_insert(conn: &Connection, r: &ScoreRecord) -> anyhow::Result<i64> {
    grade_insert_tx(conn, r, &now_stamp())
}

pub fn grade_delete(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    Ok(conn.execute("DELETE FROM grades WHERE id = ?", [id])? > 0)
}

/// Writes one record (update by id, or insert when it has none) and refreshes
/// the student's GPA in the same transaction.
pub fn grade_save(conn: &Connection, r: &ScoreRecord) -> anyhow::Result<ScoreRecord> {
    let stamp = now_stamp();
    let mut saved = r.clone();
    let tx = conn.unchecked_transaction()?;
    match r.id {
        Some(id) => {
            if !grade_update_tx(&tx, id, r, &stamp)? {
                anyhow::bail!("grade {} no longer exists", id);
            }
        }
        None => saved.id = Some(grade_insert_tx(&tx, r, &stamp)?),
    }
    refresh_student_gpa(&tx, r.student_id)?;
    tx.commit()?;
    Ok(saved)
}

/// Writes the touched records of a reconciliation and refreshes the GPA of
/// every student involved, all in one transaction. Returns the full record
/// set with ids assigned to inserted rows.
pub fn persist_reconciled(conn: &Connection, rec: &Reconciliation) -> anyhow::Result<Vec<ScoreRecord>> {
    let stamp = now_stamp();
    let mut records = rec.records.clone();
    let tx = conn.unchecked_transaction()?;
    for &i in &rec.updated {
        let r = &records[i];
        let Some(id) = r.id else {
            anyhow::bail!("updated record for student {} has no id", r.student_id);
        };
        grade_update_tx(&tx, id, r, &stamp)
            .with_context(|| format!("failed to update grade {}", id))?;
    }
    for &i in &rec.inserted {
        let id = grade_insert_tx(&tx, &records[i], &stamp).with_context(|| {
            format!(
                "failed to insert grade for student {} course {}",
                records[i].student_id, records[i].course_id
            )
        })?;
        records[i].id = Some(id);
    }
    let mut students: Vec<i64> = rec
        .updated
        .iter()
        .chain(rec.inserted.iter())
        .map(|&i| records[i].student_id)
        .collect();
    students.sort_unstable();
    students.dedup();
    for sid in students {
        refresh_student_gpa(&tx, sid)?;
    }
    tx.commit()?;
    Ok(records)
}

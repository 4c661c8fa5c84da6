use crate::db::{Course, Student};
use crate::grading;
use crate::reconcile::ScoreRecord;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Narrows the student roster; unset fields match everyone.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub year: Option<i64>,
    pub status: Option<String>,
    pub course_id: Option<i64>,
}

impl StudentFilter {
    pub fn matches(&self, s: &Student) -> bool {
        if let Some(q) = self.search.as_deref().map(str::to_lowercase) {
            if !s.full_name().to_lowercase().contains(&q) && !s.email.to_lowercase().contains(&q) {
                return false;
            }
        }
        if self.year.is_some_and(|y| y != s.year) {
            return false;
        }
        if self.status.as_deref().is_some_and(|st| st != s.status) {
            return false;
        }
        if self.course_id.is_some_and(|c| !s.course_ids.contains(&c)) {
            return false;
        }
        true
    }
}

pub fn filter_students(students: &[Student], filter: &StudentFilter) -> Vec<Student> {
    students.iter().filter(|s| filter.matches(s)).cloned().collect()
}

/// Restricts grade-based reports to one course and/or semester.
#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub course_id: Option<i64>,
    pub semester: Option<String>,
}

impl GradeFilter {
    pub fn apply(&self, grades: &[ScoreRecord]) -> Vec<ScoreRecord> {
        grades
            .iter()
            .filter(|g| self.course_id.map_or(true, |c| g.course_id == c))
            .filter(|g| self.semester.as_deref().map_or(true, |s| g.semester == s))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: usize,
    pub total_courses: usize,
    pub total_enrollments: usize,
    pub total_grades: usize,
    pub average_gpa: f64,
    /// Mean of the scores in `grades`, one decimal; 0 when there are none.
    pub average_score: f64,
}

/// `grades` is expected to be already filtered; the student and course
/// figures always cover the whole workspace.
pub fn dashboard_stats(students: &[Student], courses: &[Course], grades: &[ScoreRecord]) -> DashboardStats {
    let average_score = if grades.is_empty() {
        0.0
    } else {
        let mean = grades.iter().map(|g| g.score).sum::<f64>() / grades.len() as f64;
        (mean * 10.0).round() / 10.0
    };
    DashboardStats {
        total_students: students.len(),
        total_courses: courses.len(),
        total_enrollments: students.iter().map(|s| s.course_ids.len()).sum(),
        total_grades: grades.len(),
        average_gpa: grading::average_gpa(students.iter().map(|s| s.gpa)),
        average_score,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaBucket {
    pub label: &'static str,
    pub count: usize,
}

pub fn gpa_distribution(students: &[Student]) -> Vec<GpaBucket> {
    let mut counts = [0usize; 4];
    for s in students {
        let slot = if s.gpa >= 3.7 {
            0
        } else if s.gpa >= 3.0 {
            1
        } else if s.gpa >= 2.0 {
            2
        } else {
            3
        };
        counts[slot] += 1;
    }
    ["A (3.7-4.0)", "B (3.0-3.69)", "C (2.0-2.99)", "D/F (<2.0)"]
        .into_iter()
        .zip(counts)
        .map(|(label, count)| GpaBucket { label, count })
        .collect()
}

/// Highest scores in a course, ties kept in store order.
pub fn top_performers(grades: &[ScoreRecord], course_id: i64, limit: usize) -> Vec<ScoreRecord> {
    let mut rows: Vec<ScoreRecord> = grades
        .iter()
        .filter(|g| g.course_id == course_id)
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    rows.truncate(limit);
    rows
}

/// Students by cached GPA, best first.
pub fn top_students(students: &[Student], limit: usize) -> Vec<Student> {
    let mut rows = students.to_vec();
    rows.sort_by(|a, b| b.gpa.partial_cmp(&a.gpa).unwrap_or(Ordering::Equal));
    rows.truncate(limit);
    rows
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = headers
        .iter()
        .map(|h| csv_escape(h))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    let body = rows
        .iter()
        .map(|r| r.iter().map(|v| csv_escape(v)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n");
    out.push_str(&body);
    out
}

pub fn report_file_name(prefix: &str, date: chrono::NaiveDate) -> String {
    format!("{}_{}", prefix, date.format("%Y-%m-%d"))
}

pub fn grades_csv(grades: &[ScoreRecord], students: &[Student], courses: &[Course]) -> String {
    let students_by_id: HashMap<i64, &Student> = students.iter().map(|s| (s.id, s)).collect();
    let courses_by_id: HashMap<i64, &Course> = courses.iter().map(|c| (c.id, c)).collect();

    let rows: Vec<Vec<String>> = grades
        .iter()
        .map(|g| {
            let student = students_by_id.get(&g.student_id);
            let course = courses_by_id.get(&g.course_id);
            vec![
                g.id.map(|id| id.to_string()).unwrap_or_default(),
                g.student_id.to_string(),
                student
                    .map(|s| s.full_name())
                    .unwrap_or_else(|| "Unknown".to_string()),
                g.course_id.to_string(),
                course
                    .map(|c| c.code.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                course
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                g.score.to_string(),
                g.grade.to_string(),
                g.credits.to_string(),
                g.semester.clone(),
            ]
        })
        .collect();

    to_csv(
        &[
            "ID",
            "Student ID",
            "Student Name",
            "Course ID",
            "Course Code",
            "Course Name",
            "Score",
            "Grade",
            "Credits",
            "Semester",
        ],
        &rows,
    )
}

pub fn students_csv(students: &[Student]) -> String {
    let rows: Vec<Vec<String>> = students
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.first_name.clone(),
                s.last_name.clone(),
                s.email.clone(),
                s.phone.clone(),
                s.date_of_birth.clone(),
                s.enrollment_date.clone(),
                s.year.to_string(),
                format!("{:.2}", s.gpa),
                s.status.clone(),
                s.address.clone(),
                s.course_ids
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            ]
        })
        .collect();

    to_csv(
        &[
            "ID",
            "First Name",
            "Last Name",
            "Email",
            "Phone",
            "Date of Birth",
            "Enrollment Date",
            "Year",
            "GPA",
            "Status",
            "Address",
            "Enrolled Courses",
        ],
        &rows,
    )
}

/// Seats taken as a percentage with one decimal; "0.0" for a course without
/// capacity.
fn fill_rate(c: &Course) -> String {
    if c.capacity <= 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", c.enrollment_count as f64 / c.capacity as f64 * 100.0)
}

// Faculty IDs stays blank: instructors are not tracked.
pub fn courses_csv(courses: &[Course]) -> String {
    let rows: Vec<Vec<String>> = courses
        .iter()
        .map(|c| {
            vec![
                c.id.to_string(),
                c.code.clone(),
                c.name.clone(),
                c.description.clone(),
                c.credits.to_string(),
                c.department.clone(),
                c.semester.clone(),
                c.schedule.clone(),
                c.room.clone(),
                c.capacity.to_string(),
                c.enrollment_count.to_string(),
                fill_rate(c),
                c.status.clone(),
                String::new(),
            ]
        })
        .collect();

    to_csv(
        &[
            "ID",
            "Code",
            "Name",
            "Description",
            "Credits",
            "Department",
            "Semester",
            "Schedule",
            "Room",
            "Capacity",
            "Enrollment Count",
            "Fill Rate (%)",
            "Status",
            "Faculty IDs",
        ],
        &rows,
    )
}

/// One row per (student, grade); students without grades get one row with
/// blank course columns.
pub fn full_report_csv(students: &[Student], courses: &[Course], grades: &[ScoreRecord]) -> String {
    let courses_by_id: HashMap<i64, &Course> = courses.iter().map(|c| (c.id, c)).collect();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for s in students {
        let student_cols = vec![
            s.id.to_string(),
            s.full_name(),
            s.email.clone(),
            s.year.to_string(),
            format!("{:.2}", s.gpa),
            s.status.clone(),
        ];
        let mine: Vec<&ScoreRecord> = grades.iter().filter(|g| g.student_id == s.id).collect();
        if mine.is_empty() {
            let mut row = student_cols.clone();
            row.extend(std::iter::repeat(String::new()).take(7));
            rows.push(row);
            continue;
        }
        for g in mine {
            let course = courses_by_id.get(&g.course_id);
            let mut row = student_cols.clone();
            row.extend([
                course.map(|c| c.code.clone()).unwrap_or_default(),
                course.map(|c| c.name.clone()).unwrap_or_default(),
                course.map(|c| c.department.clone()).unwrap_or_default(),
                g.score.to_string(),
                g.grade.to_string(),
                g.credits.to_string(),
                g.semester.clone(),
            ]);
            rows.push(row);
        }
    }

    to_csv(
        &[
            "Student ID",
            "Student Name",
            "Email",
            "Year",
            "GPA",
            "Status",
            "Course Code",
            "Course Name",
            "Department",
            "Score",
            "Grade",
            "Credits",
            "Semester",
        ],
        &rows,
    )
}

use crate::db;
use crate::grading::MAX_CREDITS;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{DEFAULT_CREDITS, DEFAULT_SEMESTER};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "defaultSemester": DEFAULT_SEMESTER,
            "defaultCredits": DEFAULT_CREDITS,
            "strictScoreRange": false,
            "topPerformersLimit": 5
        }),
    }
}

/// Typed view of the `grading` section used by the grade handlers.
#[derive(Debug, Clone)]
pub struct GradingSettings {
    pub default_semester: String,
    pub default_credits: i64,
    pub strict_score_range: bool,
    pub top_performers_limit: usize,
}

impl GradingSettings {
    fn from_value(v: &Value) -> Self {
        Self {
            default_semester: v
                .get("defaultSemester")
                .and_then(|x| x.as_str())
                .unwrap_or(DEFAULT_SEMESTER)
                .to_string(),
            default_credits: v
                .get("defaultCredits")
                .and_then(|x| x.as_i64())
                .unwrap_or(DEFAULT_CREDITS),
            strict_score_range: v
                .get("strictScoreRange")
                .and_then(|x| x.as_bool())
                .unwrap_or(false),
            top_performers_limit: v
                .get("topPerformersLimit")
                .and_then(|x| x.as_u64())
                .unwrap_or(5) as usize,
        }
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "defaultSemester" => {
                    let s = parse_string_max(v, k, 40)?;
                    if s.is_empty() {
                        return Err("defaultSemester must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultCredits" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, MAX_CREDITS)?));
                }
                "strictScoreRange" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "topPerformersLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), %msg, "ignoring invalid stored setting");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn load_grading(conn: &rusqlite::Connection) -> anyhow::Result<GradingSettings> {
    Ok(GradingSettings::from_value(&load_section(
        conn,
        SetupSection::Grading,
    )?))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "grading": grading }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

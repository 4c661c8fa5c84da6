use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    match req.params.get(key) {
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
        Some(v) => v.as_i64().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                Some(json!({ "field": key, "value": v })),
            )
        }),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                Some(json!({ "field": key, "value": v })),
            )
        }),
    }
}

/// A trimmed string param; blank strings count as absent.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str().map(str::trim) {
            Some("") => Ok(None),
            Some(s) => Ok(Some(s.to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                Some(json!({ "field": key, "value": v })),
            )),
        },
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing/invalid {}", key), None))
}

/// Reads an optional string field of a patch object; empty strings after
/// trimming are rejected when `non_empty` is set.
pub fn patch_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    non_empty: bool,
) -> Result<Option<String>, String> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| format!("{} must be a string", key))?
                .trim();
            if non_empty && s.is_empty() {
                return Err(format!("{} must not be empty", key));
            }
            Ok(Some(s.to_string()))
        }
    }
}

pub fn patch_i64(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    min: i64,
    max: i64,
) -> Result<Option<i64>, String> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| format!("{} must be an integer", key))?;
            if !(min..=max).contains(&n) {
                return Err(format!("{} must be in {}..={}", key, min, max));
            }
            Ok(Some(n))
        }
    }
}

pub fn patch_enum(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    allowed: &[&str],
) -> Result<Option<String>, String> {
    let Some(s) = patch_str(obj, key, true)? else {
        return Ok(None);
    };
    let s = s.to_ascii_lowercase();
    if !allowed.contains(&s.as_str()) {
        return Err(format!("{} must be one of: {}", key, allowed.join(", ")));
    }
    Ok(Some(s))
}

/// The request params as an object (for create) or `params.patch` (for update).
pub fn params_object<'a>(
    req: &'a Request,
    key: Option<&str>,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, serde_json::Value> {
    let v = match key {
        Some(k) => req.params.get(k),
        None => Some(&req.params),
    };
    v.and_then(|v| v.as_object()).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be an object", key.unwrap_or("params")),
            None,
        )
    })
}

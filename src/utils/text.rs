//! Helpers for loosely-typed JSON event logs and console text.

use serde_json::Value;

/// 判斷 JSON 值是否為「有內容」：null、false、0、空字串、空陣列與空物件皆視為空
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// 依序取第一個有內容的欄位
pub fn first_truthy<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|candidate| is_truthy(candidate))
}

/// 字串原樣輸出，其餘型別輸出 JSON 表示
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 取欄位文字，缺少或為空時回傳空字串
pub fn field_text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .filter(|v| is_truthy(v))
        .map(display_value)
        .unwrap_or_default()
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

pub fn take_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// 空字串、0、false、no、off 以外皆為真
pub fn truthy_text(raw: &str) -> bool {
    !matches!(
        raw.trim().to_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

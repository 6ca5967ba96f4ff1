//! Cleanup of model replies

use serde::Serialize;
use serde_json::Value;

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayPlan {
    pub day: String,
    pub meals: Value,
}

fn strip_fences(text: &str) -> &str {
    let mut t = text.trim();
    for fence in ["```json", "```JSON", "```"] {
        if let Some(rest) = t.strip_prefix(fence) {
            t = rest;
            break;
        }
    }
    t = t.strip_suffix("```").unwrap_or(t);
    t.trim()
}

/// Drop commas that directly precede a closing brace or bracket.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Best-effort repair of a model reply into parseable JSON text.
pub fn clean_to_json(text: &str) -> String {
    let mut t = strip_fences(text);

    if let (Some(first), Some(last)) = (t.find('{'), t.rfind('}')) {
        if last > first {
            t = &t[first..=last];
        }
    }

    let t = t
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    remove_trailing_commas(&t)
}

/// Normalize the model's object into at most `days` weekday entries.
///
/// When every weekday is present they are taken in weekday order. Otherwise
/// the first `days` entries are relabelled Monday onwards in the order given.
pub fn coerce_days(value: &Value, days: usize) -> Vec<DayPlan> {
    let Some(obj) = value.as_object() else {
        return Vec::new();
    };
    let days = days.min(DAY_NAMES.len());

    if DAY_NAMES.iter().all(|d| obj.contains_key(*d)) {
        return DAY_NAMES[..days]
            .iter()
            .map(|d| DayPlan {
                day: d.to_string(),
                meals: obj.get(*d).cloned().unwrap_or(Value::Null),
            })
            .collect();
    }

    obj.values()
        .zip(DAY_NAMES.iter())
        .take(days)
        .map(|(meals, d)| DayPlan {
            day: d.to_string(),
            meals: meals.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_strips_fences_and_prose() {
        let raw = "```json\nHere you go: {\"Monday\": {\"Lunch\": \"Soup\"}}\n```";
        assert_eq!(clean_to_json(raw), "{\"Monday\": {\"Lunch\": \"Soup\"}}");
    }

    #[test]
    fn test_clean_replaces_smart_quotes() {
        let raw = "{\u{201C}Monday\u{201D}: {\u{201C}Dinner\u{201D}: \u{201C}Mom\u{2019}s stew\u{201D}}}";
        let value: Value = serde_json::from_str(&clean_to_json(raw)).unwrap();
        assert_eq!(value["Monday"]["Dinner"], "Mom's stew");
    }

    #[test]
    fn test_clean_removes_trailing_commas() {
        let raw = "{\"Monday\": {\"Lunch\": \"Soup\",\n }, \"list\": [1, 2, ],}";
        let value: Value = serde_json::from_str(&clean_to_json(raw)).unwrap();
        assert_eq!(value["list"], json!([1, 2]));
    }

    #[test]
    fn test_clean_keeps_commas_inside_values() {
        let raw = r#"{"Monday": {"Lunch": "Rice, beans"}}"#;
        assert_eq!(clean_to_json(raw), raw);
    }

    #[test]
    fn test_clean_unrepairable_text_fails_to_parse() {
        let cleaned = clean_to_json("Sorry, I cannot help with that.");
        assert!(serde_json::from_str::<Value>(&cleaned).is_err());
    }

    #[test]
    fn test_coerce_all_weekdays_in_weekday_order() {
        let value = json!({
            "Sunday": "g", "Saturday": "f", "Friday": "e", "Thursday": "d",
            "Wednesday": "c", "Tuesday": "b", "Monday": "a"
        });
        let plan = coerce_days(&value, 3);
        let days: Vec<_> = plan.iter().map(|d| d.day.as_str()).collect();
        assert_eq!(days, vec!["Monday", "Tuesday", "Wednesday"]);
        assert_eq!(plan[0].meals, "a");
    }

    #[test]
    fn test_coerce_relabels_in_given_order() {
        let value = json!({ "Day 1": "x", "Day 2": "y", "Day 3": "z" });
        let plan = coerce_days(&value, 2);
        assert_eq!(
            plan,
            vec![
                DayPlan { day: "Monday".into(), meals: json!("x") },
                DayPlan { day: "Tuesday".into(), meals: json!("y") },
            ]
        );
    }

    #[test]
    fn test_coerce_non_object_is_empty() {
        assert!(coerce_days(&json!([1, 2, 3]), 7).is_empty());
        assert!(coerce_days(&json!("Monday"), 7).is_empty());
    }
}

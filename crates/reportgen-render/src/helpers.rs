//! Template helpers. Each one is a pure function of its arguments; none can
//! reach the filesystem, the network or the host process.
//!
//! - `percent`: 0.85 -> "85%"
//! - `truncate`: cut text to N characters with an ellipsis
//! - `join`: join an array with a separator
//! - `default`: fallback for null values
//! - `number`: fixed decimals with thousands separators
use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value;

handlebars_helper!(percent: |value: f64| format!("{}%", (value * 100.0).round() as i64));

handlebars_helper!(truncate: |text: str, max: u64| {
    let max = max as usize;
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
});

handlebars_helper!(join: |items: array, separator: str| {
    items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(separator)
});

handlebars_helper!(default_value: |value: Json, fallback: Json| {
    if value.is_null() {
        fallback.clone()
    } else {
        value.clone()
    }
});

handlebars_helper!(number: |value: f64, {decimals: u64 = 2}| format_number(value, decimals as usize));

pub fn register(registry: &mut Handlebars<'_>) {
    registry.register_helper("percent", Box::new(percent));
    registry.register_helper("truncate", Box::new(truncate));
    registry.register_helper("join", Box::new(join));
    registry.register_helper("default", Box::new(default_value));
    registry.register_helper("number", Box::new(number));
}

/// `1234567.891` with 2 decimals -> `1,234,567.89`.
pub fn format_number(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut out = String::with_capacity(formatted.len() + int_part.len() / 3 + 1);
    let nonzero = formatted.chars().any(|c| c.is_ascii_digit() && c != '0');
    if value.is_sign_negative() && nonzero {
        out.push('-');
    }
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Handlebars<'static> {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        register(&mut hb);
        hb
    }

    #[test]
    fn test_percent() {
        let out = registry()
            .render_template("{{percent score}}", &json!({"score": 0.853}))
            .unwrap();
        assert_eq!(out, "85%");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let out = registry()
            .render_template("{{truncate s 3}}", &json!({"s": "ééééé"}))
            .unwrap();
        assert_eq!(out, "ééé...");
        let short = registry()
            .render_template("{{truncate s 10}}", &json!({"s": "short"}))
            .unwrap();
        assert_eq!(short, "short");
    }

    #[test]
    fn test_join_and_default() {
        let hb = registry();
        let data = json!({"items": ["a", 2, true], "missing": null});
        assert_eq!(
            hb.render_template("{{join items \" | \"}}", &data).unwrap(),
            "a | 2 | true"
        );
        assert_eq!(
            hb.render_template("{{default missing \"n/a\"}}", &data).unwrap(),
            "n/a"
        );
    }

    #[test]
    fn test_helper_output_is_escaped() {
        let out = registry()
            .render_template("{{default v \"x\"}}", &json!({"v": "<b>"}))
            .unwrap();
        assert_eq!(out, "&lt;b&gt;");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(999.0, 0), "999");
        assert_eq!(format_number(-1500.5, 1), "-1,500.5");
        assert_eq!(format_number(-0.001, 2), "0.00");
        let out = registry()
            .render_template("{{number v decimals=1}}", &json!({"v": 2380}))
            .unwrap();
        assert_eq!(out, "2,380.0");
    }
}

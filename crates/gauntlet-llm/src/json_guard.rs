//! Output guard for JSON-mode model responses.
//!
//! Small models frequently wrap otherwise-valid JSON in markdown fences or
//! leave a trailing comma before a closing bracket. The guard strips those
//! two artifacts and then parses strictly; anything still malformed is a
//! parse error for the caller to fail closed on. Deliberately narrow -- no
//! key quoting, no bracket balancing -- so that genuinely broken classifier
//! output is rejected rather than guessed at.

/// Strip fence noise and repair trailing commas, then parse strictly.
pub fn parse_guarded(input: &str) -> Result<serde_json::Value, serde_json::Error> {
    // Fast path: already valid.
    if let Ok(val) = serde_json::from_str(input) {
        return Ok(val);
    }

    let stripped = strip_fences(input);
    let cleaned = strip_trailing_commas(&stripped);
    serde_json::from_str(&cleaned)
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` fence pair around the
/// content, if present.
fn strip_fences(input: &str) -> String {
    let trimmed = input.trim();

    let after_open = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        return trimmed.to_string();
    };

    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);
    let before_close = after_open
        .trim_end()
        .strip_suffix("```")
        .map(str::trim_end)
        .unwrap_or(after_open);

    before_close.to_string()
}

/// Remove commas that sit directly before `]` or `}`, outside of strings.
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(len);
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if escaped {
            out.push(c);
            escaped = false;
            i += 1;
            continue;
        }
        if c == '\\' && in_string {
            out.push(c);
            escaped = true;
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if !in_string && c == ',' {
            let mut j = i + 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && (chars[j] == ']' || chars[j] == '}') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// How much normalization the parser needed to read a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Parsed as-is.
    Direct,
    /// Parsed after stripping markdown code fences.
    StrippedFences,
    /// Parsed after extracting the outermost `{…}` object from
    /// surrounding prose or a truncated tail.
    OutermostObject,
}

/// Parse model output as JSON with progressive normalization.
///
/// Steps, in order: direct parse, fence stripping, outermost-object
/// extraction. Returns the parsed value and the step that succeeded so
/// callers can count parse retries.
pub fn parse_json_lenient(raw: &str) -> Result<(serde_json::Value, Normalization), String> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok((value, Normalization::Direct));
    }

    let unfenced = strip_fences(trimmed);
    if unfenced != trimmed
        && let Ok(value) = serde_json::from_str(unfenced)
    {
        return Ok((value, Normalization::StrippedFences));
    }

    if let Some(object) = outermost_object(unfenced)
        && let Ok(value) = serde_json::from_str(object)
    {
        return Ok((value, Normalization::OutermostObject));
    }

    Err(format!(
        "no parseable JSON object in {} bytes of output",
        raw.len()
    ))
}

/// Strip markdown code fences (```json … ``` or ``` … ```).
fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The outermost balanced `{…}` region, ignoring braces inside strings.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

//! `{{variable}}` substitution for message templates.

/// Variables a lead-facing template may use.
pub const VARIABLES: &[&str] = &["name", "email", "phone"];

/// Replace every `{{key}}` in `text` with its value. Unknown placeholders
/// are left untouched so a missing variable is visible in the sent message.
pub fn render(text: &str, vars: &[(&str, &str)]) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Names of all placeholders used in `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim();
        if !name.is_empty() && !found.iter().any(|n| n == name) {
            found.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    found
}

//! Command template rendering

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::errors::DeployError;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex"))
}

/// Render a command template, substituting `{placeholder}` occurrences.
///
/// Every placeholder must resolve; the first unresolved one fails the
/// rendering with a template error naming the owning task.
pub fn render(
    task: &str,
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, DeployError> {
    let mut missing: Option<String> = None;

    let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    if let Some(placeholder) = missing {
        return Err(DeployError::Template {
            task: task.to_string(),
            placeholder,
        });
    }

    Ok(rendered.into_owned())
}

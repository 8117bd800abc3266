//! VM names derived from machine names
//!
//! Templates use Jinja syntax with `machine.name` as the only variable:
//!
//! ```text
//! {{ machine.name }}-vm
//! {{ trimSuffix("-abcde", machine.name) }}
//! {{ trunc(8, machine.name) }}
//! {% if len(machine.name) > 10 %}{{ trunc(-10, machine.name) }}{% else %}{{ machine.name }}{% endif %}
//! ```

use crate::{ControllerError, Result};
use minijinja::{context, Environment, UndefinedBehavior};

/// Longest name a VM may have
pub const MAX_NAME_LENGTH: usize = 63;

/// Renders VM names from machine names and optional naming templates
pub struct NameGenerator {
    env: Environment<'static>,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator {
    /// Create a new name generator with the template helpers registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_function("trimSuffix", trim_suffix);
        env.add_function("trunc", trunc);
        env.add_function("len", len);
        Self { env }
    }

    /// VM name for `machine_name`.
    ///
    /// Without a template the machine name is used as is. Rendered names
    /// longer than 63 characters are cut to 63.
    pub fn vm_name(&self, machine_name: &str, template: Option<&str>) -> Result<String> {
        if machine_name.is_empty() {
            return Err(ControllerError::naming_failed(
                machine_name,
                "machine name can not be empty",
            ));
        }

        let Some(template) = template else {
            return Ok(machine_name.to_string());
        };

        let rendered = self
            .env
            .render_str(template, context! { machine => context! { name => machine_name } })
            .map_err(|e| {
                ControllerError::naming_failed(
                    machine_name,
                    format!("unable to render template {:?}: {}", template, e),
                )
            })?;

        Ok(truncate_chars(rendered, MAX_NAME_LENGTH))
    }
}

fn truncate_chars(mut name: String, max: usize) -> String {
    if let Some((idx, _)) = name.char_indices().nth(max) {
        name.truncate(idx);
    }
    name
}

fn trim_suffix(suffix: String, value: String) -> String {
    match value.strip_suffix(suffix.as_str()) {
        Some(trimmed) => trimmed.to_string(),
        None => value,
    }
}

/// First `n` characters, or the last `-n` characters for negative `n`
fn trunc(n: i64, value: String) -> String {
    let count = value.chars().count() as i64;
    if n < 0 {
        let skip = count + n;
        if skip > 0 {
            return value.chars().skip(skip as usize).collect();
        }
        return value;
    }
    if count > n {
        return value.chars().take(n as usize).collect();
    }
    value
}

fn len(value: String) -> usize {
    value.chars().count()
}

//! # Template Processing
//!
//! Turns a manifest file into a list of resources.
//!
//! - OpenShift `Template` documents: parameters are resolved and substituted
//!   into `objects`. `${NAME}` is replaced inside strings, a string that is
//!   exactly `${{NAME}}` is replaced by the raw parameter value.
//! - `List` documents contribute their `items`.
//! - Anything else is taken as-is, one resource per YAML document.

use anyhow::{anyhow, Context, Result};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

use crate::constants::IMAGE_TAG_PARAMETER;
use crate::model::Parameters;

static PARAMETER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}")
        .expect("Failed to compile parameter regex - this should never happen")
});

static RAW_PARAMETER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{\{([A-Za-z0-9_]+)\}\}$")
        .expect("Failed to compile raw parameter regex - this should never happen")
});

#[derive(Debug, Deserialize)]
struct TemplateParameter {
    name: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    required: bool,
}

/// Parse `content` and return the resources it describes
pub fn process(
    content: &str,
    parameters: &Parameters,
    commit_sha: &str,
    hash_length: usize,
) -> Result<Vec<Value>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let document: Value =
            Value::deserialize(document).context("Failed to parse manifest YAML")?;
        match document.get("kind").and_then(Value::as_str) {
            Some("Template") => {
                resources.extend(process_template(&document, parameters, commit_sha, hash_length)?);
            }
            Some("List") => {
                if let Some(items) = document.get("items").and_then(Value::as_array) {
                    resources.extend(items.iter().cloned());
                }
            }
            _ if document.is_null() => {}
            _ => resources.push(document),
        }
    }
    Ok(resources)
}

fn process_template(
    template: &Value,
    provided: &Parameters,
    commit_sha: &str,
    hash_length: usize,
) -> Result<Vec<Value>> {
    let declared: Vec<TemplateParameter> = match template.get("parameters") {
        Some(parameters) => serde_json::from_value(parameters.clone())
            .context("Template parameters are malformed")?,
        None => Vec::new(),
    };

    let mut values = Parameters::new();
    for parameter in &declared {
        if let Some(value) = &parameter.value {
            values.insert(parameter.name.clone(), value.clone());
        }
    }
    for (name, value) in provided {
        values.insert(name.clone(), value.clone());
    }
    let declares_image_tag = declared.iter().any(|p| p.name == IMAGE_TAG_PARAMETER);
    if declares_image_tag && !provided.contains_key(IMAGE_TAG_PARAMETER) {
        let tag: String = commit_sha.chars().take(hash_length).collect();
        values.insert(IMAGE_TAG_PARAMETER.to_string(), Value::String(tag));
    }

    if let Some(missing) = declared
        .iter()
        .find(|p| p.required && !values.contains_key(&p.name))
    {
        return Err(anyhow!("required template parameter {} is not set", missing.name));
    }

    let objects = template
        .get("objects")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(objects
        .into_iter()
        .map(|object| substitute(object, &values))
        .collect())
}

fn substitute(value: Value, parameters: &Parameters) -> Value {
    match value {
        Value::String(s) => {
            if let Some(name) = RAW_PARAMETER_REFERENCE
                .captures(&s)
                .and_then(|caps| caps.get(1))
            {
                if let Some(raw) = parameters.get(name.as_str()) {
                    return raw.clone();
                }
            }
            let replaced = PARAMETER_REFERENCE.replace_all(&s, |caps: &Captures<'_>| {
                match parameters.get(&caps[1]) {
                    Some(Value::String(v)) => v.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| substitute(item, parameters))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, parameters)))
                .collect(),
        ),
        other => other,
    }
}

//! Text templating backed by tera, with the curated helper functions
//! `LabelNames` and `GetTaskByName` registered on every template.

use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tera::Tera;

use crate::params::Snapshot;

const TEMPLATE_NAME: &str = "inline";

/// A compiled template. `text` starts out as the source and is replaced by
/// the rendered output when `rendered` produces a late-bound copy; task
/// names, command lines, and file paths are fixed this way at dispatch time.
#[derive(Clone)]
pub struct Template {
    pub text: String,
    tera: Tera,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.register_function("LabelNames", label_names);
        tera.register_function("GetTaskByName", get_task_by_name);
        tera.add_raw_template(TEMPLATE_NAME, source)
            .map_err(|e| anyhow!("invalid template: {e}"))?;
        Ok(Self {
            text: source.to_string(),
            tera,
        })
    }

    pub fn render(&self, params: &Snapshot) -> Result<String> {
        let context = tera::Context::from_serialize(params)
            .map_err(|e| anyhow!("building template context: {e}"))?;
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| anyhow!("rendering template: {}", describe(&e)))
    }

    /// Render and return a copy whose `text` is the rendered output.
    pub fn rendered(&self, params: &Snapshot) -> Result<Template> {
        let text = self.render(params)?;
        Ok(Template {
            text,
            tera: self.tera.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("text", &self.text)
            .finish()
    }
}

/// Flatten a tera error chain into one line; the top-level message alone is
/// usually just "Failed to render 'inline'".
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// `LabelNames(list=...)`: extract the `name` field from a list of maps.
fn label_names(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let labels = match args.get("list") {
        None | Some(Value::Null) => return Ok(Value::Array(vec![])),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(tera::Error::msg(format!(
                "LabelNames expects a list, got {other}"
            )))
        }
    };
    let mut names = Vec::with_capacity(labels.len());
    for label in labels {
        match label.get("name") {
            Some(Value::String(name)) => names.push(Value::String(name.clone())),
            _ => {
                return Err(tera::Error::msg(
                    "LabelNames expects maps with a string \"name\" field",
                ))
            }
        }
    }
    Ok(Value::Array(names))
}

/// `GetTaskByName(tasks=..., name=...)`: linear search by rendered task name.
fn get_task_by_name(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let name = match args.get("name") {
        Some(Value::String(name)) => name.as_str(),
        _ => {
            return Err(tera::Error::msg(
                "GetTaskByName requires a string \"name\" argument",
            ))
        }
    };
    let tasks = match args.get("tasks") {
        Some(Value::Array(tasks)) => tasks,
        _ => {
            return Err(tera::Error::msg(
                "GetTaskByName requires a \"tasks\" list argument",
            ))
        }
    };
    for task in tasks {
        if task.get("Name").and_then(Value::as_str) == Some(name) {
            return Ok(task.clone());
        }
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => map,
            _ => panic!("snapshot must be a map"),
        }
    }

    #[test]
    fn test_plain_text_renders_verbatim() {
        let template = Template::compile("x").unwrap();
        assert_eq!(template.render(&Snapshot::new()).unwrap(), "x");
    }

    #[test]
    fn test_empty_template_renders_empty() {
        let template = Template::compile("").unwrap();
        assert_eq!(template.render(&Snapshot::new()).unwrap(), "");
        assert!(template.is_empty());
    }

    #[test]
    fn test_renders_snapshot_fields() {
        let template = Template::compile("hello {{ Item.Value }}").unwrap();
        let snap = snapshot(json!({"Item": {"Key": 0, "Value": "a"}}));
        assert_eq!(template.render(&snap).unwrap(), "hello a");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let template = Template::compile("{{ Missing.field }}").unwrap();
        assert!(template.render(&Snapshot::new()).is_err());
    }

    #[test]
    fn test_rendered_replaces_text() {
        let template = Template::compile("task-{{ Item.Value }}").unwrap();
        let snap = snapshot(json!({"Item": {"Key": 1, "Value": "b"}}));
        let rendered = template.rendered(&snap).unwrap();
        assert_eq!(rendered.text, "task-b");
    }

    #[test]
    fn test_label_names_function() {
        let template =
            Template::compile(r#"{{ LabelNames(list=PR.labels) | join(sep="+") }}"#).unwrap();
        let snap = snapshot(json!({"PR": {"labels": [{"name": "bug"}, {"name": "ci"}]}}));
        assert_eq!(template.render(&snap).unwrap(), "bug+ci");
    }

    #[test]
    fn test_get_task_by_name_function() {
        let template = Template::compile(
            r#"{% set t = GetTaskByName(tasks=Tasks, name="foo") %}{{ t.Status }}"#,
        )
        .unwrap();
        let snap = snapshot(json!({"Tasks": [
            {"Name": "bar", "Status": "queue"},
            {"Name": "foo", "Status": "succeeded"},
        ]}));
        assert_eq!(template.render(&snap).unwrap(), "succeeded");
    }
}

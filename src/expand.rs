//! Expansion of one configured task into its runtime tasks via `items`.
//! Runs exactly once per phase, at phase start, before scheduling begins.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::config::{ItemsSource, TaskConfig};
use crate::params::Params;
use crate::types::Item;

/// Expand a task config against the snapshot visible at phase start.
///
/// A sequence yields one task per element with `Item = {Key: index, Value}`;
/// a mapping yields one per entry with `Item = {Key, Value}` (iterated in
/// JSON object order, lexicographic by key, stable within an expansion). The
/// task name template is re-rendered per item.
pub fn expand(task: &TaskConfig, params: &Params) -> Result<Vec<TaskConfig>> {
    let Some(items) = &task.items else {
        let mut single = task.clone();
        single.name = task.name.rendered(&params.snapshot())?;
        return Ok(vec![single]);
    };
    let value = match items {
        ItemsSource::Expr(program) => program.run(&params.snapshot())?,
        ItemsSource::Literal(value) => value.clone(),
    };
    match value {
        Value::Array(elements) => elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                instantiate(
                    task,
                    params,
                    Item {
                        key: Value::from(index),
                        value: element,
                    },
                )
            })
            .collect(),
        Value::Object(entries) => entries
            .into_iter()
            .map(|(key, value)| {
                instantiate(
                    task,
                    params,
                    Item {
                        key: Value::String(key),
                        value,
                    },
                )
            })
            .collect(),
        other => bail!(
            "task items must be a sequence or a mapping, got {}",
            kind_of(&other)
        ),
    }
}

fn instantiate(task: &TaskConfig, params: &Params, item: Item) -> Result<TaskConfig> {
    let params = params.with_item(Some(&item));
    let mut expanded = task.clone();
    expanded.name = task.name.rendered(&params.snapshot())?;
    expanded.item = Some(item);
    Ok(expanded)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_str, Config};
    use crate::expr::ExprEvaluator;
    use serde_json::json;
    use std::path::Path;

    fn config_with_task(task_yaml: &str) -> Config {
        let yaml = format!("phases:\n- name: main\n  tasks:\n  - {task_yaml}\n");
        load_str(&yaml, Path::new("."), &ExprEvaluator::new()).unwrap()
    }

    #[test]
    fn test_task_without_items_renders_its_name() {
        let config = config_with_task(
            "name: \"greet-{{ Meta.env }}\"\n    command:\n      command: exit 0",
        );
        let params = Params {
            meta: json!({"env": "ci"}),
            ..Default::default()
        };
        let tasks = expand(&config.phases[0].tasks[0], &params).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name.text, "greet-ci");
        assert!(tasks[0].item.is_none());
    }

    #[test]
    fn test_sequence_items_expand_with_indexes() {
        let config = config_with_task(
            "name: \"task-{{ Item.Value }}\"\n    items: [a, b, c]\n    command:\n      command: exit 0",
        );
        let tasks = expand(&config.phases[0].tasks[0], &Params::default()).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.text.as_str()).collect();
        assert_eq!(names, ["task-a", "task-b", "task-c"]);
        let item = tasks[1].item.as_ref().unwrap();
        assert_eq!(item.key, json!(1));
        assert_eq!(item.value, json!("b"));
    }

    #[test]
    fn test_mapping_items_expand_with_keys() {
        let config = config_with_task(
            "name: \"deploy-{{ Item.Key }}\"\n    items:\n      api: 8080\n      web: 8081\n    command:\n      command: exit 0",
        );
        let tasks = expand(&config.phases[0].tasks[0], &Params::default()).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.text.as_str()).collect();
        assert_eq!(names, ["deploy-api", "deploy-web"]);
        assert_eq!(tasks[0].item.as_ref().unwrap().value, json!(8080));
    }

    #[test]
    fn test_expression_items_expand() {
        let config = config_with_task(
            "name: \"n-{{ Item.Value }}\"\n    items: \"let result = Util::String::Split(Meta.targets, \\\",\\\");\"\n    command:\n      command: exit 0",
        );
        let params = Params {
            meta: json!({"targets": "x,y"}),
            ..Default::default()
        };
        let tasks = expand(&config.phases[0].tasks[0], &params).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.text.as_str()).collect();
        assert_eq!(names, ["n-x", "n-y"]);
    }

    #[test]
    fn test_scalar_items_are_an_error() {
        let config = config_with_task(
            "name: t\n    items: \"let result = 42;\"\n    command:\n      command: exit 0",
        );
        let err = expand(&config.phases[0].tasks[0], &Params::default()).unwrap_err();
        assert!(err.to_string().contains("sequence or a mapping"));
    }
}

//! Parameter fabric: the read-only snapshot handed to every template and
//! expression evaluation.
//!
//! Snapshots are plain JSON maps so user-authored scripts and templates can
//! traverse them freely; the typed runtime state is flattened into views at
//! the moment of evaluation and never written back.

use serde_json::{json, Map, Value};

use crate::types::{Item, Status};

/// One evaluation's view of the pipeline.
pub type Snapshot = Map<String, Value>;

/// The inputs from which snapshots are materialized. Cloned per evaluation
/// context; cheap relative to the task work it gates.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub pr: Value,
    pub files: Value,
    pub meta: Value,
    /// Phase name → `{Name, Status, Meta, Tasks}`; final views for completed
    /// phases, a live view for the phase being scheduled.
    pub phases: Map<String, Value>,
    /// The current phase's name, when one is bound.
    pub phase: Option<String>,
    /// The current task's view, when one is bound.
    pub task: Option<Value>,
    /// The current `{Key, Value}` item, when expansion applies.
    pub item: Option<Value>,
}

impl Params {
    pub fn with_item(&self, item: Option<&Item>) -> Params {
        let mut params = self.clone();
        params.item = item.map(item_view);
        params
    }

    pub fn with_task(&self, view: Value) -> Params {
        let mut params = self.clone();
        params.task = Some(view);
        params
    }

    /// Materialize the snapshot for one evaluation.
    pub fn snapshot(&self) -> Snapshot {
        let mut snap = Snapshot::new();
        snap.insert("PR".to_string(), self.pr.clone());
        snap.insert("Files".to_string(), self.files.clone());
        snap.insert("Meta".to_string(), self.meta.clone());
        snap.insert("Phases".to_string(), Value::Object(self.phases.clone()));
        if let Some(name) = &self.phase {
            let phase = self.phases.get(name).cloned().unwrap_or(Value::Null);
            let tasks = phase.get("Tasks").cloned().unwrap_or(Value::Null);
            snap.insert("Phase".to_string(), phase);
            snap.insert("Tasks".to_string(), tasks);
        }
        if let Some(task) = &self.task {
            snap.insert("Task".to_string(), task.clone());
        }
        if let Some(item) = &self.item {
            snap.insert("Item".to_string(), item.clone());
        }
        snap
    }
}

pub fn item_view(item: &Item) -> Value {
    json!({ "Key": item.key, "Value": item.value })
}

pub fn phase_view(name: &str, status: Status, meta: &Value, tasks: Vec<Value>) -> Value {
    json!({
        "Name": name,
        "Status": status.as_str(),
        "Meta": meta,
        "Tasks": tasks,
    })
}

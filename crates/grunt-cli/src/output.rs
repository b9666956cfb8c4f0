use comfy_table::{presets::UTF8_FULL, Table};
use grunt_client::RoutineSubmission;
use grunt_core::{Task, TaskId};

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn tasks_table(tasks: &[Task]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "ID",
        "Routine",
        "Name",
        "Status",
        "Device",
        "Predecessors",
        "Run At",
        "Frequency",
        "Heartbeat",
    ]);
    for task in tasks {
        table.add_row(vec![
            task.id.to_string(),
            or_dash(task.routine_id),
            task.name.clone(),
            task.status.to_string(),
            task.device.to_string(),
            join_ids(&task.predecessors),
            or_dash(task.run_at.map(|t| t.to_rfc3339())),
            or_dash(task.frequency.as_deref()),
            or_dash(task.heartbeat.map(|t| t.to_rfc3339())),
        ]);
    }
    table
}

pub fn submission_table(submission: &RoutineSubmission) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Local ID", "Task ID", "Name", "Predecessors", "Device"]);
    for submitted in submission.iter() {
        table.add_row(vec![
            submitted.declared.id.clone(),
            submitted.task.id.to_string(),
            submitted.task.name.clone(),
            join_ids(&submitted.task.predecessors),
            submitted.task.device.to_string(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tasks_table_rows() {
        let tasks: Vec<Task> = serde_json::from_value(json!([
            {"id": 1, "name": "nightly", "status": "completed"},
            {"id": 2, "routine_id": 1, "name": "etl.load", "status": "blocked",
             "predecessors": "3,4", "device": "gpu", "frequency": "daily"}
        ]))
        .unwrap();

        let rendered = tasks_table(&tasks).to_string();
        assert!(rendered.contains("etl.load"));
        assert!(rendered.contains("blocked"));
        assert!(rendered.contains("3,4"));
        assert!(rendered.contains("gpu"));
        assert!(rendered.contains("daily"));
    }
}

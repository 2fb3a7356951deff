use std::cmp::Ordering;

use crate::crd::TaskSpec;

/// A task paired with the priority it is ordered by.
#[derive(Debug, Clone, Copy)]
pub struct TaskPriority<'a> {
    pub priority: i32,
    pub task: &'a TaskSpec,
}

impl<'a> From<&'a TaskSpec> for TaskPriority<'a> {
    fn from(task: &'a TaskSpec) -> Self {
        Self {
            priority: task.priority,
            task,
        }
    }
}

/// Orders higher priorities first.
pub fn compare_priority(a: &TaskPriority<'_>, b: &TaskPriority<'_>) -> Ordering {
    b.priority.cmp(&a.priority)
}

/// Tasks by descending priority; equal priorities keep declaration order.
pub fn sort_by_priority(tasks: &[TaskSpec]) -> Vec<&TaskSpec> {
    let mut ordered: Vec<TaskPriority<'_>> = tasks.iter().map(TaskPriority::from).collect();
    // `sort_by` is stable
    ordered.sort_by(compare_priority);
    ordered.into_iter().map(|p| p.task).collect()
}

//! Executor registration (§4.4).
//!
//! An executor is keyed by task type and produces a future for a given
//! attempt. Unlike the teacher's `JobExecutor` trait (which returns a
//! `tokio`-spawnable future polled by a multi-threaded runtime), executors
//! here return a `LocalBoxFuture` that the dispatcher polls by hand, once
//! per tick, on a single thread (see DESIGN.md's Open Question #3).

use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::context::TaskContext;
use crate::error::ExecutionError;

/// The result an executor's future resolves to: the task's output on
/// success, or the reason it failed (§4.4, §4.7).
pub type ExecutorResult = Result<Value, ExecutionError>;

/// A registered executor: given a task's `data` payload and a
/// per-attempt `TaskContext`, produces the future that runs the attempt.
pub type ExecutorFn = Rc<dyn Fn(Value, TaskContext) -> LocalBoxFuture<'static, ExecutorResult>>;

/// Maps task type name to executor (§4.4: "exactly one executor per task
/// type"; registering a second executor for the same type replaces the
/// first, mirroring the teacher's `register_handler` semantics).
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, ExecutorFn>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        executor: impl Fn(Value, TaskContext) -> LocalBoxFuture<'static, ExecutorResult> + 'static,
    ) {
        self.executors.insert(task_type.into(), Rc::new(executor));
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    pub fn get(&self, task_type: &str) -> Option<ExecutorFn> {
        self.executors.get(task_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AbortSignal;
    use futures::FutureExt;

    #[test]
    fn registered_executor_is_retrievable_by_type() {
        let mut registry = ExecutorRegistry::new();
        assert!(!registry.contains("CUSTOM"));

        registry.register("CUSTOM", |data, _ctx| {
            async move { Ok(data) }.boxed_local()
        });

        assert!(registry.contains("CUSTOM"));
        assert!(registry.get("CUSTOM").is_some());
        assert!(registry.get("OTHER").is_none());
    }

    #[test]
    fn re_registering_a_type_replaces_the_executor() {
        let mut registry = ExecutorRegistry::new();
        registry.register("CUSTOM", |_data, _ctx| {
            async move { Ok(serde_json::json!(1)) }.boxed_local()
        });
        registry.register("CUSTOM", |_data, _ctx| {
            async move { Ok(serde_json::json!(2)) }.boxed_local()
        });

        let executor = registry.get("CUSTOM").unwrap();
        let context = TaskContext::new(AbortSignal::new(), Rc::new(|_| {}));
        let future = executor(serde_json::json!(null), context);
        let result = futures::executor::block_on(future);
        assert_eq!(result, Ok(serde_json::json!(2)));
    }
}

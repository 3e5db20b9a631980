use super::{Planner, RecoveryRequest, TransformRequest, ValidationRequest};
use crate::error::{DatamuleError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Which planner operation was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerCall {
    Transform,
    Validation,
    Recovery,
}

type Script = Mutex<VecDeque<std::result::Result<String, String>>>;

/// Replays queued responses per operation.
///
/// Each call pops the next queued response; the last one is repeated once
/// the queue runs down to it. An `Err` entry becomes a planner error. An
/// operation with nothing queued fails.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    transform: Script,
    validation: Script,
    recovery: Script,
    delay: Option<Duration>,
    calls: Mutex<Vec<PlannerCall>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform(self, response: impl Into<String>) -> Self {
        push(&self.transform, Ok(response.into()));
        self
    }

    pub fn transform_error(self, message: impl Into<String>) -> Self {
        push(&self.transform, Err(message.into()));
        self
    }

    pub fn validation(self, response: impl Into<String>) -> Self {
        push(&self.validation, Ok(response.into()));
        self
    }

    pub fn validation_error(self, message: impl Into<String>) -> Self {
        push(&self.validation, Err(message.into()));
        self
    }

    pub fn recovery(self, response: impl Into<String>) -> Self {
        push(&self.recovery, Ok(response.into()));
        self
    }

    pub fn recovery_error(self, message: impl Into<String>) -> Self {
        push(&self.recovery, Err(message.into()));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<PlannerCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, call: PlannerCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    async fn answer(&self, call: PlannerCall, script: &Script) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut queue = script.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(DatamuleError::Planner(message)),
            None => Err(DatamuleError::Planner(format!(
                "no scripted response for {call:?}"
            ))),
        }
    }
}

fn push(script: &Script, entry: std::result::Result<String, String>) {
    script
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(entry);
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan_transform(&self, _request: &TransformRequest<'_>) -> Result<String> {
        self.answer(PlannerCall::Transform, &self.transform).await
    }

    async fn plan_validation(&self, _request: &ValidationRequest<'_>) -> Result<String> {
        self.answer(PlannerCall::Validation, &self.validation).await
    }

    async fn recover(&self, _request: &RecoveryRequest<'_>) -> Result<String> {
        self.answer(PlannerCall::Recovery, &self.recovery).await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

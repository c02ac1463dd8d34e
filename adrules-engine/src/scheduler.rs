use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::task::EvaluationTask;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<EvaluationTask>,
    queued: HashSet<Uuid>,
}

/// FIFO of pending evaluations holding at most one task per rule.
#[derive(Default, Clone)]
pub struct EvaluationQueue {
    state: Arc<Mutex<QueueState>>,
}

impl EvaluationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` unless its rule is already waiting. Manual runs jump to
    /// the front, taking over a non-manual entry of the same rule. Returns
    /// whether the task was accepted.
    pub fn enqueue(&self, task: EvaluationTask) -> bool {
        let mut state = self.state.lock();
        if !state.queued.insert(task.rule_id) {
            if !task.is_manual() {
                return false;
            }
            let waiting = state
                .tasks
                .iter()
                .position(|queued| queued.rule_id == task.rule_id && !queued.is_manual());
            return match waiting {
                Some(index) => {
                    state.tasks.remove(index);
                    state.tasks.push_front(task);
                    true
                }
                None => false,
            };
        }
        if task.is_manual() {
            state.tasks.push_front(task);
        } else {
            state.tasks.push_back(task);
        }
        true
    }

    pub fn next_task(&self) -> Option<EvaluationTask> {
        let mut state = self.state.lock();
        let task = state.tasks.pop_front()?;
        state.queued.remove(&task.rule_id);
        Some(task)
    }

    pub fn contains(&self, rule_id: &Uuid) -> bool {
        self.state.lock().queued.contains(rule_id)
    }

    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

//! Process job, control job and substrate tracking helpers
//!
//! Each helper applies all of its changes under one lock acquisition, so
//! observers never see a half-applied job transition.

use crate::events::ceid;
use crate::manager::{GemInner, GemStateManager, Pending};
use crate::state::ProcessingState;
use crate::variables::{StatusValue, svid};
use chrono::Local;

/// Maximum number of entries kept in `SubstHistory`
pub const SUBSTRATE_HISTORY_LIMIT: usize = 100;

const HISTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl GemInner {
    fn record_substrate(&mut self, substrate_id: &str, location: &str) {
        let entry = StatusValue::Text(format!(
            "{}:{}:{}",
            substrate_id,
            location,
            Local::now().format(HISTORY_TIME_FORMAT)
        ));
        let mut history = match self.variables.remove(svid::SUBST_HISTORY) {
            Some(StatusValue::List(history)) => history,
            _ => Vec::new(),
        };
        history.push(entry);
        if history.len() > SUBSTRATE_HISTORY_LIMIT {
            let excess = history.len() - SUBSTRATE_HISTORY_LIMIT;
            history.drain(..excess);
        }
        self.set_variable(svid::SUBST_HISTORY, history);
    }

    fn substrate_count(&self) -> u64 {
        self.variables
            .get(svid::SUBST_COUNT)
            .and_then(StatusValue::as_unsigned)
            .unwrap_or(0)
    }

    fn job_event(&mut self, event_id: u32, description: &str, job_id: &str, pending: &mut Pending) {
        self.trigger(event_id, &format!("{} {}", description, job_id), pending);
    }
}

impl GemStateManager {
    /// Create a process job for `recipe`
    ///
    /// Sets `ProcessJobId`, `PPID` and `PPPARM`, then raises CEID 30.
    pub fn create_process_job(&self, job_id: &str, recipe: &str, parameters: Vec<StatusValue>) {
        self.mutate(|inner, pending| {
            inner.set_variable(svid::PROCESS_JOB_ID, job_id);
            inner.set_variable(svid::PPID, recipe);
            inner.set_variable(svid::PPPARM, parameters);
            inner.job_event(ceid::PROCESS_JOB_CREATED, "Process Job Created", job_id, pending);
        });
    }

    /// Start executing a process job; enters the Processing state
    pub fn start_process_job(&self, job_id: &str) {
        self.mutate(|inner, pending| {
            inner.set_variable(svid::PROCESS_JOB_ID, job_id);
            inner.set_processing(ProcessingState::Processing, pending);
            inner.job_event(ceid::PROCESS_JOB_EXECUTING, "Process Job Executing", job_id, pending);
        });
    }

    /// Complete a process job; returns to Idle and clears `ProcessJobId`
    pub fn complete_process_job(&self, job_id: &str) {
        self.mutate(|inner, pending| {
            inner.set_processing(ProcessingState::Idle, pending);
            inner.set_variable(svid::PROCESS_JOB_ID, "");
            inner.job_event(ceid::PROCESS_JOB_COMPLETED, "Process Job Completed", job_id, pending);
        });
    }

    /// Abort a process job; enters the Aborted state and clears `ProcessJobId`
    pub fn abort_process_job(&self, job_id: &str) {
        self.mutate(|inner, pending| {
            inner.set_processing(ProcessingState::Aborted, pending);
            inner.set_variable(svid::PROCESS_JOB_ID, "");
            inner.trigger(ceid::PROCESS_ABORTED, "Process Aborted", pending);
            inner.job_event(ceid::PROCESS_JOB_ABORTED, "Process Job Aborted", job_id, pending);
        });
    }

    /// Create a control job grouping `process_jobs`
    pub fn create_control_job(&self, job_id: &str, process_jobs: &[&str]) {
        log::debug!("Control job {} with process jobs {:?}", job_id, process_jobs);
        self.mutate(|inner, pending| {
            inner.set_variable(svid::CONTROL_JOB_ID, job_id);
            inner.job_event(ceid::CONTROL_JOB_CREATED, "Control Job Created", job_id, pending);
        });
    }

    pub fn start_control_job(&self, job_id: &str) {
        self.mutate(|inner, pending| {
            inner.job_event(ceid::CONTROL_JOB_STARTED, "Control Job Started", job_id, pending);
        });
    }

    pub fn complete_control_job(&self, job_id: &str) {
        self.mutate(|inner, pending| {
            inner.set_variable(svid::CONTROL_JOB_ID, "");
            inner.job_event(ceid::CONTROL_JOB_COMPLETED, "Control Job Completed", job_id, pending);
        });
    }

    /// Record a substrate move in `SubstHistory`
    ///
    /// Entries read `substrate:location:YYYY-MM-DD hh:mm:ss`; only the most
    /// recent [`SUBSTRATE_HISTORY_LIMIT`] are kept.
    pub fn update_substrate_location(&self, substrate_id: &str, location: &str) {
        self.mutate(|inner, pending| {
            inner.record_substrate(substrate_id, location);
            inner.trigger(ceid::SUBSTRATE_LOCATION_CHANGED, "Substrate Location Changed", pending);
        });
    }

    /// Count a processed substrate and record the recipe as the previous task
    ///
    /// # Returns
    /// The new substrate count
    pub fn process_substrate(&self, substrate_id: &str, recipe: &str) -> u64 {
        self.mutate(|inner, pending| {
            let count = inner.substrate_count() + 1;
            inner.set_variable(svid::SUBST_COUNT, count);
            inner.set_variable(svid::PREVIOUS_TASK_NAME, recipe);
            inner.set_variable(svid::PREVIOUS_TASK_TYPE, "PROCESS");
            inner.trigger(
                ceid::SUBSTRATE_PROCESSED,
                &format!("Substrate Processed {}", substrate_id),
                pending,
            );
            count
        })
    }

    pub fn remove_substrate(&self, substrate_id: &str) {
        self.mutate(|inner, pending| {
            inner.record_substrate(substrate_id, "REMOVED");
            inner.trigger(
                ceid::SUBSTRATE_REMOVED,
                &format!("Substrate Removed {}", substrate_id),
                pending,
            );
        });
    }

    /// Select the active recipe (`PPID`)
    pub fn select_recipe(&self, recipe: &str) {
        self.mutate(|inner, pending| {
            inner.set_variable(svid::PPID, recipe);
            inner.trigger(ceid::RECIPE_CHANGED, &format!("Recipe Changed {}", recipe), pending);
        });
    }

    /// Substrate history, oldest first
    pub fn substrate_history(&self) -> Vec<String> {
        self.get_status_variable(svid::SUBST_HISTORY)
            .and_then(|value| {
                value
                    .as_list()
                    .map(|items| items.iter().filter_map(|item| item.as_text().map(str::to_string)).collect())
            })
            .unwrap_or_default()
    }
}

use serde::{Deserialize, Serialize};

use crate::request::PageResult;

/// Cumulative totals of one run. Failed ids keep page-arrival order and are never deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRunState {
    pub successful: u64,
    pub failed: u64,
    pub failed_invocation_ids: Vec<String>,
    pub has_more: bool,
    pub last_created_at: Option<String>,
    pub pages: u64,
}

impl BatchRunState {
    pub fn fold(&mut self, page: &PageResult) {
        self.successful += page.successful;
        self.failed += page.failed;
        self.failed_invocation_ids
            .extend(page.failed_invocation_ids.iter().cloned());
        self.has_more = page.has_more;
        if page.last_created_at.is_some() {
            self.last_created_at.clone_from(&page.last_created_at);
        }
        self.pages += 1;
    }

    pub fn processed(&self) -> u64 {
        self.successful + self.failed
    }

    pub fn into_result(self) -> PageResult {
        PageResult {
            successful: self.successful,
            failed: self.failed,
            failed_invocation_ids: self.failed_invocation_ids,
            has_more: false,
            last_created_at: self.last_created_at,
        }
    }
}

/// What the observer sees after each page: the page delta and the totals including it.
#[derive(Debug)]
pub struct ProgressUpdate<'a> {
    pub page: &'a PageResult,
    pub totals: &'a BatchRunState,
}

pub struct ProgressAccumulator<O> {
    state: BatchRunState,
    observer: O,
}

impl<O> ProgressAccumulator<O>
where
    O: FnMut(&ProgressUpdate<'_>),
{
    pub fn new(observer: O) -> Self {
        Self {
            state: BatchRunState::default(),
            observer,
        }
    }

    pub fn fold(&mut self, page: &PageResult) {
        self.state.fold(page);
        (self.observer)(&ProgressUpdate {
            page,
            totals: &self.state,
        });
    }

    pub fn state(&self) -> &BatchRunState {
        &self.state
    }

    pub fn finish(self) -> PageResult {
        self.state.into_result()
    }
}

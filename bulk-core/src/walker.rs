use std::future::Future;

use tracing::{debug, info, warn};

use crate::{
    error::BatchError,
    operation::OperationKind,
    pause_gate::PauseHandle,
    progress::{ProgressAccumulator, ProgressUpdate},
    request::{BatchRequest, InvocationSelector, PageResult},
};

/// Single-page "apply operation" capability.
///
/// `Ok(None)` means the endpoint answered without a usable body; the walker treats that as
/// the end of the run rather than a failure.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(
        &self,
        operation: OperationKind,
        request: &BatchRequest,
        page_size: u32,
    ) -> impl Future<Output = Result<Option<PageResult>, BatchError>> + Send;
}

pub fn validate_request(
    operation: OperationKind,
    request: &BatchRequest,
    page_size: u32,
) -> Result<(), BatchError> {
    if page_size == 0 {
        return Err(BatchError::InvalidRequest(
            "page size must be greater than zero".to_string(),
        ));
    }
    if let InvocationSelector::Ids(ids) = &request.selector
        && ids.is_empty()
    {
        return Err(BatchError::InvalidRequest(
            "invocation id list cannot be empty".to_string(),
        ));
    }
    if request.deployment.is_some() && !operation.accepts_deployment() {
        return Err(BatchError::InvalidRequest(format!(
            "deployment policy is not accepted by the {operation} operation"
        )));
    }
    Ok(())
}

/// Applies `operation` page by page until the server reports no more matches.
///
/// Pages are fetched strictly one after another. Between pages the walker waits on
/// `handle`, so a pause requested while a page is in flight takes effect once that page has
/// been folded and reported to `on_progress`. Only filter-based requests paginate; an
/// explicit id list is always a single page.
pub async fn walk<F, O>(
    fetcher: &F,
    operation: OperationKind,
    request: BatchRequest,
    page_size: u32,
    handle: &PauseHandle,
    on_progress: O,
) -> Result<PageResult, BatchError>
where
    F: PageFetcher,
    O: FnMut(&ProgressUpdate<'_>),
{
    validate_request(operation, &request, page_size)?;

    let run_id = handle.run_id();
    let mut accumulator = ProgressAccumulator::new(on_progress);
    let mut page_request = request.clone();

    loop {
        let Some(page) = fetcher
            .fetch_page(operation, &page_request, page_size)
            .await?
        else {
            warn!(
                "run_id={} operation={} empty page response after {} pages; stopping walk",
                run_id,
                operation,
                accumulator.state().pages
            );
            break;
        };

        accumulator.fold(&page);
        debug!(
            "run_id={} operation={} folded page successful={} failed={} has_more={}",
            run_id, operation, page.successful, page.failed, page.has_more
        );

        let Some(cursor) = next_cursor(&request, &page) else {
            break;
        };
        handle.checkpoint().await?;
        page_request = request.next_page(cursor);
    }

    let result = accumulator.finish();
    info!(
        "run_id={} operation={} walk finished successful={} failed={}",
        run_id, operation, result.successful, result.failed
    );
    Ok(result)
}

fn next_cursor<'a>(request: &BatchRequest, page: &'a PageResult) -> Option<&'a str> {
    if !request.is_filter_based() || !page.has_more {
        return None;
    }
    page.last_created_at.as_deref()
}

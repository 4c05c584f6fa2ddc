//! Cross-stack export and import resolution.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cloud::{
    CallContext, DescribeStacksRequest, ListImportsRequest, SharedCloud, StackSnapshot,
};
use crate::error::{CirrusError, CloudError, CloudErrorKind, CloudResult, Result};
use crate::stack::{glob_to_regex, is_glob};

/// Default number of concurrent `ListImports` calls.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A stack output exported for other stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    /// Export name, unique within the region.
    pub name: String,
    /// Exported value.
    pub value: String,
    /// Stack that owns the export.
    pub stack_name: String,
    /// Stacks importing the export.
    pub importers: Vec<String>,
    /// True if at least one stack imports the export.
    pub imported: bool,
    /// Why importers could not be listed, if they could not.
    pub import_error: Option<String>,
}

impl Export {
    fn from_output(stack: &StackSnapshot, name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            stack_name: stack.stack_name.clone(),
            importers: Vec::new(),
            imported: false,
            import_error: None,
        }
    }
}

/// Lists exports and the stacks that import them.
#[derive(Clone)]
pub struct ExportResolver {
    /// Cloud port.
    cloud: SharedCloud,
    /// Maximum concurrent `ListImports` calls.
    concurrency: usize,
}

impl ExportResolver {
    /// Creates a resolver. A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(cloud: SharedCloud, concurrency: usize) -> Self {
        Self {
            cloud,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolves the exports of every stack matching `pattern`, with importers.
    ///
    /// `pattern` is an exact stack name, a glob using `*`, or `None` for every
    /// stack. `export_name` keeps only the export with that name. The result
    /// has one entry per export found, in stack then output order.
    ///
    /// # Errors
    ///
    /// Returns an error if stacks cannot be listed or the pattern is invalid.
    /// Failing `ListImports` calls are recorded on the export instead.
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        pattern: Option<&str>,
        export_name: Option<&str>,
    ) -> Result<Vec<Export>> {
        let stacks = self.matching_stacks(ctx, pattern).await?;

        let exports: Vec<Export> = stacks
            .iter()
            .flat_map(|stack| {
                stack.exported_outputs().filter_map(move |output| {
                    let name = output.export_name.as_deref()?;
                    export_name
                        .is_none_or(|wanted| wanted == name)
                        .then(|| Export::from_output(stack, name, &output.value))
                })
            })
            .collect();

        debug!(
            "Found {} exports in {} stacks",
            exports.len(),
            stacks.len()
        );
        self.populate_importers(ctx, exports).await
    }

    async fn matching_stacks(
        &self,
        ctx: &CallContext,
        pattern: Option<&str>,
    ) -> Result<Vec<StackSnapshot>> {
        if let Some(name) = pattern.filter(|p| !is_glob(p)) {
            let request = DescribeStacksRequest {
                stack_name: Some(name.to_string()),
                next_token: None,
            };
            return Ok(self.cloud.describe_stacks(ctx, &request).await?.items);
        }

        let filter = pattern.map(glob_to_regex).transpose()?;
        let mut stacks = Vec::new();
        let mut next_token = None;
        loop {
            let request = DescribeStacksRequest {
                stack_name: None,
                next_token,
            };
            let page = self.cloud.describe_stacks(ctx, &request).await?;
            stacks.extend(
                page.items
                    .into_iter()
                    .filter(|s| filter.as_ref().is_none_or(|re| re.is_match(&s.stack_name))),
            );
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(stacks)
    }

    /// Calls `ListImports` for every export, at most `concurrency` at a time.
    async fn populate_importers(
        &self,
        ctx: &CallContext,
        mut exports: Vec<Export>,
    ) -> Result<Vec<Export>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, export) in exports.iter().enumerate() {
            let cloud = Arc::clone(&self.cloud);
            let ctx = ctx.clone();
            let name = export.name.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, list_importers(&cloud, &ctx, &name).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| CirrusError::internal(format!("import lookup task failed: {e}")))?;
            let Some(export) = exports.get_mut(index) else {
                continue;
            };
            match result {
                Ok(importers) => {
                    export.imported = !importers.is_empty();
                    export.importers = importers;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) if is_cancellation(&err) => {
                    tasks.abort_all();
                    return Err(err.into());
                }
                Err(err) => {
                    warn!("Could not list importers of {}: {err}", export.name);
                    export.import_error = Some(err.to_string());
                }
            }
        }

        Ok(exports)
    }
}

const fn is_cancellation(err: &CloudError) -> bool {
    matches!(
        err.kind(),
        CloudErrorKind::Cancelled | CloudErrorKind::DeadlineExceeded
    )
}

/// Lists every stack importing `export`, following continuation tokens.
async fn list_importers(
    cloud: &SharedCloud,
    ctx: &CallContext,
    export: &str,
) -> CloudResult<Vec<String>> {
    let mut importers = Vec::new();
    let mut next_token = None;
    loop {
        let request = ListImportsRequest {
            export_name: export.to_string(),
            next_token,
        };
        let page = cloud.list_imports(ctx, &request).await?;
        importers.extend(page.items);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => return Ok(importers),
        }
    }
}

use crate::orchestrator::{Credentials, Orchestrator};
use crate::source::RecordSource;
use crmsync_common::record::RunSummary;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub struct BatchOptions {
    pub credentials: Option<Credentials>,
    /// Where to write the JSON summary, if anywhere.
    pub summary_path: Option<PathBuf>,
    /// Ctrl-C stops the batch after the record in flight.
    pub handle_ctrl_c: bool,
}

/// Drive every record of `source` through the orchestrator, then report and
/// optionally persist the summary. Unreadable rows are reported and skipped.
pub async fn run_batch<S: RecordSource>(
    orchestrator: &mut Orchestrator,
    source: &S,
    output: OutputHandlers,
    options: BatchOptions,
) -> Result<RunSummary, Box<dyn Error>> {
    let records = source.records()?.filter_map(move |record| match record {
        Ok(record) => Some(record),
        Err(e) => {
            (output.err)(&format!("Skipping unreadable row: {}", e));
            None
        }
    });

    let interrupt = options.handle_ctrl_c.then(|| {
        let abort = orchestrator.abort_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current record");
                abort.abort();
            }
        })
    });

    let result = orchestrator
        .update_many(records, options.credentials.as_ref())
        .await;

    if let Some(handle) = interrupt {
        handle.abort();
    }
    let summary = result?;

    report_summary(&summary, output);
    if let Some(path) = &options.summary_path {
        write_summary(path, &summary).await?;
        info!("Summary written to {}", path.display());
    }
    Ok(summary)
}

pub fn report_summary(summary: &RunSummary, output: OutputHandlers) {
    for result in summary.iter() {
        let status = if result.success { "OK" } else { "FAILED" };
        (output.out)(&format!(
            "{:<8} {} ({})",
            status,
            result.identifier,
            result.timestamp.to_rfc3339()
        ));
    }
    (output.out)(&format!(
        "{} records: {} succeeded, {} failed",
        summary.total(),
        summary.succeeded(),
        summary.failed()
    ));
}

pub async fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    tokio::fs::write(path, json).await
}

//! Maintenance jobs
//!
//! The read model is a disposable projection of the log. These jobs rebuild
//! it from the authoritative history.

use uuid::Uuid;

use crate::aggregate::{replay, Account};
use crate::event_log::{EventLog, LogError};
use crate::projection::{ProjectionError, ReadModel};

/// Report from a rebuild run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub accounts_rebuilt: usize,
    pub events_replayed: usize,
    /// Accounts skipped, with the reason
    pub errors: Vec<String>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Event log error: {0}")]
    Log(#[from] LogError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),
}

/// Replay every aggregate in the log and overwrite its read-model row.
///
/// A corrupt aggregate is reported and skipped so the rest still rebuild.
/// Failing to list the log or to write the read model aborts the run.
pub async fn rebuild_read_model<L, R>(log: &L, read_model: &R) -> Result<RebuildReport, JobError>
where
    L: EventLog + ?Sized,
    R: ReadModel + ?Sized,
{
    let mut report = RebuildReport::default();
    let account_ids = log.list_aggregates().await?;

    tracing::info!(accounts = account_ids.len(), "Read model rebuild started");

    for account_id in account_ids {
        let events = match log.read_all(&account_id).await {
            Ok(Some(events)) if !events.is_empty() => events,
            Ok(_) => continue,
            Err(e) if e.is_corrupt() => {
                tracing::error!(account_id = %account_id, error = %e, "Skipping corrupt aggregate");
                report.errors.push(format!("{account_id}: {e}"));
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let account: Account = replay(account_id, &events);
        let event_ids: Vec<Uuid> = events.iter().map(|event| event.event_id()).collect();
        read_model.overwrite(&account, &event_ids).await?;

        report.accounts_rebuilt += 1;
        report.events_replayed += events.len();
    }

    tracing::info!(
        accounts_rebuilt = report.accounts_rebuilt,
        events_replayed = report.events_replayed,
        errors = report.errors.len(),
        "Read model rebuild completed"
    );

    Ok(report)
}

use crate::connection::Transport;
use crate::error::{EvokError, Result};
use crate::protocol::{device_records, updates, Request};
use crate::session::SessionContext;
use crate::types::DeviceAddress;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::timeout;

const FULL_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one full-state sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncReport {
    /// Devices listed in the WebSocket snapshot
    pub(crate) devices: usize,
    /// Devices listed by `/rest/all`, zero when skipped or failed
    pub(crate) enriched: usize,
    pub(crate) rest_failed: bool,
}

/// Seed the cache with the state of every device
///
/// The WebSocket snapshot is mandatory and its failure fails the sync. The
/// `/rest/all` enrichment is optional: failures are logged and skipped.
/// Every address written is announced once the cache is up to date.
pub(crate) async fn full_state_sync(
    transport: &mut dyn Transport,
    ctx: &SessionContext,
) -> Result<SyncReport> {
    let mut touched = BTreeSet::new();
    let mut report = SyncReport::default();

    report.devices = timeout(FULL_STATE_TIMEOUT, primary_exchange(transport, ctx, &mut touched))
        .await
        .map_err(|_| EvokError::Timeout)??;

    if let Some(rest) = &ctx.rest {
        match rest.fetch_all().await {
            Ok(records) => {
                report.enriched = records.len();
                touched.extend(ctx.cache.enrich_all(records, ctx.supplement_merge));
            }
            Err(e) => {
                tracing::warn!(controller = %ctx.id, "Could not fetch {}: {}", rest.url(), e);
                report.rest_failed = true;
            }
        }
    }

    for address in &touched {
        ctx.notify(address);
    }

    tracing::debug!(
        controller = %ctx.id,
        devices = report.devices,
        enriched = report.enriched,
        cached = ctx.cache.len(),
        "Full-state sync complete"
    );

    Ok(report)
}

/// Request the snapshot and merge everything received until it arrives
///
/// The controller answers `all` with one array. Single events that race
/// ahead of it are current state too, so they are merged as they come.
async fn primary_exchange(
    transport: &mut dyn Transport,
    ctx: &SessionContext,
    touched: &mut BTreeSet<DeviceAddress>,
) -> Result<usize> {
    transport.send(&Request::All).await?;

    loop {
        let message = transport.receive().await?.ok_or_else(|| {
            EvokError::InvalidResponse("Connection ended during full-state sync".to_string())
        })?;

        if let Value::Array(_) = message {
            let records = device_records(message);
            let count = records.len();
            touched.extend(ctx.cache.replace_all(records));
            return Ok(count);
        }

        for update in updates(message) {
            ctx.cache.merge_update(&update.address, &update.payload);
            touched.insert(update.address);
        }
    }
}

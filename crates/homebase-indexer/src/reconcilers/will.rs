use alloy::primitives::Address;
use alloy::rpc::types::Log;
use chrono::Utc;
use homebase_common::store::Update;
use homebase_common::Will;
use tracing::{info, warn};

use super::{checksum, decode, from_unix, timestamp, to_u64, Context, Effect, ReconcileError};
use crate::contracts::{Ping, WillCreated};
use crate::dispatch::EventName;

/// A will without its details is useless to the app, so a failed
/// `getWillDetails` aborts the event instead of storing defaults.
pub(super) async fn will_created(ctx: &Context, log: &Log) -> Result<Effect, ReconcileError> {
    let event: WillCreated = decode(log, EventName::WillCreated)?;
    let will = event.willContract;
    let details = ctx.chain.will_details(will).await?;

    let now = Utc::now();
    let document = Will {
        address: checksum(will),
        owner: checksum(details.owner),
        interval: to_u64(details.interval),
        last_update: from_unix(details.last_update),
        executed: details.executed,
        created_at: now,
        last_indexed: now,
    };
    ctx.store.set(&ctx.will_path(will), document.to_fields()?).await?;
    info!(
        "Will {} created by {} with a {}s interval",
        document.address, document.owner, document.interval
    );

    Ok(Effect::WillDeployed(will))
}

pub(super) async fn ping(ctx: &Context, will: Address, log: &Log) -> Result<Effect, ReconcileError> {
    let event: Ping = decode(log, EventName::Ping)?;
    let last_update = match ctx.chain.will_details(will).await {
        Ok(details) => details.last_update,
        Err(e) => {
            warn!(address = %will, "getWillDetails failed, using the ping timestamp: {}", e);
            event.newLastUpdate
        }
    };

    ctx.store
        .update(
            &ctx.will_path(will),
            Update::new()
                .set("lastUpdate", timestamp(from_unix(last_update)))
                .set("lastIndexed", timestamp(Utc::now())),
        )
        .await?;
    info!("Will {} pinged", checksum(will));
    Ok(Effect::None)
}

pub(super) async fn executed(ctx: &Context, will: Address) -> Result<Effect, ReconcileError> {
    ctx.store
        .update(
            &ctx.will_path(will),
            Update::new()
                .set("executed", true)
                .set("lastIndexed", timestamp(Utc::now())),
        )
        .await?;
    info!("Will {} executed", checksum(will));
    Ok(Effect::None)
}

pub(super) async fn cancelled(ctx: &Context, will: Address) -> Result<Effect, ReconcileError> {
    ctx.store.delete(&ctx.will_path(will)).await?;
    info!("Will {} cancelled", checksum(will));
    Ok(Effect::WillRetired(will))
}

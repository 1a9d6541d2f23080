use tracing::{debug, error, warn};

use crate::bot::context::BotContext;

/// Tops up every live session. Sessions busy with an event are skipped
/// until the next tick.
pub(crate) async fn tick_live_sessions(context: &BotContext) {
    for shared in context.registry().all().await {
        let Ok(mut session) = shared.try_lock() else {
            debug!("Skipping busy session on live tick");
            continue;
        };
        if !session.is_live() {
            continue;
        }
        match session.tick(context.client()).await {
            Ok(report) if report.posted > 0 => {
                debug!(session = %session.id(), posted = report.posted, "Live tick posted items");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(session = %session.id(), error = %err, "Live tick failed");
            }
        }
        if let Err(err) = context.registry().persist(&session).await {
            error!(session = %session.id(), error = %format!("{err:#}"), "Failed to persist session after live tick");
        }
    }
}

use crate::models::Source;
use crate::sync::SyncEngine;
use std::sync::Arc;
use std::time::Duration;

/// Background loop: every configured interval, run an incremental sync for
/// each enabled catalog. The engine's run-lock makes a tick that overlaps a
/// manual sync a no-op.
pub fn spawn(engine: Arc<SyncEngine>, catalogs: Vec<Source>, interval_secs: u64) {
    if interval_secs == 0 || catalogs.is_empty() {
        log::info!("scheduler disabled");
        return;
    }
    actix_web::rt::spawn(async move {
        loop {
            actix_web::rt::time::sleep(Duration::from_secs(interval_secs)).await;
            for source in &catalogs {
                log::info!("scheduled incremental sync for {}", source.name());
                if let Err(e) = engine.incremental_sync(*source).await {
                    log::error!("scheduled sync for {} aborted: {}", source.name(), e);
                }
            }
        }
    });
}

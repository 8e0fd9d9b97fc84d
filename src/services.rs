//! Default capability wiring
//!
//! Builds the service set the shipped strategies run against, closing
//! over the fleet's shared handles: the user ledger, the reload-once
//! flag, the option-file path and the mailer queue. Strategies stay
//! synchronous; every closure here takes a short lock or enqueues and
//! returns, never awaiting.

use crate::fleet::{self, UserLedger};
use crate::notify::{event_mail, MailerHandle};
use crate::strategy::{Service, ServiceRegistry, StrategyError};
use crate::types::UserId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Register the full capability set used by the shipped strategies.
pub fn register_fleet_services(
    registry: &mut ServiceRegistry,
    ledger: Arc<Mutex<UserLedger>>,
    reload_pending: Arc<AtomicBool>,
    option_file: PathBuf,
    mailer: MailerHandle,
    feature: String,
) -> Result<(), StrategyError> {
    let handle = Arc::clone(&ledger);
    registry.register(Service::FreePercentage(Box::new(move || {
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .free_percentage()
    })))?;

    let handle = Arc::clone(&ledger);
    registry.register(Service::TotalUsers(Box::new(move || {
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_users()
    })))?;

    let handle = Arc::clone(&ledger);
    registry.register(Service::UsersToBan(Box::new(move || {
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ban_candidates()
    })))?;

    let handle = Arc::clone(&ledger);
    registry.register(Service::UsersNearLimit(Box::new(move |margin| {
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warn_candidates(margin)
    })))?;

    let handle = Arc::clone(&ledger);
    registry.register(Service::ResetUserUsage(Box::new(move |uid, when| {
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset_user(uid, when);
    })))?;

    registry.register(Service::WriteOptionsFile(Box::new(move |content| {
        match fleet::write_options_file(&option_file, content) {
            Ok(()) => info!(file = %option_file.display(), "option file rewritten"),
            Err(e) => warn!(file = %option_file.display(), error = %e, "failed to write option file"),
        }
    })))?;

    registry.register(Service::ScheduleReloadOnce(Box::new(move || {
        let newly = !reload_pending.swap(true, Ordering::SeqCst);
        if newly {
            info!("server reload scheduled");
        }
        newly
    })))?;

    let handle = Arc::clone(&ledger);
    registry.register(Service::NotifyEvent(Box::new(move |users, event| {
        let uids: Vec<UserId> = users.iter().map(|u| u.uid().clone()).collect();
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply_event(&uids, event);
        for user in users {
            match event_mail(user, event, &feature) {
                Some(mail) => mailer.enqueue(mail),
                None => {
                    debug!(uid = %user.uid(), event = %event, "no mail address on record, notification skipped");
                }
            }
        }
    })))?;

    Ok(())
}

use std::time::Duration;

use deespec_protocol::Sbi;
use deespec_state::Lock;
use deespec_state::LockFamily;
use deespec_state::LockType;
use deespec_state::SbiFilter;
use deespec_state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Select the next ready SBI and atomically attach a run lease to it.
///
/// Candidates are walked in ready-queue order (priority DESC, registered_at
/// ASC, sequence ASC); an SBI is skipped while any dependency is not DONE or
/// while another worker holds its lease. Lease contention only affects
/// within-tick scheduling — the deterministic ordering prevents long-term
/// starvation. Returns `Ok(None)` when no work is pickable.
pub async fn pick_and_lock_next_sbi(
    store: &StateStore,
    ttl: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<(Sbi, Lock)>> {
    let candidates = store.list_sbis(&SbiFilter::executable()).await?;
    for sbi in candidates {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let blocked = store.unsatisfied_dependency_count(&sbi.id).await?;
        if blocked > 0 {
            trace!(
                sbi_id = sbi.id.as_str(),
                blocked, "skipping sbi with unsatisfied dependencies"
            );
            continue;
        }
        let lock_id = sbi.id.as_str().to_string();
        match store
            .acquire_lock(LockFamily::Run, lock_id.as_str(), LockType::Run, ttl)
            .await?
        {
            Some(lease) => {
                // The candidate list was read without the lease; re-check
                // under it so a just-completed SBI is not handed out.
                match store.find_sbi(&sbi.id).await? {
                    Some(current) if current.status.is_executable() => {
                        return Ok(Some((current, lease)));
                    }
                    _ => {
                        store.release_lock(LockFamily::Run, lock_id.as_str()).await?;
                    }
                }
            }
            None => {
                trace!(sbi_id = lock_id.as_str(), "lease held elsewhere, skipping");
            }
        }
    }
    Ok(None)
}

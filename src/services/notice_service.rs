//! Ephemeral notices stored on the Session Record. Each notice is cleared by a
//! deferred write that only fires if the same notice is still displayed.

use std::time::SystemTime;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::document_store::keys,
    error::ServiceError,
    services::records::{save_session, timer_prefix},
    state::{
        SharedState,
        session::{Notice, SessionRecord, TargetedNotice},
    },
};

/// Which notice field a notice was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSlot {
    /// `broadcast_event`.
    Broadcast,
    /// `targeted_event`.
    Targeted,
}

/// Notice written by a committed transaction, waiting for its clear-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedNotice {
    /// Field holding the notice.
    pub slot: NoticeSlot,
    /// Notice identity.
    pub id: Uuid,
}

/// Show `text` to everybody, replacing any previous broadcast notice.
pub(crate) fn post_broadcast(
    state: &SharedState,
    session: &mut SessionRecord,
    text: impl Into<String>,
    now: SystemTime,
) -> PostedNotice {
    let id = Uuid::new_v4();
    session.broadcast_event = Some(Notice {
        id,
        text: text.into(),
        expires_at: now + state.config().notice_display,
    });
    PostedNotice {
        slot: NoticeSlot::Broadcast,
        id,
    }
}

/// Show `text` to one participant, replacing any previous targeted notice.
pub(crate) fn post_targeted(
    state: &SharedState,
    session: &mut SessionRecord,
    target_id: Uuid,
    text: impl Into<String>,
    now: SystemTime,
) -> PostedNotice {
    let id = Uuid::new_v4();
    session.targeted_event = Some(TargetedNotice {
        id,
        target_id,
        text: text.into(),
        expires_at: now + state.config().notice_display,
    });
    PostedNotice {
        slot: NoticeSlot::Targeted,
        id,
    }
}

/// Schedule the clear-writes of notices posted by a committed transaction.
pub fn schedule_clears(state: &SharedState, encounter_id: Uuid, notices: &[PostedNotice]) {
    for notice in notices.iter().copied() {
        let key = format!("{}notice:{}", timer_prefix(encounter_id), notice.id);
        let task_state = state.clone();
        state.schedule_timer(key, state.config().notice_display, async move {
            if let Err(err) = clear_notice(&task_state, encounter_id, notice).await {
                warn!(%encounter_id, error = %err, "failed to clear notice");
            }
        });
    }
}

/// Clear `notice` if it is still the one displayed. Returns whether anything was
/// written.
pub async fn clear_notice(
    state: &SharedState,
    encounter_id: Uuid,
    notice: PostedNotice,
) -> Result<bool, ServiceError> {
    let now = state.now();
    let cleared = state
        .documents()
        .run_transaction(|tx| {
            let Some(mut session) = tx.get::<SessionRecord>(&keys::session(encounter_id))? else {
                return Ok::<_, ServiceError>(false);
            };
            let current = match notice.slot {
                NoticeSlot::Broadcast => session.broadcast_event.as_ref().map(|n| n.id),
                NoticeSlot::Targeted => session.targeted_event.as_ref().map(|n| n.id),
            };
            if current != Some(notice.id) {
                return Ok(false);
            }
            match notice.slot {
                NoticeSlot::Broadcast => session.broadcast_event = None,
                NoticeSlot::Targeted => session.targeted_event = None,
            }
            save_session(tx, session, now);
            Ok(true)
        })
        .await?;
    if !cleared {
        debug!(%encounter_id, notice_id = %notice.id, "notice already replaced");
    }
    Ok(cleared)
}

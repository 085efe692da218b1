//! Session resumption after a successful CONNECT
//!
//! With a session present the broker still knows our subscriptions, so only
//! the unacknowledged publishes are resent, in their original order and with
//! their original packet identifiers. A QoS 2 publish the broker has already
//! received gets its PUBREL again instead. Without a session, pending
//! acknowledgments are meaningless and every registered subscription is
//! issued again.

use crate::connection::{ConnectionHandle, ConnectionSlot, PendingAck};
use crate::error::AgentResult;
use crate::observability::metrics::metrics;
use crate::protocol::{ProtocolClient, SubscribeInfo};
use tracing::{debug, info, warn};

pub(crate) async fn resume_session<C: ProtocolClient>(
    slot: &mut ConnectionSlot<C>,
    handle: ConnectionHandle,
    session_present: bool,
) -> AgentResult<()> {
    if session_present {
        resend_pending(slot, handle).await?;
    } else {
        resubscribe_all(slot, handle).await?;
    }

    metrics().session_resumed(session_present);
    Ok(())
}

async fn resend_pending<C: ProtocolClient>(
    slot: &mut ConnectionSlot<C>,
    handle: ConnectionHandle,
) -> AgentResult<()> {
    let pending: Vec<PendingAck> = slot.pending_acks.iter().cloned().collect();
    info!(
        handle = %handle,
        pending = pending.len(),
        "Session present, resending unacknowledged publishes"
    );

    for entry in pending {
        if entry.released {
            if let Err(status) = slot.client.release(entry.packet_id).await {
                warn!(
                    handle = %handle,
                    packet_id = entry.packet_id,
                    error = %status,
                    "Resending PUBREL failed, aborting resumption"
                );
                return Err(status.into());
            }
            debug!(handle = %handle, packet_id = entry.packet_id, "PUBREL resent");
            continue;
        }

        let publish = entry.publish.as_duplicate();
        if let Err(status) = slot.client.publish(&publish, entry.packet_id).await {
            warn!(
                handle = %handle,
                packet_id = entry.packet_id,
                error = %status,
                "Resending publish failed, aborting resumption"
            );
            return Err(status.into());
        }
        debug!(handle = %handle, packet_id = entry.packet_id, topic = %publish.topic, "Publish resent");
    }

    Ok(())
}

async fn resubscribe_all<C: ProtocolClient>(
    slot: &mut ConnectionSlot<C>,
    handle: ConnectionHandle,
) -> AgentResult<()> {
    let dropped = slot.pending_acks.len();
    slot.pending_acks.clear();

    let subscriptions: Vec<SubscribeInfo> = slot
        .subscriptions
        .iter()
        .map(|entry| entry.subscribe_info())
        .collect();
    info!(
        handle = %handle,
        dropped_pending = dropped,
        subscriptions = subscriptions.len(),
        "No session present, re-subscribing"
    );

    for subscription in subscriptions {
        let packet_id = slot.next_packet_id()?;
        if let Err(status) = slot
            .client
            .subscribe(std::slice::from_ref(&subscription), packet_id)
            .await
        {
            warn!(
                handle = %handle,
                filter = %subscription.filter,
                error = %status,
                "Re-subscribe failed, aborting resumption"
            );
            return Err(status.into());
        }
        debug!(handle = %handle, filter = %subscription.filter, packet_id, "Re-subscribed");
    }

    Ok(())
}

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};
use upload_relay::protocol::{ConnId, Event};
use upload_relay::relay::Relay;

use crate::host::TokioHost;

/// Drives `relay` until it closes, feeding it the host's events in arrival order.
pub async fn run_session(mut relay: Relay, mut host: TokioHost, mut events: UnboundedReceiver<Event>, client: ConnId) {
    let id = relay.id();
    let mut next = Some(Event::Accept(client));

    while !relay.is_closed() {
        let event = match next.take() {
            Some(event) => event,
            None => match events.recv().await {
                Some(event) => event,
                None => {
                    warn!(session = %id, "event channel closed before session end");
                    break;
                }
            },
        };

        if let Err(e) = relay.dispatch(event, &mut host) {
            debug!(session = %id, cause = %e, "dispatch failed, draining outstanding events");
        }
    }
    debug!(session = %id, "session loop finished");
}

//! Which providers are online right now, as seen by the relays.

use std::collections::HashSet;

use crate::error::Result;
use crate::session::Session;
use crate::wire::{Request, Response};

/// Ask every reachable relay for its attached peers and union the answers.
///
/// All relays are asked concurrently rather than stopping at the first answer,
/// since each relay only knows the peers attached to itself. `None` means no
/// relay answered, so online status is unknown; `Some` with an empty set means
/// relays answered and nobody is online.
pub async fn online_providers(session: &Session) -> Result<Option<HashSet<String>>> {
    let relays = session.relays().await;
    if relays.is_empty() {
        tracing::debug!("No reachable relays, online status unknown");
        return Ok(None);
    }

    let answers = session
        .fan_out(&relays, session.query_timeout(), |ep| async move {
            match session.request(&ep, &Request::OnlinePeers).await? {
                Response::Online(peers) => Ok(peers),
                other => Err(other.unexpected("Online")),
            }
        })
        .await;

    let mut online = HashSet::new();
    let mut answered = 0usize;
    for (relay, res) in answers {
        match res {
            Ok(peers) => {
                answered += 1;
                online.extend(peers);
            }
            Err(e) => tracing::debug!("Relay {} did not report peers: {}", relay, e),
        }
    }

    if answered == 0 {
        Ok(None)
    } else {
        Ok(Some(online))
    }
}

use crate::cancel::CancelToken;
use crate::error::{OverlayError, Result};
use crate::keys::{parse_public_key, Identity};
use crate::model::{ext_of, normalize_ext, BrowseFile};
use crate::peer;
use crate::session::Session;
use crate::wire::{Request, Response};

/// Fetch the listing a provider publishes. An empty listing is a valid answer.
pub async fn browse_provider(
    session: &Session,
    identity: &Identity,
    pub_key: &str,
    cancel: &CancelToken,
) -> Result<Vec<BrowseFile>> {
    let expected = parse_public_key(pub_key)?;

    let fetch = async {
        let paths = peer::resolve(session, pub_key).await?;
        let mut conn = peer::connect(session, identity, pub_key, &expected, &paths).await?;
        conn.send(&Request::Browse).await?;
        match conn.recv_within(session.query_timeout()).await? {
            Response::Listing(files) => Ok(files),
            other => Err(other.unexpected("Listing")),
        }
    };

    let mut files = cancel.run(fetch).await.ok_or(OverlayError::Cancelled)??;
    for file in &mut files {
        file.ext = if file.ext.trim().is_empty() {
            ext_of(&file.path)
        } else {
            normalize_ext(&file.ext)
        };
    }

    tracing::debug!("{} publishes {} file(s)", peer::short(pub_key), files.len());
    Ok(files)
}

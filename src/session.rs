//! Request/reply sessions layered on a [`Tunnel`].
//!
//! The server side answers with the upper-cased payload; the client side
//! keeps only replies to its newest request.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use slow_tunnel::{ReplyFilter, Side, SyncTransport, Tunnel, TunnelId, Version};

pub type Replies = mpsc::UnboundedReceiver<(Version, String)>;

/// Start a server endpoint that answers each message with its upper-cased
/// payload at the request's version. Replies come from a single task, so a
/// slow reply delays the next one; requests that pile up meanwhile are
/// collapsed to the newest.
pub fn spawn_responder(
    transport: Arc<dyn SyncTransport>,
    id: Option<TunnelId>,
    delay: Duration,
    stop: CancellationToken,
) -> (TunnelId, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Version, String)>();
    let tunnel = Tunnel::with_handler(
        Side::Server,
        transport,
        id,
        move |version: Version, payload: &str| {
            let _ = tx.send((version, payload.to_string()));
        },
    );
    let id = tunnel.id().clone();

    let handle = tokio::spawn(async move {
        loop {
            let (mut version, mut payload) = tokio::select! {
                _ = stop.cancelled() => break,
                next = rx.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            while let Ok((newer, newer_payload)) = rx.try_recv() {
                debug!("Skipping v{}, v{} is already waiting", version, newer);
                version = newer;
                payload = newer_payload;
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if tunnel.send_message_with_version(version, &payload.to_uppercase()) {
                info!("Replied to v{}", version);
            } else {
                debug!("Reply to v{} superseded", version);
            }
        }
    });

    (id, handle)
}

/// Client endpoint whose handler forwards only non-stale replies
pub fn client_endpoint(
    transport: Arc<dyn SyncTransport>,
    id: Option<TunnelId>,
) -> (Tunnel, Arc<ReplyFilter>, Replies) {
    let filter = Arc::new(ReplyFilter::new());
    let (tx, rx) = mpsc::unbounded_channel();

    let accept = filter.clone();
    let tunnel = Tunnel::with_handler(
        Side::Client,
        transport,
        id,
        move |version: Version, payload: &str| {
            if accept.accepts(version) {
                let _ = tx.send((version, payload.to_string()));
            } else {
                debug!("Ignoring stale reply v{}", version);
            }
        },
    );

    (tunnel, filter, rx)
}

/// Send every payload, then print replies until the newest request is answered
pub async fn exchange<F>(
    tunnel: &Tunnel,
    filter: &ReplyFilter,
    replies: &mut Replies,
    payloads: &[String],
    timeout: Duration,
    closed: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    send_all(tunnel, filter, payloads);
    await_latest(filter, replies, timeout, closed).await?;
    Ok(())
}

pub fn send_all(tunnel: &Tunnel, filter: &ReplyFilter, payloads: &[String]) {
    for payload in payloads {
        let version = tunnel.send_message(payload);
        filter.issued(version);
        println!("-> v{} {}", version, payload);
    }
}

/// Print accepted replies until one answers the newest issued version,
/// and return that reply
pub async fn await_latest<F>(
    filter: &ReplyFilter,
    replies: &mut Replies,
    timeout: Duration,
    closed: F,
) -> Result<(Version, String)>
where
    F: Future<Output = ()>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    tokio::pin!(closed);

    loop {
        tokio::select! {
            reply = replies.recv() => match reply {
                Some((version, payload)) => {
                    // Re-check: the request may have been superseded after the handler ran
                    if !filter.accepts(version) {
                        debug!("Ignoring stale reply v{}", version);
                        continue;
                    }
                    println!("<- v{} {}", version, payload);
                    if version >= filter.latest() {
                        return Ok((version, payload));
                    }
                }
                None => anyhow::bail!("Tunnel endpoint dropped"),
            },
            _ = &mut closed => anyhow::bail!("Connection closed before v{} was answered", filter.latest()),
            _ = &mut deadline => {
                anyhow::bail!("No reply to v{} within {:?}", filter.latest(), timeout)
            }
        }
    }
}

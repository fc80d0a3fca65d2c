//! Plain TCP links between friends.
//!
//! Each connection starts with a hello frame carrying the 16-byte peer id,
//! then carries length-prefixed item frames in both directions. Links are
//! neither authenticated nor encrypted; they exist so that a handful of
//! nodes can chat on a trusted network.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use lobby_net::{InboundFrame, LinkEvent, OutboundFrame};
use lobby_shared::constants::LOBBY_SERVICE_TYPE;
use lobby_shared::PeerId;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest frame accepted from a friend.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const WRITER_QUEUE: usize = 256;

pub struct Links {
    own_id: PeerId,
    writers: Mutex<HashMap<PeerId, mpsc::Sender<Vec<u8>>>>,
    events: mpsc::Sender<LinkEvent>,
}

impl Links {
    pub fn new(own_id: PeerId, events: mpsc::Sender<LinkEvent>) -> Arc<Self> {
        Arc::new(Self {
            own_id,
            writers: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn connected_count(&self) -> usize {
        self.writers.lock().len()
    }

    /// Accept friend connections on `addr`.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> anyhow::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "Listening for friends");

        let links = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let links = Arc::clone(&links);
                        tokio::spawn(async move {
                            if let Err(e) = links.run_connection(stream, None).await {
                                debug!(%remote, error = %e, "Inbound link closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        }))
    }

    /// Keep a link to `peer` at `addr` up, redialing after failures.
    pub fn dial(self: &Arc<Self>, peer: PeerId, addr: SocketAddr) -> JoinHandle<()> {
        let links = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        if let Err(e) = Arc::clone(&links).run_connection(stream, Some(peer)).await {
                            debug!(peer = %peer.short(), error = %e, "Outbound link closed");
                        }
                    }
                    Err(e) => debug!(peer = %peer.short(), %addr, error = %e, "Dial failed"),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    /// Forward the engine's outbound frames to the matching links.
    pub fn spawn_router(self: &Arc<Self>, mut outbound: mpsc::Receiver<OutboundFrame>) -> JoinHandle<()> {
        let links = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let writer = links.writers.lock().get(&frame.to).cloned();
                match writer {
                    Some(tx) => {
                        if tx.try_send(frame.bytes).is_err() {
                            warn!(peer = %frame.to.short(), "Link queue full, dropping frame");
                        }
                    }
                    None => debug!(peer = %frame.to.short(), "No link to friend, dropping frame"),
                }
            }
        })
    }

    async fn run_connection(
        self: Arc<Self>,
        stream: TcpStream,
        expected: Option<PeerId>,
    ) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(&mut writer, &self.own_id.0).await?;
        let hello = read_frame(&mut reader).await?;
        let id: [u8; 16] = hello
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("malformed hello ({} bytes)", hello.len()))?;
        let peer = PeerId(id);
        if peer == self.own_id {
            bail!("connected to ourselves");
        }
        if let Some(expected) = expected {
            if expected != peer {
                bail!("expected {} but {} answered", expected.short(), peer.short());
            }
        }

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE);
        self.writers.lock().insert(peer, tx.clone());
        info!(peer = %peer.short(), "Friend link up");
        self.events
            .send(LinkEvent::Connected {
                peer,
                services: vec![LOBBY_SERVICE_TYPE],
            })
            .await?;

        let write_task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_frame(&mut writer, &bytes).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            match read_frame(&mut reader).await {
                Ok(bytes) => {
                    let event = LinkEvent::Frame(InboundFrame { from: peer, bytes });
                    if self.events.send(event).await.is_err() {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        write_task.abort();

        // a newer link to the same friend may have replaced ours
        let removed = {
            let mut writers = self.writers.lock();
            let ours = writers.get(&peer).is_some_and(|current| current.same_channel(&tx));
            if ours {
                writers.remove(&peer);
            }
            ours
        };
        if removed {
            info!(peer = %peer.short(), "Friend link down");
            let _ = self.events.send(LinkEvent::Disconnected { peer }).await;
        }
        result
    }
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        bail!("frame of {len} bytes exceeds limit");
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> anyhow::Result<()> {
    let len = u32::try_from(bytes.len()).context("frame too large")?;
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/*!
The transport frontend: a UDP socket and a TCP accept loop feeding the
query handler, one task per request.  The handler only sees byte
buffers; everything transport-ish (framing, peers, retry-over-TCP)
stays out here.
*/

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info, warn};

use super::query::{QueryHandler, Transport};
use crate::dns::tsig::TsigKeyring;
use crate::zone::slot::Catalog;

const MAX_MESSAGE: usize = 65535;

pub struct ServerConfig {
    pub listen: String,
    /// EDNS payload size advertised in responses
    pub udp_payload: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "0.0.0.0:53".to_string(),
            udp_payload: 1232,
        }
    }
}

pub struct NameServer {
    handler: Arc<QueryHandler>,
    config: ServerConfig,
}

impl NameServer {
    pub fn new(catalog: Arc<Catalog>, keyring: Arc<TsigKeyring>, config: ServerConfig) -> Self {
        let handler = Arc::new(QueryHandler::new(catalog, keyring, config.udp_payload));
        NameServer { handler, config }
    }

    /// start serving; blocks until the process quits
    pub async fn serve(&self) -> Result<()> {
        tokio::try_join!(self.serve_udp(), self.serve_tcp())?;
        Ok(())
    }

    pub async fn serve_udp(&self) -> Result<()> {
        let sock = Arc::new(
            UdpSocket::bind(&self.config.listen)
                .await
                .with_context(|| format!("binding udp {}", self.config.listen))?,
        );
        info!(addr = %self.config.listen, "udp listener up");

        let mut buf = BytesMut::zeroed(MAX_MESSAGE);
        loop {
            let (len, peer) = sock.recv_from(buf.as_mut()).await?;
            let wire = buf.split_to(len).freeze();
            buf.resize(MAX_MESSAGE, 0);

            let handler = self.handler.clone();
            let sock = sock.clone();
            tokio::spawn(async move {
                match handler.handle(&wire, Transport::Udp, unix_now()) {
                    Some(response) => {
                        if let Err(e) = sock.send_to(&response, peer).await {
                            warn!(error = %e, %peer, "udp send failed");
                        }
                    }
                    None => debug!(%peer, "request dropped"),
                }
            });
        }
    }

    pub async fn serve_tcp(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("binding tcp {}", self.config.listen))?;
        info!(addr = %self.config.listen, "tcp listener up");

        loop {
            let (mut stream, peer) = listener.accept().await?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                // two-octet length framing, RFC 1035 section 4.2.2
                let mut len_buf = [0u8; 2];
                loop {
                    if stream.read_exact(&mut len_buf).await.is_err() {
                        return;
                    }
                    let len = u16::from_be_bytes(len_buf) as usize;
                    let mut wire = vec![0u8; len];
                    if stream.read_exact(&mut wire).await.is_err() {
                        return;
                    }
                    let Some(response) = handler.handle(&wire, Transport::Tcp, unix_now()) else {
                        debug!(%peer, "request dropped");
                        return;
                    };
                    let frame = (response.len() as u16).to_be_bytes();
                    if stream.write_all(&frame).await.is_err()
                        || stream.write_all(&response).await.is_err()
                    {
                        return;
                    }
                }
            });
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

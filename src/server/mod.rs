//! Tokio TCP server fronting the lookup gateway.
//!
//! Accepts connections, parses HTTP/1.1 requests off a per-connection buffer,
//! and hands each one to the [`Gateway`]. Keep-alive connections are served
//! request-by-request until the peer closes or asks to.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::cache::CacheService;
use crate::http::{
    Response, StatusCode,
    request::{Request, RequestError},
};
use crate::store::BackingStore;

pub mod gateway;

pub use gateway::{CorsPolicy, Gateway};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request we will buffer before answering 413 and closing. A lookup
/// request is a request line plus a few headers; anything near this limit is
/// not a client we want to keep reading from.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 1024;

/// TCP front end for a [`Gateway`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use readthru::cache::MemoryCache;
/// use readthru::coordinator::Coordinator;
/// use readthru::server::{Gateway, Server};
/// use readthru::store::MemoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let lookups =
///         Coordinator::with_defaults(Arc::new(MemoryCache::new()), Arc::new(MemoryStore::new()));
///     let server = Server::bind("127.0.0.1:5000").await?;
///     server.run(Gateway::new(lookups)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound local address. Useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and serves the gateway until the process ends or
    /// the listener itself fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] only for listener-level failures; per-
    /// connection errors are logged and do not stop the server.
    pub async fn run<C, S>(self, gateway: Gateway<C, S>) -> Result<(), ServerError>
    where
        C: CacheService + 'static,
        S: BackingStore + 'static,
    {
        let gateway = Arc::new(gateway);
        info!(address = %self.local_addr, "lookup gateway listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let gateway = Arc::clone(&gateway);

            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer_addr, gateway).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves one connection for its lifetime: read, parse, dispatch, respond,
/// repeat while keep-alive holds.
async fn serve_connection<C, S>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    gateway: Arc<Gateway<C, S>>,
) -> Result<(), std::io::Error>
where
    C: CacheService + 'static,
    S: BackingStore + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;
        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "oversized request, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge).keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // This API has no request bodies, but a client may send one anyway;
        // wait for it so it can be discarded in one piece.
        let total_needed = body_offset + request.content_length().unwrap_or(0);
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = gateway.handle(&request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "closing after response");
            break;
        }
    }

    Ok(())
}

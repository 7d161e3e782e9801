use crate::protocol::{Request, Response, frame_codec};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use storage_engine::StoreSet;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Everything a node serves: one store per database index and an optional password
#[derive(Debug, Default)]
pub struct NodeState {
    databases: StoreSet<u32>,
    password: Option<String>,
}

impl NodeState {
    pub fn new(password: Option<String>) -> Self {
        Self {
            databases: StoreSet::new(),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub async fn entry_count(&self, db: u32) -> u64 {
        match self.databases.existing(&db) {
            Some(store) => store.entry_count().await,
            None => 0,
        }
    }

    async fn handle(&self, request: Request, authenticated: &mut bool) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Auth { password } => match &self.password {
                Some(expected) if *expected == password => {
                    *authenticated = true;
                    Response::Ok
                }
                Some(_) => Response::Error {
                    msg: "invalid password".to_string(),
                },
                None => Response::Ok,
            },
            _ if !*authenticated => Response::Error {
                msg: "authentication required".to_string(),
            },
            Request::Add { db, key, value, ttl_ms } => {
                self.databases
                    .store(&db)
                    .insert(key, value, Duration::from_millis(ttl_ms))
                    .await;
                Response::Ok
            }
            Request::Get { db, key } => {
                let value = match self.databases.existing(&db) {
                    Some(store) => store.get(&key).await,
                    None => None,
                };
                match value {
                    Some(value) => Response::Value { value },
                    None => Response::NotFound,
                }
            }
            Request::Remove { db, key } => {
                let existed = match self.databases.existing(&db) {
                    Some(store) => store.remove(&key).await,
                    None => false,
                };
                Response::Removed { existed }
            }
        }
    }
}

pub async fn process_connection(
    socket: TcpStream,
    node: Arc<NodeState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true).ok();

    let mut framed = Framed::new(socket, frame_codec());
    let mut authenticated = node.password.is_none();

    // Process each frame (message) from the client
    while let Some(frame_result) = framed.next().await {
        let frame = frame_result?;

        let request = match Request::decode(frame.freeze()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to decode request: {}", e);
                let error_resp = Response::Error { msg: e };
                framed.send(error_resp.encode()).await?;
                continue;
            }
        };

        debug!("Received request: {:?}", request);

        let response = node.handle(request, &mut authenticated).await;
        framed.send(response.encode()).await?;
    }

    Ok(())
}

/// Accept connections until the listener fails, one task per connection
pub async fn serve(listener: TcpListener, node: Arc<NodeState>) -> std::io::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            debug!("Connection {addr} successful.");

            if let Err(err) = process_connection(socket, node).await {
                tracing::warn!("Connection {addr} error: {err:?}");
            }
        });
    }
}

/// Bind `addr` and serve in the background, returning the bound address
pub async fn spawn_node(
    addr: &str,
    node: Arc<NodeState>,
) -> std::io::Result<std::net::SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Node listening on tcp://{}", local);
    tokio::spawn(async move {
        if let Err(err) = serve(listener, node).await {
            tracing::error!("Node on {local} stopped: {err}");
        }
    });
    Ok(local)
}

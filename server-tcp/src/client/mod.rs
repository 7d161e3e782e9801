use crate::protocol::{Request, Response, frame_codec, ttl_to_millis};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use shared::config::NodeDescriptor;
use shared::{Error, Result};
use sharded_cache::{NodeConnection, NodeConnector};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Opens one TCP connection per operation to nodes speaking the binary protocol
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpNodeConnector;

#[async_trait]
impl NodeConnector for TcpNodeConnector {
    async fn connect(
        &self,
        node: &NodeDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn NodeConnection>> {
        let id = node.id();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(node.address())).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::node(id, e)),
            Err(_) => {
                return Err(Error::node(
                    id,
                    format!("connect timed out after {}ms", timeout.as_millis()),
                ));
            }
        };
        stream.set_nodelay(true).map_err(|e| Error::node(id.clone(), e))?;

        let mut client = CarbonTcpClient {
            node_id: id,
            db: node.db,
            framed: Framed::new(stream, frame_codec()),
        };
        if let Some(password) = &node.password {
            let auth = Request::Auth {
                password: password.clone(),
            };
            match client.round_trip(auth).await? {
                Response::Ok => {}
                other => return Err(client.unexpected(other)),
            }
        }
        debug!(node = %client.node_id, "connected");
        Ok(Box::new(client))
    }
}

struct CarbonTcpClient {
    node_id: String,
    db: u32,
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl CarbonTcpClient {
    async fn round_trip(&mut self, request: Request) -> Result<Response> {
        self.framed
            .send(request.encode())
            .await
            .map_err(|e| Error::node(self.node_id.clone(), e))?;

        let frame = match self.framed.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(Error::node(self.node_id.clone(), e)),
            None => return Err(Error::node(self.node_id.clone(), "connection closed by node")),
        };

        Response::decode(frame.freeze()).map_err(|e| Error::node(self.node_id.clone(), e))
    }

    fn unexpected(&self, response: Response) -> Error {
        match response {
            Response::Error { msg } => Error::node(self.node_id.clone(), msg),
            other => Error::node(self.node_id.clone(), format!("unexpected response {:?}", other)),
        }
    }
}

#[async_trait]
impl NodeConnection for CarbonTcpClient {
    async fn add(&mut self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let request = Request::Add {
            db: self.db,
            key: key.to_string(),
            value,
            ttl_ms: ttl_to_millis(ttl),
        };
        match self.round_trip(request).await? {
            Response::Ok => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        let request = Request::Get {
            db: self.db,
            key: key.to_string(),
        };
        match self.round_trip(request).await? {
            Response::Value { value } => Ok(Some(value)),
            Response::NotFound => Ok(None),
            other => Err(self.unexpected(other)),
        }
    }

    async fn remove(&mut self, key: &str) -> Result<bool> {
        let request = Request::Remove {
            db: self.db,
            key: key.to_string(),
        };
        match self.round_trip(request).await? {
            Response::Removed { existed } => Ok(existed),
            other => Err(self.unexpected(other)),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut client = self;
        SinkExt::<Bytes>::close(&mut client.framed)
            .await
            .map_err(|e| Error::node(client.node_id.clone(), e))
    }
}

//! HTTP/1.1 transport over a daemon's local unix socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, header};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use migrator_api_models::{
    ClusterMember, ClusterMemberStatePost, Network, Operation, ResponseEnvelope, ResponseKind,
    ServerInfo, StoragePool,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;
use tracing::debug;
use url::{Position, Url};

use crate::error::{ClientError, ClientResult};
use crate::{DaemonClient, OperationHandle};

/// Placeholder authority used to build request URIs; the socket path does the routing.
const BASE_URL: &str = "http://unix.socket";
const USER_AGENT: &str = concat!("lxd-to-incus/", env!("CARGO_PKG_VERSION"));

/// Daemon client speaking to `unix.socket` inside a daemon state directory.
#[derive(Debug, Clone)]
pub struct UnixDaemonClient {
    socket: PathBuf,
}

impl UnixDaemonClient {
    /// Create a client for the given socket path. No connection is made until the first request.
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Socket path this client talks to.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn uri(segments: &[&str], query: &[(&str, &str)]) -> ClientResult<String> {
        let mut url = Url::parse(BASE_URL).map_err(|_| ClientError::UnexpectedResponse {
            uri: BASE_URL.to_string(),
            reason: "invalid base url",
        })?;
        url.path_segments_mut()
            .map_err(|()| ClientError::UnexpectedResponse {
                uri: BASE_URL.to_string(),
                reason: "base url cannot carry a path",
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url[Position::BeforePath..].to_string())
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> ClientResult<Bytes> {
        let stream =
            UnixStream::connect(&self.socket)
                .await
                .map_err(|source| ClientError::Connect {
                    path: self.socket.clone(),
                    source,
                })?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| ClientError::transport("handshake", uri.to_string(), source))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "daemon connection closed with error");
            }
        });

        let payload = match body {
            Some(value) => {
                Bytes::from(
                    serde_json::to_vec(&value).map_err(|source| ClientError::Encode {
                        uri: uri.to_string(),
                        source,
                    })?,
                )
            }
            None => Bytes::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "unix.socket")
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|source| ClientError::Request {
                uri: uri.to_string(),
                source,
            })?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|source| ClientError::transport("send", uri.to_string(), source))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|source| ClientError::transport("read_body", uri.to_string(), source))?
            .to_bytes();
        debug!(uri, status = status.as_u16(), "daemon request completed");
        Ok(bytes)
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> ClientResult<ResponseEnvelope> {
        let bytes = self.send(method, uri, body).await?;
        let envelope: ResponseEnvelope =
            serde_json::from_slice(&bytes).map_err(|source| ClientError::decode(uri, source))?;
        if envelope.kind == ResponseKind::Error {
            return Err(ClientError::Api {
                uri: uri.to_string(),
                code: envelope.error_code,
                message: envelope.error,
            });
        }
        Ok(envelope)
    }

    async fn get_sync<T: DeserializeOwned>(&self, uri: &str) -> ClientResult<T> {
        let envelope = self.request(Method::GET, uri, None).await?;
        if envelope.kind != ResponseKind::Sync {
            return Err(ClientError::UnexpectedResponse {
                uri: uri.to_string(),
                reason: "expected a sync response",
            });
        }
        serde_json::from_value(envelope.metadata).map_err(|source| ClientError::decode(uri, source))
    }
}

fn member_query(member: Option<&str>) -> Vec<(&str, &str)> {
    member
        .map(|name| vec![("target", name)])
        .unwrap_or_default()
}

/// Extract the instance name from an instance URL such as `/1.0/instances/c1?project=p`.
fn instance_name_from_url(url: &str) -> Option<String> {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl DaemonClient for UnixDaemonClient {
    async fn server_info(&self, member: Option<&str>) -> ClientResult<ServerInfo> {
        let uri = Self::uri(&["1.0"], &member_query(member))?;
        self.get_sync(&uri).await
    }

    async fn storage_pools(&self, member: Option<&str>) -> ClientResult<Vec<StoragePool>> {
        let mut query = vec![("recursion", "1")];
        query.extend(member_query(member));
        let uri = Self::uri(&["1.0", "storage-pools"], &query)?;
        self.get_sync(&uri).await
    }

    async fn cluster_members(&self) -> ClientResult<Vec<ClusterMember>> {
        let uri = Self::uri(&["1.0", "cluster", "members"], &[("recursion", "1")])?;
        self.get_sync(&uri).await
    }

    async fn instance_names(&self) -> ClientResult<Vec<String>> {
        let uri = Self::uri(&["1.0", "instances"], &[("all-projects", "true")])?;
        let urls: Vec<String> = self.get_sync(&uri).await?;
        Ok(urls
            .iter()
            .filter_map(|url| instance_name_from_url(url))
            .collect())
    }

    async fn networks(&self) -> ClientResult<Vec<Network>> {
        let uri = Self::uri(&["1.0", "networks"], &[("recursion", "1")])?;
        self.get_sync(&uri).await
    }

    async fn update_member_state(
        &self,
        member: &str,
        request: &ClusterMemberStatePost,
    ) -> ClientResult<OperationHandle> {
        let uri = Self::uri(&["1.0", "cluster", "members", member, "state"], &[])?;
        let body = serde_json::to_value(request).map_err(|source| ClientError::Encode {
            uri: uri.clone(),
            source,
        })?;
        let envelope = self.request(Method::POST, &uri, Some(body)).await?;
        if envelope.kind != ResponseKind::Async || envelope.operation.is_empty() {
            return Err(ClientError::UnexpectedResponse {
                uri,
                reason: "expected an operation",
            });
        }
        Ok(OperationHandle::new(envelope.operation))
    }

    async fn wait_operation(&self, handle: &OperationHandle) -> ClientResult<Operation> {
        let uri = format!("{}/wait", handle.url.trim_end_matches('/'));
        let operation: Operation = self.get_sync(&uri).await?;
        if !operation.succeeded() {
            return Err(ClientError::OperationFailed {
                operation: handle.url.clone(),
                status_code: operation.status_code,
                message: operation.err,
            });
        }
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encodes_member_names_and_queries() -> ClientResult<()> {
        let uri = UnixDaemonClient::uri(&["1.0", "cluster", "members", "node 1", "state"], &[])?;
        assert_eq!(uri, "/1.0/cluster/members/node%201/state");

        let uri = UnixDaemonClient::uri(
            &["1.0", "storage-pools"],
            &[("recursion", "1"), ("target", "node&2")],
        )?;
        assert_eq!(uri, "/1.0/storage-pools?recursion=1&target=node%262");
        Ok(())
    }

    #[test]
    fn instance_names_are_extracted_from_urls() {
        assert_eq!(
            instance_name_from_url("/1.0/instances/c1?project=web"),
            Some("c1".to_string())
        );
        assert_eq!(
            instance_name_from_url("/1.0/instances/vm2"),
            Some("vm2".to_string())
        );
        assert_eq!(instance_name_from_url("/1.0/instances/"), None);
    }

    #[tokio::test]
    async fn missing_socket_reports_connect_error() {
        let client = UnixDaemonClient::new("/nonexistent/migrator/unix.socket");
        let result = client.server_info(None).await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }
}

/**
 * OSCQUERY - HTTP description of the inbound OSC surface
 *
 * ROLE: Implements `Announcer`. Every address the router registers lands in
 * a shared table, served as an OSCQuery node tree so clients can find the
 * UDP port and the parameters the router accepts.
 *
 * ROUTES:
 * - GET /?HOST_INFO  host description (name, OSC ip/port, transport)
 * - GET /            full node tree
 * - GET /<path>      sub-tree at `path`, 404 when unknown
 */

use crate::models::{new_state, Shared, ValueType};
use crate::router::Announcer;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

/// Write-only from the client's point of view.
const ACCESS_WRITE_ONLY: u8 = 2;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HostInfo {
    pub name: String,
    pub osc_ip: String,
    pub osc_port: u16,
    pub osc_transport: String,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Extensions {
    pub access: bool,
    pub value: bool,
    pub description: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OscNode {
    pub full_path: String,
    pub access: u8,
    #[serde(rename = "TYPE", skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub contents: BTreeMap<String, OscNode>,
}

impl OscNode {
    fn container(full_path: String) -> Self {
        Self { full_path, ..Default::default() }
    }

    fn insert(&mut self, address: &str, value_type: ValueType) {
        let mut node = self;
        let mut path = String::new();
        for segment in address.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            node = node
                .contents
                .entry(segment.to_string())
                .or_insert_with(|| OscNode::container(path.clone()));
        }
        node.access = ACCESS_WRITE_ONLY;
        node.type_tag = Some(value_type.type_tag());
    }

    pub fn find(&self, path: &str) -> Option<&OscNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.contents.get(segment))
    }
}

/// Announced addresses plus the host description served alongside them.
#[derive(Clone)]
pub struct OscQueryService {
    host: HostInfo,
    addresses: Shared<BTreeMap<String, ValueType>>,
}

impl OscQueryService {
    pub fn new(name: impl Into<String>, osc_ip: IpAddr, osc_port: u16) -> Self {
        let host = HostInfo {
            name: name.into(),
            osc_ip: osc_ip.to_string(),
            osc_port,
            osc_transport: "UDP".to_string(),
            extensions: Extensions { access: true, value: false, description: false },
        };
        Self { host, addresses: new_state(BTreeMap::new()) }
    }

    pub fn host_info(&self) -> &HostInfo {
        &self.host
    }

    pub fn tree(&self) -> OscNode {
        let mut root = OscNode::container("/".to_string());
        for (address, value_type) in self.addresses.lock().iter() {
            root.insert(address, *value_type);
        }
        root
    }

    pub fn router(self) -> Router {
        Router::new().fallback(describe).with_state(self)
    }
}

impl Announcer for OscQueryService {
    fn announce(&self, address: &str, value_type: ValueType) {
        debug!(address, %value_type, "announced over OSCQuery");
        self.addresses.lock().insert(address.to_string(), value_type);
    }
}

async fn describe(State(service): State<OscQueryService>, uri: Uri) -> Response {
    if uri.query().is_some_and(|q| q.split('&').any(|p| p == "HOST_INFO")) {
        return Json(service.host_info().clone()).into_response();
    }
    let tree = service.tree();
    match tree.find(uri.path()) {
        Some(node) => Json(node.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn service() -> OscQueryService {
        let s = OscQueryService::new("Giggle OSC Router", IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        s.announce("/avatar/parameters/proximity_01", ValueType::Float);
        s.announce("/avatar/parameters/cutoff", ValueType::Bool);
        s
    }

    #[test]
    fn test_tree_shape() {
        let tree = serde_json::to_value(service().tree()).unwrap();
        assert_eq!(tree["FULL_PATH"], "/");
        let params = &tree["CONTENTS"]["avatar"]["CONTENTS"]["parameters"];
        assert_eq!(params["FULL_PATH"], "/avatar/parameters");
        assert_eq!(
            params["CONTENTS"]["proximity_01"],
            json!({"FULL_PATH": "/avatar/parameters/proximity_01", "ACCESS": 2, "TYPE": "f"})
        );
        assert_eq!(params["CONTENTS"]["cutoff"]["TYPE"], "T");
    }

    #[test]
    fn test_find_subtree() {
        let tree = service().tree();
        assert_eq!(tree.find("/").map(|n| n.full_path.as_str()), Some("/"));
        assert_eq!(tree.find("/avatar/parameters/cutoff").and_then(|n| n.type_tag), Some("T"));
        assert!(tree.find("/avatar/nope").is_none());
    }

    #[test]
    fn test_host_info_keys() {
        let info = serde_json::to_value(service().host_info()).unwrap();
        assert_eq!(
            info,
            json!({
                "NAME": "Giggle OSC Router",
                "OSC_IP": "127.0.0.1",
                "OSC_PORT": 9001,
                "OSC_TRANSPORT": "UDP",
                "EXTENSIONS": {"ACCESS": true, "VALUE": false, "DESCRIPTION": false}
            })
        );
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
        (status, body)
    }

    #[tokio::test]
    async fn test_http_routes() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = service().router();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let (status, body) = get(addr, "/?HOST_INFO").await;
        assert_eq!(status, 200);
        let info: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(info["OSC_PORT"], 9001);

        let (status, body) = get(addr, "/avatar/parameters/proximity_01").await;
        assert_eq!(status, 200);
        let node: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(node["TYPE"], "f");

        let (status, _) = get(addr, "/avatar/unknown").await;
        assert_eq!(status, 404);
        server.abort();
    }
}

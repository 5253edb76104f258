/**
 * OSC TRANSPORT - UDP in, UDP out
 *
 * ROLE: The listener task decodes inbound datagrams and hands each message
 * to the router on its own task, which makes it the single writer of every
 * tracker. Outbound motor commands go through `MotorSender`, fire-and-forget.
 */

use crate::router::Router;
use rosc::{OscMessage, OscPacket, OscType};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

/// Port haptic devices listen on unless a zone sets `device_port`.
pub const MOTOR_PORT: u16 = 8888;
pub const TX_ADDR_PARAMETER: &str = "/avatar/parameters/motor";
/// Short address understood by older device firmware.
pub const TX_ADDR_LEGACY: &str = "/motor";

const MAX_DATAGRAM: usize = 65_536;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("OSC encode failed: {0}")]
    Encode(String),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no socket for {0}")]
    NoSocket(SocketAddr),
}

/// Network destination of one haptic actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceEndpoint(SocketAddr);

impl DeviceEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sends one int32 OSC message to a device.
pub trait MotorSender: Send + Sync {
    fn send(&self, target: DeviceEndpoint, address: &str, value: i32) -> Result<(), TransportError>;
}

pub fn encode_int(address: &str, value: i32) -> Result<Vec<u8>, TransportError> {
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args: vec![OscType::Int(value)],
    });
    rosc::encoder::encode(&packet).map_err(|e| TransportError::Encode(format!("{e:?}")))
}

/// Non-blocking UDP sender, one socket per address family.
pub struct UdpMotorSender {
    v4: std::net::UdpSocket,
    v6: Option<std::net::UdpSocket>,
}

impl UdpMotorSender {
    pub fn bind() -> io::Result<Self> {
        let v4 = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        v4.set_nonblocking(true)?;
        let v6 = std::net::UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))
            .and_then(|s| s.set_nonblocking(true).map(|_| s))
            .map_err(|e| debug!("no IPv6 motor socket: {e}"))
            .ok();
        Ok(Self { v4, v6 })
    }
}

impl MotorSender for UdpMotorSender {
    fn send(
        &self,
        target: DeviceEndpoint,
        address: &str,
        value: i32,
    ) -> Result<(), TransportError> {
        let bytes = encode_int(address, value)?;
        let socket = match target.addr() {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => self.v6.as_ref().ok_or(TransportError::NoSocket(target.addr()))?,
        };
        socket.send_to(&bytes, target.addr())?;
        Ok(())
    }
}

pub async fn bind_listener(ip: IpAddr, port: u16) -> io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddr::new(ip, port)).await
}

/// Decodes one datagram and dispatches every message it carries.
/// Returns the number of messages that reached at least one handler.
pub fn handle_datagram(router: &Router, bytes: &[u8]) -> usize {
    match rosc::decoder::decode_udp(bytes) {
        Ok((_, packet)) => handle_packet(router, &packet),
        Err(e) => {
            debug!("undecodable datagram ({} bytes): {e:?}", bytes.len());
            0
        }
    }
}

fn handle_packet(router: &Router, packet: &OscPacket) -> usize {
    match packet {
        OscPacket::Message(msg) => {
            let Some(arg) = msg.args.first() else {
                debug!(address = %msg.addr, "message without argument dropped");
                return 0;
            };
            usize::from(router.dispatch(&msg.addr, arg) > 0)
        }
        OscPacket::Bundle(bundle) => bundle.content.iter().map(|p| handle_packet(router, p)).sum(),
    }
}

/// Reads the socket forever, dispatching on this task.
pub fn spawn_osc_listener(socket: UdpSocket, router: Arc<Router>) -> JoinHandle<()> {
    task::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _from)) => {
                    handle_datagram(&router, &buf[..len]);
                }
                Err(e) => {
                    // ICMP port-unreachable surfaces here on some platforms
                    warn!("OSC receive error: {e}");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueType;
    use crate::router::testing::RecordingAnnouncer;
    use crate::router::Handler;
    use giggle_devkit::MotorProbe;
    use parking_lot::Mutex;
    use rosc::{OscBundle, OscTime};

    type Seen = Arc<Mutex<Vec<OscType>>>;

    fn recording_router(address: &str, value_type: ValueType) -> (Router, Seen) {
        let mut router = Router::new(Arc::new(RecordingAnnouncer::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Arc::new(move |v: &OscType| sink.lock().push(v.clone()));
        router.add_endpoint(address, value_type, handler).unwrap();
        (router, seen)
    }

    fn message(addr: &str, arg: OscType) -> OscPacket {
        OscPacket::Message(OscMessage { addr: addr.to_string(), args: vec![arg] })
    }

    #[test]
    fn test_datagram_dispatched_to_router() {
        let (router, seen) = recording_router("/avatar/parameters/prox", ValueType::Float);
        let packet = message("/avatar/parameters/prox", OscType::Float(0.25));
        let bytes = rosc::encoder::encode(&packet).unwrap();
        assert_eq!(handle_datagram(&router, &bytes), 1);
        assert_eq!(*seen.lock(), vec![OscType::Float(0.25)]);
    }

    #[test]
    fn test_bundle_unpacked() {
        let (router, seen) = recording_router("/avatar/parameters/prox", ValueType::Float);
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime { seconds: 0, fractional: 1 },
            content: vec![
                message("/avatar/parameters/prox", OscType::Float(0.1)),
                message("/avatar/parameters/other", OscType::Float(0.2)),
                message("/avatar/parameters/prox", OscType::Float(0.3)),
            ],
        });
        let bytes = rosc::encoder::encode(&bundle).unwrap();
        assert_eq!(handle_datagram(&router, &bytes), 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_garbage_and_empty_messages_dropped() {
        let (router, seen) = recording_router("/avatar/parameters/prox", ValueType::Float);
        assert_eq!(handle_datagram(&router, b"not osc"), 0);
        let empty = OscPacket::Message(OscMessage {
            addr: "/avatar/parameters/prox".into(),
            args: vec![],
        });
        assert_eq!(handle_datagram(&router, &rosc::encoder::encode(&empty).unwrap()), 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_udp_sender_reaches_device() {
        let motor = MotorProbe::bind().await.unwrap();
        let sender = UdpMotorSender::bind().unwrap();
        let target = DeviceEndpoint::new(motor.local_addr());
        sender.send(target, TX_ADDR_PARAMETER, 42).unwrap();
        sender.send(target, TX_ADDR_LEGACY, 42).unwrap();

        let received = motor.wait_for(2, Duration::from_secs(2)).await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].addr, TX_ADDR_PARAMETER);
        assert_eq!(received[1].addr, TX_ADDR_LEGACY);
        assert!(received.iter().all(|m| m.args == vec![OscType::Int(42)]));
    }

    #[tokio::test]
    async fn test_listener_feeds_router() {
        let (router, seen) = recording_router("/avatar/parameters/cut", ValueType::Bool);
        let socket = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = spawn_osc_listener(socket, Arc::new(router));

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let packet = message("/avatar/parameters/cut", OscType::Bool(true));
        let bytes = rosc::encoder::encode(&packet).unwrap();
        client.send_to(&bytes, addr).await.unwrap();

        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock(), vec![OscType::Bool(true)]);
        handle.abort();
    }
}

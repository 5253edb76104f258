/*!
Fake haptic device

Binds a localhost UDP socket and decodes everything it receives with `rosc`.
Bundles are flattened, so `messages()` only ever holds plain messages.
*/

use anyhow::Result;
use rosc::{OscMessage, OscPacket};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub struct MotorProbe {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<OscMessage>>>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MotorProbe {
    /// Binds on an OS-assigned localhost port.
    pub async fn bind() -> Result<Self> {
        Self::bind_to(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await
    }

    pub async fn bind_to(addr: SocketAddr) -> Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());

        let task = tokio::spawn({
            let received = received.clone();
            let notify = notify.clone();
            async move {
                let mut buf = vec![0u8; 65_536];
                loop {
                    let len = match socket.recv_from(&mut buf).await {
                        Ok((len, _)) => len,
                        Err(e) => {
                            log::warn!("[motor] receive error: {e}");
                            continue;
                        }
                    };
                    match rosc::decoder::decode_udp(&buf[..len]) {
                        Ok((_, packet)) => {
                            let mut messages = Vec::new();
                            flatten(packet, &mut messages);
                            log::debug!("[motor] {} message(s) on {addr}", messages.len());
                            received.lock().unwrap().extend(messages);
                            notify.notify_one();
                        }
                        Err(e) => log::warn!("[motor] undecodable datagram: {e:?}"),
                    }
                }
            }
        });

        log::info!("[motor] listening on {addr}");
        Ok(Self { addr, received, notify, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Everything received so far, in arrival order.
    pub fn messages(&self) -> Vec<OscMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Waits until at least `count` messages arrived or `limit` elapsed,
    /// then returns whatever was received.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> Vec<OscMessage> {
        let _ = tokio::time::timeout(limit, async {
            while self.received.lock().unwrap().len() < count {
                self.notify.notified().await;
            }
        })
        .await;
        self.messages()
    }

    pub fn clear(&self) {
        self.received.lock().unwrap().clear();
    }
}

impl Drop for MotorProbe {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::OscType;

    async fn send(to: SocketAddr, addr: &str, value: i32) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args: vec![OscType::Int(value)],
        });
        socket.send_to(&rosc::encoder::encode(&packet).unwrap(), to).await.unwrap();
    }

    #[tokio::test]
    async fn records_messages_in_order() {
        let motor = MotorProbe::bind().await.unwrap();
        send(motor.local_addr(), "/motor", 10).await;
        send(motor.local_addr(), "/motor", 20).await;

        let got = motor.wait_for(2, Duration::from_secs(2)).await;
        let values: Vec<_> = got.iter().map(|m| m.args[0].clone()).collect();
        assert_eq!(values, vec![OscType::Int(10), OscType::Int(20)]);

        motor.clear();
        assert!(motor.messages().is_empty());
    }

    #[tokio::test]
    async fn wait_for_gives_up_after_limit() {
        let motor = MotorProbe::bind().await.unwrap();
        let got = motor.wait_for(1, Duration::from_millis(50)).await;
        assert!(got.is_empty());
    }
}

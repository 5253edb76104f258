/**
 * GIGGLE OSC SIM - Manual exercise of a running router
 *
 * ROLE: Stands in for the avatar. Asks the router's OSCQuery service where it
 * listens, reads the same zone file, then ramps every configured parameter
 * 0 -> 1 -> 0, once at 20% and once at 100% max speed, waiting for Enter
 * before each sweep.
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use giggle_devkit::sweep;
use rosc::{OscMessage, OscPacket, OscType};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::UdpSocket;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const RX_PREFIX: &str = "/avatar/parameters/";
const DEFAULTS_SECTION: &str = "Defaults";
const MAX_SPEED_KEY: &str = "parameter_max_speed";
const STEP: f32 = 0.1;

#[derive(Debug, Parser)]
#[command(about = "Sweeps every configured avatar parameter through a running router")]
struct Args {
    /// OSCQuery base URL of the router, e.g. http://127.0.0.1:9010
    #[arg(long, env = "GIGGLE_OSCQUERY_URL")]
    target: String,

    /// Zone file the router was started with
    #[arg(long, env = "GIGGLE_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Delay between two values of a sweep
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct HostInfo {
    name: String,
    osc_ip: IpAddr,
    osc_port: u16,
}

/// Addresses to drive, derived from the zone file.
#[derive(Debug, PartialEq)]
struct SweepPlan {
    max_speed: String,
    parameters: Vec<String>,
}

fn plan_from_config(text: &str) -> Result<SweepPlan> {
    let root: toml::Table = toml::from_str(text).context("invalid zone file")?;
    let defaults = root.get(DEFAULTS_SECTION).and_then(|v| v.as_table());
    let lookup = |zone: &toml::Table, key: &str| -> Option<String> {
        zone.get(key)
            .or_else(|| defaults.and_then(|d| d.get(key)))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("{RX_PREFIX}{s}"))
    };

    let mut max_speed = None;
    let mut parameters: Vec<String> = Vec::new();
    for (name, value) in root.iter().filter(|(name, _)| name.as_str() != DEFAULTS_SECTION) {
        let Some(zone) = value.as_table() else {
            bail!("[{name}] must be a table");
        };
        if max_speed.is_none() {
            max_speed = lookup(zone, MAX_SPEED_KEY);
        }
        let mut keys: Vec<&String> =
            zone.keys().chain(defaults.into_iter().flat_map(|d| d.keys())).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if !key.starts_with("parameter") || key == MAX_SPEED_KEY {
                continue;
            }
            if let Some(address) = lookup(zone, key) {
                if !parameters.contains(&address) {
                    parameters.push(address);
                }
            }
        }
    }

    let max_speed = max_speed.context("no zone defines parameter_max_speed")?;
    Ok(SweepPlan { max_speed, parameters })
}

async fn fetch_host_info(base: &str) -> Result<HostInfo> {
    let url = format!("{}/?HOST_INFO", base.trim_end_matches('/'));
    let info = reqwest::get(&url)
        .await
        .with_context(|| format!("cannot reach {url}"))?
        .error_for_status()?
        .json::<HostInfo>()
        .await
        .context("unexpected HOST_INFO payload")?;
    Ok(info)
}

struct Simulator {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
}

impl Simulator {
    async fn send(&self, address: &str, value: f32) -> Result<()> {
        let packet = OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args: vec![OscType::Float(value)],
        });
        let bytes =
            rosc::encoder::encode(&packet).map_err(|e| anyhow::anyhow!("encode failed: {e:?}"))?;
        self.socket.send_to(&bytes, self.target).await?;
        Ok(())
    }

    async fn sweep_parameter(&self, address: &str, targets: &[f32]) -> Result<()> {
        for value in sweep(STEP, targets) {
            println!("- Setting {address} to {value:.1}");
            self.send(address, value).await?;
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }
}

async fn wait_enter(stdin: &mut Lines<BufReader<Stdin>>, prompt: &str) -> Result<()> {
    println!("{prompt} Press Enter to continue.");
    stdin.next_line().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let host = fetch_host_info(&args.target).await?;
    info!(service = %host.name, ip = %host.osc_ip, port = host.osc_port, "router found");

    let text = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("cannot read {}", args.config.display()))?;
    let plan = plan_from_config(&text)?;
    debug!(?plan, "sweep plan");

    let sim = Simulator {
        socket: UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
        target: SocketAddr::new(host.osc_ip, host.osc_port),
        interval: Duration::from_millis(args.interval_ms),
    };
    println!("Sending to {}", sim.target);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    for address in &plan.parameters {
        wait_enter(&mut stdin, &format!("About to sweep {address} at 20% motor speed.")).await?;
        sim.sweep_parameter(&plan.max_speed, &[1.0, 0.2]).await?;
        sim.sweep_parameter(address, &[0.0, 1.0, 0.0]).await?;
        println!();

        wait_enter(&mut stdin, &format!("About to sweep {address} at 100% motor speed.")).await?;
        sim.sweep_parameter(&plan.max_speed, &[0.2, 1.0]).await?;
        sim.sweep_parameter(address, &[0.0, 1.0, 0.0]).await?;
        println!();
    }
    info!("all parameters swept");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_skips_max_speed_and_dedups() {
        let text = r#"
[Defaults]
parameter_max_speed = "max_speed"
timeout = 2

[Chest]
type = "VelocityZone"
parameter_proximity = "prox_chest"
parameter_cutoff = "cut"
parameter_lateral_x = ""

[Head]
type = "SimpleProximityZone"
parameter_proximity = "prox_head"
parameter_cutoff = "cut"
"#;
        let plan = plan_from_config(text).unwrap();
        assert_eq!(plan.max_speed, "/avatar/parameters/max_speed");
        assert_eq!(
            plan.parameters,
            vec![
                "/avatar/parameters/cut",
                "/avatar/parameters/prox_chest",
                "/avatar/parameters/prox_head",
            ]
        );
    }

    #[test]
    fn test_plan_requires_max_speed() {
        assert!(plan_from_config("[Head]\nparameter_proximity = \"p\"\n").is_err());
    }

    #[test]
    fn test_host_info_from_router_payload() {
        let body = r#"{"NAME":"Giggle OSC Router","OSC_IP":"127.0.0.1","OSC_PORT":9001,
            "OSC_TRANSPORT":"UDP","EXTENSIONS":{"ACCESS":true,"VALUE":false,"DESCRIPTION":false}}"#;
        let info: HostInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.osc_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(info.osc_port, 9001);
    }

    #[tokio::test]
    async fn test_sweep_reaches_router_socket() {
        let motor = giggle_devkit::MotorProbe::bind().await.unwrap();
        let sim = Simulator {
            socket: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap(),
            target: motor.local_addr(),
            interval: Duration::from_millis(1),
        };
        sim.sweep_parameter("/avatar/parameters/prox", &[0.0, 1.0]).await.unwrap();
        let got = motor.wait_for(11, Duration::from_secs(2)).await;
        assert_eq!(got.len(), 11);
        assert_eq!(got[10].args, vec![OscType::Float(1.0)]);
    }
}

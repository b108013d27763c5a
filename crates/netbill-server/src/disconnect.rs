//! Forced session termination
//!
//! Three transports are tried in a fixed order, each skipped when
//! disabled: an RFC 3576 Disconnect-Request to the NAS, an external
//! script, and a site-specific UDP "Packet of Death". The first transport
//! that succeeds wins; if all fail the caller sees the last error.

use crate::config::DisconnectConfig;
use crate::error::CoreError;
use netbill_proto::{auth, Attribute, AttributeType, Code, ErrorCause, Packet};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// RFC 3576 destination port for Disconnect-Request
const DISCONNECT_PORT: u16 = 3799;

/// NAS coordinates carried in the session context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NasSpec {
    pub nas_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub nas_port: Option<u32>,
    #[serde(default)]
    pub nas_identifier: Option<String>,
}

/// Disconnect engine
pub struct DisconnectService {
    config: DisconnectConfig,
}

impl DisconnectService {
    pub fn new(config: DisconnectConfig) -> Self {
        DisconnectService { config }
    }

    /// Ask the NAS to drop a session. Succeeds on the first transport
    /// that works; returns the last transport error when all fail.
    pub async fn disconnect_session(
        &self,
        username: &str,
        sid: &str,
        ip: Ipv4Addr,
        nas_spec: &NasSpec,
    ) -> Result<(), CoreError> {
        info!(username, sid, ip = %ip, "Initiating disconnect");

        let mut last_err: Option<CoreError> = None;
        let mut attempted = false;

        if self.config.radius_enabled {
            attempted = true;
            match self.send_radius_disconnect(username, sid, ip, nas_spec).await {
                Ok(()) => {
                    info!(username, sid, "RADIUS disconnect acknowledged");
                    return Ok(());
                }
                Err(e) => {
                    warn!(username, sid, error = %e, "RADIUS disconnect failed");
                    last_err = Some(e);
                }
            }
        }

        if self.config.script_enabled && !self.config.script_path.is_empty() {
            attempted = true;
            match self.run_disconnect_script(username, sid, ip, nas_spec).await {
                Ok(()) => {
                    info!(username, sid, "Script disconnect succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(username, sid, error = %e, "Script disconnect failed");
                    last_err = Some(e);
                }
            }
        }

        if self.config.pod_enabled && !self.config.pod_endpoint.is_empty() {
            attempted = true;
            match self.send_pod_packet(username, sid, ip).await {
                Ok(()) => {
                    info!(username, sid, "PoD disconnect sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(username, sid, error = %e, "PoD disconnect failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(err) => Err(err),
            None if !attempted => Err(CoreError::Internal(
                "no disconnect transports configured".to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Build the Disconnect-Request for a session.
    ///
    /// Attribute order is fixed: User-Name, Acct-Session-Id,
    /// Framed-IP-Address, then the NAS attributes that are known.
    fn build_disconnect_request(
        &self,
        username: &str,
        sid: &str,
        ip: Ipv4Addr,
        nas_spec: &NasSpec,
        identifier: u8,
    ) -> Result<Packet, CoreError> {
        let mut packet = Packet::new(Code::DisconnectRequest, identifier);

        if !username.is_empty() {
            packet.add_attribute(
                Attribute::text(AttributeType::UserName as u8, username)
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }
        if !sid.is_empty() {
            packet.add_attribute(
                Attribute::text(AttributeType::AcctSessionId as u8, sid)
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }
        packet.add_attribute(
            Attribute::ipv4(AttributeType::FramedIpAddress as u8, ip.octets())
                .map_err(|e| CoreError::Internal(e.to_string()))?,
        );

        if let Some(nas_ip) = nas_spec.nas_ip {
            packet.add_attribute(
                Attribute::ipv4(AttributeType::NasIpAddress as u8, nas_ip.octets())
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }
        if let Some(nas_port) = nas_spec.nas_port {
            packet.add_attribute(
                Attribute::integer(AttributeType::NasPort as u8, nas_port)
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }
        if let Some(nas_identifier) = &nas_spec.nas_identifier {
            packet.add_attribute(
                Attribute::text(AttributeType::NasIdentifier as u8, nas_identifier.as_str())
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }

        packet.sign(self.config.secret.as_bytes());
        Ok(packet)
    }

    async fn send_radius_disconnect(
        &self,
        username: &str,
        sid: &str,
        ip: Ipv4Addr,
        nas_spec: &NasSpec,
    ) -> Result<(), CoreError> {
        let nas_ip = nas_spec
            .nas_ip
            .ok_or_else(|| CoreError::Input("no NAS IP in session context".to_string()))?;

        let packet =
            self.build_disconnect_request(username, sid, ip, nas_spec, auth::random_identifier())?;
        let wire = packet
            .encode()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let nas_timeout = Duration::from_secs(self.config.nas_timeout);
        let mut last_err = CoreError::Timeout("no attempts made".to_string());

        for attempt in 1..=self.config.retries {
            debug!(nas_ip = %nas_ip, attempt, "Sending Disconnect-Request");

            match self.exchange(&wire, nas_ip, nas_timeout).await {
                Ok(response) => return self.process_response(&response, username, sid),
                Err(e) => {
                    warn!(attempt, error = %e, "Disconnect attempt failed, retrying");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// One request/response round trip over UDP
    async fn exchange(
        &self,
        wire: &[u8],
        nas_ip: Ipv4Addr,
        deadline: Duration,
    ) -> Result<Vec<u8>, CoreError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((nas_ip, DISCONNECT_PORT))
            .await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; Packet::MAX_WIRE_LEN];
        let n = timeout(deadline, socket.recv(&mut buf))
            .await
            .map_err(|_| CoreError::Timeout(format!("NAS {} did not answer", nas_ip)))??;

        if n < Packet::HEADER_LEN {
            return Err(CoreError::Internal(format!(
                "short response from NAS: {} bytes",
                n
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn process_response(&self, raw: &[u8], username: &str, sid: &str) -> Result<(), CoreError> {
        match raw.first().copied() {
            Some(code) if code == Code::DisconnectAck.as_u8() => {
                info!(username, sid, "Disconnect ACK received");
                Ok(())
            }
            Some(code) if code == Code::DisconnectNak.as_u8() => {
                let cause = parse_error_cause(raw).unwrap_or(ErrorCause::SessionContextNotFound);
                warn!(username, sid, cause = %cause, "Disconnect NAK received");
                Err(CoreError::Nak(cause))
            }
            Some(code) => {
                warn!(username, sid, code, "Unknown disconnect response code");
                Err(CoreError::Internal(format!(
                    "unknown response code: {}",
                    code
                )))
            }
            None => Err(CoreError::Internal("empty response".to_string())),
        }
    }

    /// Exec the configured disconnect script with positional arguments
    /// `[username, sid, ip, nas_ip]` and the configured extra environment.
    /// The script is killed once `script_timeout` elapses.
    async fn run_disconnect_script(
        &self,
        username: &str,
        sid: &str,
        ip: Ipv4Addr,
        nas_spec: &NasSpec,
    ) -> Result<(), CoreError> {
        let nas_ip = nas_spec
            .nas_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        info!(script = %self.config.script_path, username, sid, "Executing disconnect script");

        let mut command = Command::new(&self.config.script_path);
        command
            .arg(username)
            .arg(sid)
            .arg(ip.to_string())
            .arg(&nas_ip)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for pair in &self.config.script_env {
            if let Some((key, value)) = pair.split_once('=') {
                command.env(key, value);
            }
        }

        let child = command.spawn()?;
        let output = timeout(
            Duration::from_secs(self.config.script_timeout),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            CoreError::Timeout(format!(
                "disconnect script exceeded {}s",
                self.config.script_timeout
            ))
        })??;

        if output.status.success() {
            return Ok(());
        }

        let mut excerpt = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !excerpt.is_empty() {
                excerpt.push('\n');
            }
            excerpt.push_str(stderr.trim());
        }
        excerpt.truncate(512);

        Err(CoreError::Internal(format!(
            "disconnect script exited with {}: {}",
            output.status.code().unwrap_or(-1),
            excerpt
        )))
    }

    /// Last-resort UDP signal understood by site tooling
    async fn send_pod_packet(&self, username: &str, sid: &str, ip: Ipv4Addr) -> Result<(), CoreError> {
        let payload = format!("DISCONNECT:{}:{}:{}", username, sid, ip);
        info!(endpoint = %self.config.pod_endpoint, "Sending PoD packet");

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        timeout(Duration::from_secs(self.config.pod_timeout), async {
            socket.connect(&self.config.pod_endpoint).await?;
            socket.send(payload.as_bytes()).await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|_| CoreError::Timeout("PoD endpoint unreachable".to_string()))??;

        Ok(())
    }
}

/// Scan response attributes for Error-Cause (101)
fn parse_error_cause(raw: &[u8]) -> Option<ErrorCause> {
    let packet = Packet::decode(raw).ok()?;
    let attr = packet.attribute(AttributeType::ErrorCause as u8)?;
    ErrorCause::from_u32(attr.as_integer().ok()?)
}

//! ICMP echo with native sockets and a `ping` command fallback.
//!
//! Native echoes run on blocking sockets inside `spawn_blocking`.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier/sequence pair distinguishing concurrent echoes, even to one destination.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows it
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request to `address` and wait for the matching reply.
///
/// Returns the round-trip time on success.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_address(address).await?;

        let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        return match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping failed with permission error for {}, falling back to command: {}",
                    address,
                    msg
                );
                run_ping_command(address, timeout).await
            }
            other => other,
        };
    }

    run_ping_command(address, timeout).await
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// Echo flavour for one address family.
struct EchoKind {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// ICMPv6 checksums are filled in by the kernel.
    compute_checksum: bool,
}

static ECHO_V4: EchoKind = EchoKind {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    compute_checksum: true,
};

static ECHO_V6: EchoKind = EchoKind {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    compute_checksum: false,
};

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let kind = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    // RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(kind.domain, Type::RAW, Some(kind.protocol)) {
        Ok(s) => (s, true),
        Err(_) => Socket::new(kind.domain, Type::DGRAM, Some(kind.protocol))
            .map(|s| (s, false))
            .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?,
    };

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(kind, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => ProbeError::Network(format!("Failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        // DGRAM sockets rewrite the identifier and only deliver our own replies
        let expected_id = raw.then_some(identifier);
        if is_echo_reply(kind, reply, expected_id, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Check whether `buf` holds the echo reply we are waiting for.
///
/// IPv4 RAW sockets prepend the IP header, which is skipped first.
fn is_echo_reply(kind: &EchoKind, buf: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if kind.domain == Domain::IPV4 && buf.first().is_some_and(|b| b >> 4 == 4) {
        ((buf[0] & 0x0f) as usize) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    icmp[0] == kind.reply_type
        && identifier.map_or(true, |id| id == reply_id)
        && reply_seq == sequence
}

/// Build an echo request: 8 byte header plus a 56 byte payload.
fn build_echo_request(kind: &EchoKind, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = kind.request_type;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let nonce: u64 = rand::random();
    packet[8..16].copy_from_slice(&nonce.to_be_bytes());

    if kind.compute_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Run one `ping` via the system command; success is the command's exit status.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let start = Instant::now();
    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;
    let elapsed = start.elapsed();

    if output.status.success() {
        return Ok(elapsed);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        Err(ProbeError::Timeout(timeout))
    } else {
        Err(ProbeError::Command(format!("ping failed: {}", stderr.trim())))
    }
}

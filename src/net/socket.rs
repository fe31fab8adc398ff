//! Socket tuning.
//!
//! # Responsibilities
//! - Forward only customized socket options (value differs from its sentinel)
//! - Apply the forwarded options the platform supports to the listening socket
//! - Apply per-stream options in the acceptor
//!
//! Accepted sockets inherit buffer sizes, keep-alive and linger from the
//! listening socket; TCP_NODELAY is set again on every stream.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use axum_server::accept::Accept;
use tokio::net::{TcpSocket, TcpStream};

use crate::config::schema::*;

/// Transport property set, keyed by dotted option name.
pub type TransportProperties = BTreeMap<String, String>;

fn forward<T: PartialEq + ToString>(
    props: &mut TransportProperties,
    name: &str,
    value: T,
    sentinel: T,
) {
    if value != sentinel {
        props.insert(format!("socket.{}", name), value.to_string());
    }
}

/// Socket options whose value differs from the documented sentinel.
pub fn socket_properties(config: &SocketConfig) -> TransportProperties {
    let mut props = TransportProperties::new();
    forward(&mut props, "direct_buffer", config.direct_buffer, SOCKET_DIRECT_BUFFER);
    forward(&mut props, "rx_buf_size", config.rx_buf_size_bytes, SOCKET_RX_BUF_SIZE);
    forward(&mut props, "tx_buf_size", config.tx_buf_size_bytes, SOCKET_TX_BUF_SIZE);
    forward(&mut props, "app_read_buf_size", config.app_read_buf_size_bytes, SOCKET_APP_READ_BUF_SIZE);
    forward(&mut props, "app_write_buf_size", config.app_write_buf_size_bytes, SOCKET_APP_WRITE_BUF_SIZE);
    forward(&mut props, "buffer_pool", config.buffer_pool, SOCKET_BUFFER_POOL);
    forward(&mut props, "buffer_pool_size", config.buffer_pool_size_bytes, SOCKET_BUFFER_POOL_SIZE);
    forward(&mut props, "processor_cache", config.processor_cache, SOCKET_PROCESSOR_CACHE);
    forward(&mut props, "key_cache", config.key_cache, SOCKET_KEY_CACHE);
    forward(&mut props, "event_cache", config.event_cache, SOCKET_EVENT_CACHE);
    forward(&mut props, "tcp_no_delay", config.tcp_no_delay, SOCKET_TCP_NO_DELAY);
    forward(&mut props, "so_keep_alive", config.so_keep_alive, SOCKET_SO_KEEP_ALIVE);
    forward(&mut props, "oob_inline", config.oob_inline, SOCKET_OOB_INLINE);
    forward(&mut props, "so_reuse_address", config.so_reuse_address, SOCKET_SO_REUSE_ADDRESS);
    forward(&mut props, "so_linger_on", config.so_linger_on, SOCKET_SO_LINGER_ON);
    forward(&mut props, "so_linger_time", config.so_linger_time_sec, SOCKET_SO_LINGER_TIME_SEC);
    forward(&mut props, "so_timeout", config.so_timeout_ms, SOCKET_SO_TIMEOUT_MS);
    forward(&mut props, "so_traffic_class", config.so_traffic_class, SOCKET_SO_TRAFFIC_CLASS);
    forward(&mut props, "performance_connection_time", config.performance_connection_time, SOCKET_PERFORMANCE_CONNECTION_TIME);
    forward(&mut props, "performance_latency", config.performance_latency, SOCKET_PERFORMANCE_LATENCY);
    forward(&mut props, "performance_bandwidth", config.performance_bandwidth, SOCKET_PERFORMANCE_BANDWIDTH);
    forward(&mut props, "unlock_timeout", config.unlock_timeout_ms, SOCKET_UNLOCK_TIMEOUT_MS);
    props
}

/// The subset of customized options the transport applies to real sockets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub recv_buffer_size: Option<u32>,
    pub send_buffer_size: Option<u32>,
    pub reuse_address: Option<bool>,
    pub keep_alive: Option<bool>,
    pub tcp_no_delay: Option<bool>,
    /// `Some(None)` turns lingering off.
    pub linger: Option<Option<Duration>>,
    pub traffic_class: Option<u32>,
}

impl SocketOptions {
    pub fn from_config(config: &SocketConfig) -> Self {
        let linger = if config.so_linger_on != SOCKET_SO_LINGER_ON {
            Some(None)
        } else if config.so_linger_time_sec != SOCKET_SO_LINGER_TIME_SEC {
            Some(Some(Duration::from_secs(config.so_linger_time_sec)))
        } else {
            None
        };

        Self {
            recv_buffer_size: (config.rx_buf_size_bytes != SOCKET_RX_BUF_SIZE)
                .then(|| clamp_u32(config.rx_buf_size_bytes)),
            send_buffer_size: (config.tx_buf_size_bytes != SOCKET_TX_BUF_SIZE)
                .then(|| clamp_u32(config.tx_buf_size_bytes)),
            reuse_address: (config.so_reuse_address != SOCKET_SO_REUSE_ADDRESS)
                .then_some(config.so_reuse_address),
            keep_alive: (config.so_keep_alive != SOCKET_SO_KEEP_ALIVE).then_some(config.so_keep_alive),
            tcp_no_delay: (config.tcp_no_delay != SOCKET_TCP_NO_DELAY).then_some(config.tcp_no_delay),
            linger,
            traffic_class: (config.so_traffic_class != SOCKET_SO_TRAFFIC_CLASS)
                .then_some(config.so_traffic_class),
        }
    }

    /// Apply options to a socket before it starts listening.
    pub fn apply_to_listener(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(reuse) = self.reuse_address {
            socket.set_reuseaddr(reuse)?;
        }
        if let Some(keep_alive) = self.keep_alive {
            socket.set_keepalive(keep_alive)?;
        }
        if let Some(linger) = self.linger {
            socket.set_linger(linger)?;
        }
        #[cfg(target_os = "linux")]
        if let Some(tos) = self.traffic_class {
            #[allow(deprecated)]
            socket.set_tos(tos)?;
        }
        Ok(())
    }
}

fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Acceptor that tunes every accepted stream before handing it on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketTuningAcceptor {
    tcp_no_delay: Option<bool>,
}

impl SocketTuningAcceptor {
    pub fn new(options: &SocketOptions) -> Self {
        Self {
            tcp_no_delay: options.tcp_no_delay,
        }
    }
}

impl<S> Accept<TcpStream, S> for SocketTuningAcceptor {
    type Stream = TcpStream;
    type Service = S;
    type Future = std::future::Ready<io::Result<(TcpStream, S)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        if let Some(nodelay) = self.tcp_no_delay {
            if let Err(e) = stream.set_nodelay(nodelay) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY on accepted stream");
            }
        }
        std::future::ready(Ok((stream, service)))
    }
}

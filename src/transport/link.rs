//! Serial port or TCP socket carrying the bus.
//!
//! - Serial: RS485 adapter opened through `tokio-serial`
//! - Socket: RS485-to-TCP converter reached with a plain TCP stream
//!
//! # Example
//!
//! ```ignore
//! use wallpad_bridge::config::{SocketConfig, TransportConfig};
//! use wallpad_bridge::transport;
//!
//! let config = TransportConfig::Socket(SocketConfig {
//!     address: "192.168.0.20".into(),
//!     port: 8899,
//! });
//! let stream = transport::connect(&config).await?;
//! ```

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::{Parity, SerialConfig, SocketConfig, TransportConfig};
use crate::error::{BridgeError, Result};

/// Connected bus link.
pub enum BusStream {
    Serial(SerialStream),
    Tcp(TcpStream),
}

impl fmt::Debug for BusStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusStream::Serial(_) => f.write_str("BusStream::Serial"),
            BusStream::Tcp(stream) => f.debug_tuple("BusStream::Tcp").field(stream).finish(),
        }
    }
}

/// Open the configured link.
pub async fn connect(config: &TransportConfig) -> Result<BusStream> {
    match config {
        TransportConfig::Serial(serial) => open_serial(serial),
        TransportConfig::Socket(socket) => open_socket(socket).await,
    }
}

fn open_serial(config: &SerialConfig) -> Result<BusStream> {
    let port = tokio_serial::new(&config.port, config.baudrate)
        .data_bits(data_bits(config.databits)?)
        .parity(parity(config.parity))
        .stop_bits(stop_bits(config.stopbits)?)
        .open_native_async()?;
    tracing::info!(port = %config.port, baud = config.baudrate, "serial port opened");
    Ok(BusStream::Serial(port))
}

async fn open_socket(config: &SocketConfig) -> Result<BusStream> {
    let stream = TcpStream::connect((config.address.as_str(), config.port)).await?;
    stream.set_nodelay(true)?;
    tracing::info!(address = %config.address, port = config.port, "socket connected");
    Ok(BusStream::Tcp(stream))
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(BridgeError::Config(format!("unsupported data bits: {other}"))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(BridgeError::Config(format!("unsupported stop bits: {other}"))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

impl AsyncRead for BusStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusStream::Serial(port) => Pin::new(port).poll_read(cx, buf),
            BusStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BusStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BusStream::Serial(port) => Pin::new(port).poll_write(cx, buf),
            BusStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusStream::Serial(port) => Pin::new(port).poll_flush(cx),
            BusStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusStream::Serial(port) => Pin::new(port).poll_shutdown(cx),
            BusStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

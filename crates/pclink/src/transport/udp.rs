//! UDP link used by network cards on the client side.
//!
//! Every request is one datagram and every reply is one datagram. The client
//! may put the opcode in the high byte of its source port; a zero high byte
//! means the opcode is the first byte of the payload. Replies go to the
//! configured client address, at the port the request came from.

use {
    super::{Flavor, Transport},
    crate::{
        error::{Errno, errno::*},
        io_err, res,
        utils::Result,
    },
    async_trait::async_trait,
    bytes::{Buf, BufMut, BytesMut},
    futures::sink::SinkExt,
    log::info,
    std::net::{IpAddr, SocketAddr},
    tokio::net::{UdpSocket, lookup_host},
    tokio_stream::StreamExt,
    tokio_util::{codec::BytesCodec, udp::UdpFramed},
};

pub const DEFAULT_CLIENT: &str = "127.0.0.1";
pub const BASE_PORT: u16 = 64000;

/// Largest packet in either direction, including the two port bytes.
const PACKET_SIZE: usize = 1030;

pub struct UdpTransport {
    client: String,
    network: u16,
    client_ip: Option<IpAddr>,
    framed: Option<UdpFramed<BytesCodec>>,
    input: BytesMut,
    output: BytesMut,
    peer: Option<SocketAddr>,
    latched: Option<Errno>,
}

impl UdpTransport {
    pub fn new(client: Option<&str>, network: u16) -> UdpTransport {
        let client = client.unwrap_or(DEFAULT_CLIENT).to_owned();
        info!("Using ETH driver connecting to {} network {}", client, network);
        UdpTransport {
            client,
            network,
            client_ip: None,
            framed: None,
            input: BytesMut::with_capacity(PACKET_SIZE),
            output: BytesMut::with_capacity(PACKET_SIZE),
            peer: None,
            latched: None,
        }
    }

    fn port(&self) -> u16 {
        BASE_PORT.wrapping_add(self.network)
    }

    fn latch(&mut self, errno: Errno) {
        self.latched.get_or_insert(errno);
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "ETH"
    }

    fn flavor(&self) -> Flavor {
        Flavor::Datagram
    }

    async fn initialize(&mut self) -> Result<()> {
        self.framed = None;
        if self.client_ip.is_none() {
            let mut addrs = lookup_host((self.client.as_str(), 0)).await?;
            let addr = addrs
                .next()
                .ok_or_else(|| io_err!(NotFound, format!("Hostname \"{}\" not found", self.client)))?;
            self.client_ip = Some(addr.ip());
        }
        let socket = UdpSocket::bind(("0.0.0.0", self.port())).await?;
        info!("Listening on port {} for C64 at {}", self.port(), self.client);
        self.framed = Some(UdpFramed::new(socket, BytesCodec::new()));
        Ok(())
    }

    async fn wait(&mut self, _event: u8) -> Result<u8> {
        let (Some(framed), Some(client_ip)) = (self.framed.as_mut(), self.client_ip) else {
            return res!(ENODEV);
        };
        let (data, from) = match framed.next().await {
            Some(Ok(packet)) => packet,
            _ => return res!(EIO),
        };

        let port = from.port();
        self.peer = Some(SocketAddr::new(client_ip, port));
        self.latched = None;
        self.output.clear();
        self.input.clear();
        self.input.put_u16(port);
        let room = PACKET_SIZE - self.input.len();
        self.input.extend_from_slice(&data[..data.len().min(room)]);

        if port >> 8 != 0 {
            return Ok(self.input.get_u8());
        }
        self.input.advance(2);
        match self.input.has_remaining() {
            true => Ok(self.input.get_u8()),
            false => Ok(0),
        }
    }

    async fn getb(&mut self, _use_timeout: bool) -> Option<u8> {
        if self.latched.is_some() || !self.input.has_remaining() {
            return None;
        }
        Some(self.input.get_u8())
    }

    async fn getbytes(&mut self, buf: &mut [u8]) {
        if self.input.remaining() < buf.len() {
            let n = self.input.remaining();
            self.input.copy_to_slice(&mut buf[..n]);
            buf[n..].fill(0);
            self.latch(EIO);
            return;
        }
        self.input.copy_to_slice(buf);
    }

    async fn sendb(&mut self, byte: u8) {
        if self.output.len() >= PACKET_SIZE {
            self.latch(EIO);
            return;
        }
        self.output.put_u8(byte);
    }

    async fn sendbytes(&mut self, data: &[u8]) {
        let room = PACKET_SIZE - self.output.len();
        if data.len() > room {
            self.output.extend_from_slice(&data[..room]);
            self.latch(EIO);
            return;
        }
        self.output.extend_from_slice(data);
    }

    async fn flush(&mut self) -> Result<()> {
        if self.output.is_empty() || self.latched.is_some() {
            return self.done();
        }
        let packet = self.output.split().freeze();
        let (Some(framed), Some(peer)) = (self.framed.as_mut(), self.peer) else {
            return res!(ENODEV);
        };
        if framed.send((packet, peer)).await.is_err() {
            return res!(EIO);
        }
        self.done()
    }

    fn done(&self) -> Result<()> {
        match self.latched {
            Some(e) => res!(e),
            None => Ok(()),
        }
    }

    async fn clean(&mut self) -> bool {
        self.input.clear();
        self.output.clear();
        false
    }

    async fn shutdown(&mut self) {
        self.framed = None;
    }
}

//! TCP client link to an emulator's PCLink bridge.

use {
    super::{Flavor, Transport},
    crate::{
        error::{Errno, errno::*},
        res,
        utils::Result,
    },
    async_trait::async_trait,
    bytes::{Buf, BytesMut},
    log::{info, warn},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    },
};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 64245;

const BUFFER_SIZE: usize = 1024;

pub struct TcpTransport {
    address: String,
    port: u16,
    stream: Option<TcpStream>,
    input: BytesMut,
    output: BytesMut,
    latched: Option<Errno>,
}

impl TcpTransport {
    pub fn new(address: Option<&str>, port: Option<u16>) -> TcpTransport {
        let address = address.unwrap_or(DEFAULT_ADDRESS).to_owned();
        let port = port.unwrap_or(DEFAULT_PORT);
        info!("Using VICE driver connecting to {}:{}", address, port);
        TcpTransport {
            address,
            port,
            stream: None,
            input: BytesMut::with_capacity(BUFFER_SIZE),
            output: BytesMut::with_capacity(BUFFER_SIZE),
            latched: None,
        }
    }

    async fn refill(&mut self) -> bool {
        if self.latched.is_some() {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            self.latched = Some(ENODEV);
            return false;
        };
        self.input.clear();
        self.input.reserve(BUFFER_SIZE);
        match stream.read_buf(&mut self.input).await {
            Ok(n) if n > 0 => true,
            _ => {
                self.latched = Some(EIO);
                false
            }
        }
    }

    async fn write_out(&mut self) {
        if self.output.is_empty() || self.latched.is_some() {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            self.latched = Some(ENODEV);
            return;
        };
        if stream.write_all(&self.output).await.is_err() {
            self.latched = Some(EIO);
        }
        self.output.clear();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "VICE"
    }

    fn flavor(&self) -> Flavor {
        Flavor::Stream
    }

    async fn initialize(&mut self) -> Result<()> {
        self.stream = None;
        let stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Setting socket options failed: {}", e);
        }
        info!("Connected to {}:{}", self.address, self.port);
        self.stream = Some(stream);
        self.input.clear();
        self.output.clear();
        Ok(())
    }

    async fn wait(&mut self, _event: u8) -> Result<u8> {
        if self.stream.is_none() {
            return res!(ENODEV);
        }
        self.latched = None;
        match self.getb(true).await {
            Some(b) => Ok(b),
            None => res!(self.latched.unwrap_or(EIO)),
        }
    }

    async fn getb(&mut self, _use_timeout: bool) -> Option<u8> {
        if !self.input.has_remaining() && !self.refill().await {
            return None;
        }
        Some(self.input.get_u8())
    }

    async fn getbytes(&mut self, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.input.has_remaining() && !self.refill().await {
                return;
            }
            let n = self.input.remaining().min(buf.len() - filled);
            self.input.copy_to_slice(&mut buf[filled..filled + n]);
            filled += n;
        }
    }

    async fn sendb(&mut self, byte: u8) {
        if self.output.len() >= BUFFER_SIZE {
            self.write_out().await;
        }
        if self.latched.is_none() {
            self.output.extend_from_slice(&[byte]);
        }
    }

    async fn sendbytes(&mut self, data: &[u8]) {
        for chunk in data.chunks(BUFFER_SIZE) {
            if self.output.len() + chunk.len() > BUFFER_SIZE {
                self.write_out().await;
            }
            if self.latched.is_some() {
                return;
            }
            self.output.extend_from_slice(chunk);
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.write_out().await;
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
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exchange_with_emulator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[b'I', b'U', b'9', 0]).await.unwrap();
            let mut reply = [0u8; 3];
            socket.read_exact(&mut reply).await.unwrap();
            reply
        });

        let mut link = TcpTransport::new(Some("127.0.0.1"), Some(port));
        link.initialize().await.unwrap();
        assert_eq!(link.wait(0x5a).await.unwrap(), b'I');
        let mut command = [0u8; 3];
        link.getbytes(&mut command).await;
        assert_eq!(&command, &[b'U', b'9', 0]);
        link.done().unwrap();

        link.sendbytes(&[2, b'O']).await;
        link.sendb(b'K').await;
        link.flush().await.unwrap();
        assert_eq!(&peer.await.unwrap(), &[2, b'O', b'K']);
    }

    #[tokio::test]
    async fn closed_peer_latches() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut link = TcpTransport::new(Some("127.0.0.1"), Some(port));
        link.initialize().await.unwrap();
        peer.await.unwrap();
        assert!(link.wait(0x5a).await.is_err());
        assert_eq!(link.getb(false).await, None);
    }

    #[tokio::test]
    async fn wait_before_initialize() {
        let mut link = TcpTransport::new(None, None);
        assert_eq!(link.wait(0).await.unwrap_err().errno(), ENODEV);
    }
}

//! Scripted transport for driving the engine in tests.

use {
    crate::{
        error::{Errno, errno::*},
        res,
        transport::{Flavor, Transport},
        utils::Result,
    },
    async_trait::async_trait,
    std::collections::VecDeque,
};

/// Replays a fixed input script and records everything sent.
pub struct MemoryTransport {
    flavor: Flavor,
    input: VecDeque<u8>,
    output: Vec<u8>,
    flushes: usize,
    latched: Option<Errno>,
}

impl MemoryTransport {
    pub fn new(flavor: Flavor, input: &[u8]) -> MemoryTransport {
        MemoryTransport {
            flavor,
            input: input.iter().copied().collect(),
            output: Vec::new(),
            flushes: 0,
            latched: None,
        }
    }

    /// Queue more input behind what is left of the script.
    pub fn push(&mut self, input: &[u8]) {
        self.input.extend(input);
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "MEMORY"
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn wait(&mut self, _event: u8) -> Result<u8> {
        self.latched = None;
        match self.input.pop_front() {
            Some(b) => Ok(b),
            None => res!(ENODEV),
        }
    }

    async fn getb(&mut self, _use_timeout: bool) -> Option<u8> {
        if self.latched.is_some() {
            return None;
        }
        let byte = self.input.pop_front();
        if byte.is_none() {
            self.latched = Some(EIO);
        }
        byte
    }

    async fn getbytes(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.getb(false).await.unwrap_or(0);
        }
    }

    async fn sendb(&mut self, byte: u8) {
        if self.latched.is_none() {
            self.output.push(byte);
        }
    }

    async fn sendbytes(&mut self, data: &[u8]) {
        if self.latched.is_none() {
            self.output.extend_from_slice(data);
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
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
        true
    }

    async fn shutdown(&mut self) {}
}

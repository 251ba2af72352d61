use crate::protocol::mysql::constants::{MAX_PAYLOAD_LEN, PACKET_HEADER_LEN};

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Write};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffers one packet payload through [`Write`], then frames and emits it on
/// [`end_packet`](Self::end_packet), chunking at the 16M payload boundary.
/// The sequence id is stamped into each emitted frame and incremented.
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0; PACKET_HEADER_LEN];
        if self.is_empty() {
            // packet with an empty payload; only the header goes out.
            LittleEndian::write_u24(&mut header, 0);
            header[3] = self.seq();
            self.increase_seq();
            return self.inner_writer.write_all(&header).await;
        }
        let raw_packet = self.take_buffer();
        for chunk in raw_packet.chunks(MAX_PAYLOAD_LEN) {
            LittleEndian::write_u24(&mut header, chunk.len() as u32);
            header[3] = self.seq();
            self.increase_seq();
            self.inner_writer.write_all(&header).await?;
            self.inner_writer.write_all(chunk).await?;
        }
        Ok(())
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}

use crate::protocol::mysql::constants::{MAX_PAYLOAD_LEN, PACKET_HEADER_LEN};
use crate::protocol::mysql::packet::Packet;

use byteorder::{ByteOrder, LittleEndian};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// [`PacketReader`] pulls MySQL packets off a stream: 3-byte little-endian
/// payload length, 1-byte sequence id, payload.
pub struct PacketReader<R> {
    pub r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader { r }
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Next packet with its sequence id, or `None` on a clean EOF at a packet
    /// boundary. EOF inside a packet is an error: the peer walked away mid
    /// frame and there is nothing to resynchronize on.
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        let Some((mut len, mut seq)) = self.read_header_or_eof().await? else {
            return Ok(None);
        };
        let mut payload = vec![0u8; len];
        self.r.read_exact(&mut payload).await?;
        let mut packet = Packet::from_vec(payload);
        while len == MAX_PAYLOAD_LEN {
            let (next_len, next_seq) = self.read_header().await?;
            let mut chunk = vec![0u8; next_len];
            self.r.read_exact(&mut chunk).await?;
            packet.extend_from(&chunk);
            len = next_len;
            seq = next_seq;
        }
        Ok(Some((seq, packet)))
    }

    async fn read_header_or_eof(&mut self) -> io::Result<Option<(usize, u8)>> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        let mut filled = 0usize;
        while filled < PACKET_HEADER_LEN {
            let read = self.r.read(&mut header[filled..]).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{filled} unhandled header bytes"),
                ));
            }
            filled += read;
        }
        Ok(Some(split_header(&header)))
    }

    async fn read_header(&mut self) -> io::Result<(usize, u8)> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        self.r.read_exact(&mut header).await?;
        Ok(split_header(&header))
    }
}

fn split_header(header: &[u8; PACKET_HEADER_LEN]) -> (usize, u8) {
    (LittleEndian::read_u24(header) as usize, header[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_ping() {
        let mut reader = PacketReader::new(&[0x01u8, 0, 0, 0, 0x10][..]);
        let (seq, packet) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(seq, 0);
        assert_eq!(&*packet, &[0x10][..]);
        assert!(reader.next_async().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_exact() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; MAX_PAYLOAD_LEN][..]);
        data.push(0x00);
        data.push(0x00);
        data.push(0x00);
        data.push(1);

        let mut reader = PacketReader::new(&data[..]);
        let (seq, packet) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(packet.len(), MAX_PAYLOAD_LEN);
    }

    #[tokio::test]
    async fn test_long_more() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; MAX_PAYLOAD_LEN][..]);
        data.push(0x01);
        data.push(0x00);
        data.push(0x00);
        data.push(1);
        data.push(0x10);

        let mut reader = PacketReader::new(&data[..]);
        let (seq, packet) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(packet.len(), MAX_PAYLOAD_LEN + 1);
        assert_eq!(&packet[MAX_PAYLOAD_LEN..], &[0x10]);
    }

    #[tokio::test]
    async fn truncated_packet_is_an_error() {
        let mut reader = PacketReader::new(&[0x05u8, 0, 0, 0, 0x01][..]);
        let err = reader.next_async().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

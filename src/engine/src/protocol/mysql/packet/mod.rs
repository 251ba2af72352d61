pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use std::ops::Deref;

/// One re-assembled MySQL packet payload. Payloads above the 16M boundary
/// arrive split across continuation packets; the reader glues them back
/// together before handing the payload out.
/// [MySQL Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html)
#[derive(Clone, Debug)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Packet(vec)
    }

    pub(crate) fn extend_from(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Packet {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

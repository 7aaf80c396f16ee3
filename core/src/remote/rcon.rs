//! Source RCON client.
//!
//! Packet layout (little endian):
//! `size: i32 | id: i32 | type: i32 | body | 0x00 | 0x00`
//! where `size` counts everything after itself.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::PlayerInfo;
use crate::error::RemoteError;
use crate::storage::PlayerId;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type + two terminators.
const MIN_PACKET_SIZE: i32 = 10;
const MAX_PACKET_SIZE: i32 = 4096 + MIN_PACKET_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let body = self.body.as_bytes();
        dst.reserve(body.len() + 14);
        dst.put_i32_le(body.len() as i32 + MIN_PACKET_SIZE);
        dst.put_i32_le(self.id);
        dst.put_i32_le(self.kind);
        dst.put_slice(body);
        dst.put_u8(0);
        dst.put_u8(0);
    }

    /// Decode one packet from the front of `src`, or `None` if it is incomplete.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, RemoteError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let size = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(RemoteError::Protocol(format!("rcon packet size {size}")));
        }
        let size = size as usize;
        if src.len() < 4 + size {
            return Ok(None);
        }
        src.advance(4);
        let mut packet = src.split_to(size);
        let id = packet.get_i32_le();
        let kind = packet.get_i32_le();
        let body_len = packet.len() - 2;
        let body = String::from_utf8_lossy(&packet[..body_len]).into_owned();
        Ok(Some(Self { id, kind, body }))
    }
}

/// One authenticated RCON connection.
pub struct RconClient {
    stream: TcpStream,
    buf: BytesMut,
    next_id: i32,
}

impl RconClient {
    pub async fn connect(address: &str, password: &str) -> Result<Self, RemoteError> {
        let stream = TcpStream::connect(address).await?;
        let mut client = Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            next_id: 1,
        };
        client.authenticate(password).await?;
        Ok(client)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RemoteError> {
        let id = self.send(SERVERDATA_AUTH, password).await?;
        loop {
            let packet = self.recv().await?;
            // Some servers send an empty response value before the auth reply.
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(RemoteError::AuthRejected);
            }
            if packet.id == id {
                return Ok(());
            }
        }
    }

    /// Run a console command and return its output.
    pub async fn exec(&mut self, command: &str) -> Result<String, RemoteError> {
        let id = self.send(SERVERDATA_EXECCOMMAND, command).await?;
        loop {
            let packet = self.recv().await?;
            if packet.id == id && packet.kind == SERVERDATA_RESPONSE_VALUE {
                return Ok(packet.body);
            }
        }
    }

    async fn send(&mut self, kind: i32, body: &str) -> Result<i32, RemoteError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let mut out = BytesMut::new();
        RconPacket::new(id, kind, body).encode(&mut out);
        self.stream.write_all(&out).await?;
        Ok(id)
    }

    async fn recv(&mut self) -> Result<RconPacket, RemoteError> {
        loop {
            if let Some(packet) = RconPacket::decode(&mut self.buf)? {
                return Ok(packet);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(RemoteError::Protocol("rcon connection closed".to_string()));
            }
        }
    }
}

/// Parse the `listplayers` table:
///
/// ```text
/// ID | Name | NetID | IP | Score |
/// ===============================
/// 0 | Alpha | SteamNWI:76561198000000001 | 10.0.0.2 | 120 |
/// ```
pub fn parse_player_list(output: &str) -> Vec<PlayerInfo> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            if cols.len() < 3 || cols[0].parse::<u32>().is_err() {
                return None;
            }
            let name = cols[1];
            if name.is_empty() {
                return None;
            }
            let player_id = cols[2]
                .split_once(':')
                .map_or(cols[2], |(_, id)| id)
                .trim();
            let player_id = (!player_id.is_empty() && !player_id.eq_ignore_ascii_case("INVALID"))
                .then(|| PlayerId::new(player_id));
            let score = cols.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
            Some(PlayerInfo {
                name: name.to_string(),
                player_id,
                score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_packet_layout() {
        let mut buf = BytesMut::new();
        RconPacket::new(7, SERVERDATA_EXECCOMMAND, "listplayers").encode(&mut buf);
        assert_eq!(&buf[..4], &(11 + 10i32).to_le_bytes());
        assert_eq!(&buf[buf.len() - 2..], &[0u8, 0]);

        // Incomplete input waits for more bytes.
        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert_eq!(RconPacket::decode(&mut partial).unwrap(), None);

        let packet = RconPacket::decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, RconPacket::new(7, SERVERDATA_EXECCOMMAND, "listplayers"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rejects_bad_size() {
        let mut buf = BytesMut::from(&(-5i32).to_le_bytes()[..]);
        assert!(matches!(
            RconPacket::decode(&mut buf),
            Err(RemoteError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_player_list() {
        let output = "ID\t | Name\t\t | NetID\t\t\t | IP\t\t | Score\t\t |\n\
            ===============================================================================\n\
            0\t | Alpha\t | SteamNWI:76561198000000001\t | 10.0.0.2\t | 120\t |\n\
            1\t | Insurgent\t | INVALID\t | \t | 0\t |\n\
            \n";
        let players = parse_player_list(output);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "Alpha");
        assert_eq!(players[0].player_id, Some(PlayerId::from("76561198000000001")));
        assert_eq!(players[0].score, 120);
        assert_eq!(players[1].player_id, None);
    }

    async fn read_packet(stream: &mut TcpStream, buf: &mut BytesMut) -> RconPacket {
        loop {
            if let Some(packet) = RconPacket::decode(buf).unwrap() {
                return packet;
            }
            assert!(stream.read_buf(buf).await.unwrap() > 0);
        }
    }

    async fn write_packet(stream: &mut TcpStream, packet: RconPacket) {
        let mut out = BytesMut::new();
        packet.encode(&mut out);
        stream.write_all(&out).await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_and_exec_against_loopback_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();

            let auth = read_packet(&mut stream, &mut buf).await;
            assert_eq!(auth.kind, SERVERDATA_AUTH);
            assert_eq!(auth.body, "secret");
            write_packet(&mut stream, RconPacket::new(auth.id, SERVERDATA_RESPONSE_VALUE, "")).await;
            write_packet(&mut stream, RconPacket::new(auth.id, SERVERDATA_AUTH_RESPONSE, "")).await;

            let exec = read_packet(&mut stream, &mut buf).await;
            assert_eq!(exec.body, "listplayers");
            write_packet(
                &mut stream,
                RconPacket::new(exec.id, SERVERDATA_RESPONSE_VALUE, "0 | Alpha | SteamNWI:1 | 10.0.0.2 | 5 |"),
            )
            .await;
        });

        let mut client = RconClient::connect(&address, "secret").await.unwrap();
        let output = client.exec("listplayers").await.unwrap();
        assert_eq!(parse_player_list(&output)[0].score, 5);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            read_packet(&mut stream, &mut buf).await;
            write_packet(&mut stream, RconPacket::new(-1, SERVERDATA_AUTH_RESPONSE, "")).await;
        });

        let result = RconClient::connect(&address, "wrong").await;
        assert!(matches!(result, Err(RemoteError::AuthRejected)));
        server.await.unwrap();
    }
}

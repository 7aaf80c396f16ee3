//! A2S_INFO status query over UDP.
//!
//! Unauthenticated; returns the live map and population. Servers may answer
//! the first request with a challenge that has to be echoed back.

use tokio::net::UdpSocket;

use super::ServerStatus;
use crate::error::RemoteError;

const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = b'T';
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const S2C_CHALLENGE: u8 = b'A';
const S2A_INFO: u8 = b'I';
const MAX_DATAGRAM: usize = 1400;

pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut request = Vec::with_capacity(29);
    request.extend_from_slice(&HEADER);
    request.push(A2S_INFO);
    request.extend_from_slice(INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        request.extend_from_slice(&challenge);
    }
    request
}

pub async fn query_info(address: &str) -> Result<ServerStatus, RemoteError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(address).await?;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    socket.send(&info_request(None)).await?;
    let mut len = socket.recv(&mut buf).await?;

    if let Some(challenge) = parse_challenge(&buf[..len]) {
        socket.send(&info_request(Some(challenge))).await?;
        len = socket.recv(&mut buf).await?;
    }
    parse_info(&buf[..len])
}

fn parse_challenge(datagram: &[u8]) -> Option<[u8; 4]> {
    if datagram.len() >= 9 && datagram[..4] == HEADER && datagram[4] == S2C_CHALLENGE {
        Some([datagram[5], datagram[6], datagram[7], datagram[8]])
    } else {
        None
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, RemoteError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| RemoteError::Protocol("truncated info response".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn cstring(&mut self) -> Result<String, RemoteError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let end = memchr::memchr(0, rest)
            .ok_or_else(|| RemoteError::Protocol("unterminated string".to_string()))?;
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

/// Parse a single-packet `S2A_INFO` response.
pub fn parse_info(datagram: &[u8]) -> Result<ServerStatus, RemoteError> {
    if datagram.len() < 6 || datagram[..4] != HEADER {
        return Err(RemoteError::Protocol(
            "unexpected or split info response".to_string(),
        ));
    }
    let mut r = Reader {
        data: datagram,
        pos: 4,
    };
    if r.u8()? != S2A_INFO {
        return Err(RemoteError::Protocol("not an info response".to_string()));
    }
    let _protocol = r.u8()?;
    let name = r.cstring()?;
    let map = r.cstring()?;
    let _folder = r.cstring()?;
    let _game = r.cstring()?;
    r.skip(2);
    let players = r.u8()?;
    let max_players = r.u8()?;
    let bots = r.u8()?;

    Ok(ServerStatus {
        name,
        map,
        player_count: players,
        max_players,
        bot_count: bots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_response(map: &str, players: u8) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        out.push(S2A_INFO);
        out.push(17);
        for s in ["Sandstorm EU", map, "Insurgency", "Insurgency: Sandstorm"] {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&[players, 28, 4]);
        out.extend_from_slice(&[b'd', b'l', 0, 1]);
        out
    }

    #[test]
    fn test_parse_info() {
        let status = parse_info(&info_response("Town", 12)).unwrap();
        assert_eq!(status.name, "Sandstorm EU");
        assert_eq!(status.map, "Town");
        assert_eq!(status.player_count, 12);
        assert_eq!(status.max_players, 28);
        assert_eq!(status.bot_count, 4);
    }

    #[test]
    fn test_parse_info_rejects_truncated() {
        let mut response = info_response("Town", 1);
        response.truncate(12);
        assert!(matches!(parse_info(&response), Err(RemoteError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_query_answers_challenge() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1400];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], info_request(None).as_slice());
            let mut challenge = HEADER.to_vec();
            challenge.extend_from_slice(&[S2C_CHALLENGE, 1, 2, 3, 4]);
            server.send_to(&challenge, peer).await.unwrap();

            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], info_request(Some([1, 2, 3, 4])).as_slice());
            server
                .send_to(&info_response("Farmhouse", 3), peer)
                .await
                .unwrap();
        });

        let status = query_info(&address).await.unwrap();
        assert_eq!(status.map, "Farmhouse");
        assert_eq!(status.player_count, 3);
        responder.await.unwrap();
    }
}

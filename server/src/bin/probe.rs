//! Manual probe for a running lobby: claims a nickname, creates a game,
//! resolves the match endpoint and exchanges one ping with it.

use bincode::{deserialize, serialize};
use shared::{EndpointAddress, Packet, Request, Response, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;

async fn request(
    socket: &tokio::net::UdpSocket,
    seq: u64,
    request: Request,
    addr: SocketAddr,
) -> Result<Response, Box<dyn std::error::Error>> {
    let packet = Packet::Request { seq, request };
    socket.send_to(&serialize(&packet)?, addr).await?;

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        match deserialize::<Packet>(&buf[..len])? {
            Packet::Response {
                seq: reply_seq,
                response,
            } if reply_seq == seq => return Ok(response),
            other => println!("(skipping {:?})", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let lobby_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string())
        .parse()?;
    let nickname = std::env::args().nth(2).unwrap_or_else(|| "Probe".to_string());

    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
    println!("Probe socket bound to {}", socket.local_addr()?);

    let resolved = request(
        &socket,
        1,
        Request::Resolve {
            service: "LobbyServer".to_string(),
        },
        lobby_addr,
    )
    .await?;
    println!("Resolve: {:?}", resolved);

    let claimed = request(
        &socket,
        2,
        Request::ChooseNickname {
            nickname: nickname.clone(),
        },
        lobby_addr,
    )
    .await?;
    println!("ChooseNickname({}): {:?}", nickname, claimed);

    let created = request(
        &socket,
        3,
        Request::CreateGame {
            capacity: 2,
            nickname: nickname.clone(),
        },
        lobby_addr,
    )
    .await?;
    println!("CreateGame: {:?}", created);

    if let Response::Endpoint(EndpointAddress { name, port }) = created {
        let match_addr = SocketAddr::new(lobby_addr.ip(), port);
        let resolved = request(
            &socket,
            4,
            Request::Resolve {
                service: name.clone(),
            },
            match_addr,
        )
        .await?;
        println!("Resolve({}): {:?}", name, resolved);

        socket
            .send_to(&serialize(&Packet::Ping { nonce: 1 })?, match_addr)
            .await?;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = socket.recv_from(&mut buf).await?;
        println!("Ping answered: {:?}", deserialize::<Packet>(&buf[..len])?);
    }

    println!("Probe finished");
    Ok(())
}

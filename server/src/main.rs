//! Development WebSocket endpoint for exercising the tether client by hand

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const WS_PATH: &str = "/ws";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.into());
    let listener = TcpListener::bind(&addr).await?;
    println!("Server listening on {}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        println!("Connection from: {}", peer);

        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, peer).await {
                eprintln!("Session error from {}: {}", peer, e);
            }
        });
    }
}

async fn handle_client(socket: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
    let mut token = None;
    let mut ws = tokio_tungstenite::accept_hdr_async(socket, |req: &Request, resp: Response| {
        if req.uri().path() != WS_PATH {
            let mut reject = ErrorResponse::new(Some(String::from("not found")));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            return Err(reject);
        }
        let bearer = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        token = token_from_request(req.uri().query(), bearer);
        Ok::<_, ErrorResponse>(resp)
    })
    .await?;

    let Some(token) = token else {
        println!("Rejecting {}: missing token", peer);
        ws.close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: String::from("missing token").into(),
        }))
        .await?;
        return Ok(());
    };
    println!("Client {} authenticated ({} byte token)", peer, token.len());

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) if text.as_str() == "ping" => {
                ws.send(Message::Text(String::from("pong").into())).await?;
            }
            Message::Text(text) => {
                ws.send(Message::Text(text)).await?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    println!("Client disconnected: {}", peer);
    Ok(())
}

/// Token from the `token` query parameter, else from a bearer header
fn token_from_request(query: Option<&str>, authorization: Option<&str>) -> Option<String> {
    let from_query = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    });

    from_query
        .or_else(|| {
            let header = authorization?;
            let (scheme, value) = header.split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| value.trim().to_string())
        })
        .filter(|t| !t.is_empty())
}

//! WebSocket connector backed by tokio-tungstenite

use super::error::TransportError;
use super::traits::{Connector, TransportLink, WireFrame};
use crate::state_machine::event::{ABNORMAL_CLOSURE, NO_STATUS};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real websocket connections and pumps frames between the socket and
/// a [`TransportLink`] on a spawned task.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        tracing::debug!(endpoint = %endpoint, "Opening websocket");
        let (socket, response) = connect_async(endpoint.as_str()).await.map_err(classify)?;
        tracing::debug!(status = %response.status(), "Websocket handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outbound_rx, inbound_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn classify(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            let message = format!("handshake rejected with HTTP {status}");
            if status.is_server_error() {
                TransportError::server_error(message)
            } else {
                TransportError::rejected(message)
            }
        }
        WsError::Url(e) => TransportError::invalid_endpoint(e.to_string()),
        WsError::Io(e) => TransportError::network(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
            TransportError::network(error.to_string())
        }
        other => TransportError::unknown(other.to_string()),
    }
}

/// Move frames between the socket and the link channels until either side closes
async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<WireFrame>,
    inbound: mpsc::UnboundedSender<WireFrame>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(WireFrame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(WireFrame::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
                Some(WireFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(WireFrame::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.into_owned()),
                    );
                    let _ = inbound.send(WireFrame::Close { code, reason });
                    break;
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(WireFrame::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = inbound.send(WireFrame::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }

    tracing::debug!("Websocket pump finished");
}

//! Push channels over one `graphql-ws` websocket.
//!
//! SYSTEM CONTEXT
//! ==============
//! The socket is opened once per session. After `connection_init` is
//! acknowledged, one `start` is sent per channel using the channel's root
//! field (`pinAdded`, ...) as the subscription id, so `data` messages route
//! back by id without a lookup table. A reader task fans the socket out into
//! one payload stream per channel; those streams feed `PinSync::subscribe`.
//!
//! ERROR HANDLING
//! ==============
//! A subscription `error` fails that channel only. A socket error, a
//! `connection_error`, or the socket closing fails every channel still open.
//! No reconnect is attempted.

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

use std::collections::HashMap;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pinboard::{ChannelKind, ClientConfig, SyncError};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wire::{ClientMessage, CodecError, GRAPHQL_WS_PROTOCOL, GraphqlRequest, ServerMessage};

use crate::CliError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PayloadSender = UnboundedSender<Result<Value, SyncError>>;

/// Raw subscription payloads for one channel.
pub type PayloadStream = UnboundedReceiver<Result<Value, SyncError>>;

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Where one server message goes.
#[derive(Debug)]
pub(crate) enum Route {
    Deliver(ChannelKind, Result<Value, SyncError>),
    Finish(ChannelKind),
    FailAll(String),
    Ignore,
}

pub(crate) fn kind_for(id: &str) -> Option<ChannelKind> {
    ChannelKind::ALL.into_iter().find(|kind| kind.field() == id)
}

pub(crate) fn init_payload(token: Option<&str>) -> Value {
    match token {
        Some(token) => json!({ "authToken": token }),
        None => json!({}),
    }
}

pub(crate) fn route(message: ServerMessage) -> Route {
    match message {
        ServerMessage::Data { id, payload } => {
            let Some(kind) = kind_for(&id) else {
                tracing::debug!(%id, "data for unknown subscription");
                return Route::Ignore;
            };
            if let Some(error) = payload.error_message() {
                tracing::warn!(channel = %kind, %error, "subscription result carried errors");
                return Route::Ignore;
            }
            match payload.data {
                Some(data) => Route::Deliver(kind, Ok(data)),
                None => Route::Ignore,
            }
        }
        ServerMessage::Error { id, payload } => match kind_for(&id) {
            Some(kind) => Route::Deliver(kind, Err(SyncError::Transport(payload.to_string()))),
            None => Route::Ignore,
        },
        ServerMessage::Complete { id } => kind_for(&id).map_or(Route::Ignore, Route::Finish),
        ServerMessage::ConnectionError { payload } => Route::FailAll(payload.to_string()),
        ServerMessage::ConnectionAck | ServerMessage::Ka => Route::Ignore,
    }
}

fn ws_error(error: tokio_tungstenite::tungstenite::Error) -> CliError {
    CliError::Ws(Box::new(error))
}

/// Write half of the subscription socket plus the reader task.
pub struct PushSocket {
    sink: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
}

impl PushSocket {
    /// Connect, authenticate, and start all three subscriptions.
    pub async fn open(config: &ClientConfig) -> Result<(Self, Vec<(ChannelKind, PayloadStream)>), CliError> {
        let mut request = config.ws_url.as_str().into_client_request().map_err(ws_error)?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(GRAPHQL_WS_PROTOCOL));
        let (socket, _) = connect_async(request).await.map_err(ws_error)?;
        let (mut sink, mut stream) = socket.split();

        send(&mut sink, &ClientMessage::ConnectionInit { payload: init_payload(config.token.as_deref()) }).await?;
        tokio::time::timeout(ACK_TIMEOUT, await_ack(&mut stream)).await.map_err(|_| CliError::Timeout)??;
        tracing::info!(url = %config.ws_url, "subscription socket ready");

        let mut senders = HashMap::new();
        let mut streams = Vec::new();
        for kind in ChannelKind::ALL {
            let start = ClientMessage::Start { id: kind.field().to_owned(), payload: GraphqlRequest::new(kind.document()) };
            send(&mut sink, &start).await?;
            let (tx, rx) = mpsc::unbounded();
            senders.insert(kind, tx);
            streams.push((kind, rx));
        }

        let reader = tokio::spawn(read_loop(stream, senders));
        Ok((Self { sink, reader }, streams))
    }

    /// Stop every subscription and close the socket.
    pub async fn close(mut self) {
        let mut goodbye: Vec<ClientMessage> =
            ChannelKind::ALL.iter().map(|kind| ClientMessage::Stop { id: kind.field().to_owned() }).collect();
        goodbye.push(ClientMessage::ConnectionTerminate);
        for message in &goodbye {
            if let Err(error) = send(&mut self.sink, message).await {
                tracing::debug!(%error, "socket already closed");
                break;
            }
        }
        if let Err(error) = self.sink.close().await {
            tracing::debug!(%error, "close handshake failed");
        }
        self.reader.abort();
        tracing::info!("subscription socket closed");
    }
}

async fn send(sink: &mut SplitSink<Socket, Message>, message: &ClientMessage) -> Result<(), CliError> {
    let text = wire::encode_client(message)?;
    sink.send(Message::Text(text.into())).await.map_err(ws_error)
}

/// Advance the connection handshake by one message. `Ok(true)` once acknowledged.
pub(crate) fn handshake(message: ServerMessage) -> Result<bool, CliError> {
    match message {
        ServerMessage::ConnectionAck => Ok(true),
        ServerMessage::Ka => Ok(false),
        ServerMessage::ConnectionError { payload } => Err(CliError::ConnectionRejected(payload.to_string())),
        other @ (ServerMessage::Data { .. } | ServerMessage::Error { .. } | ServerMessage::Complete { .. }) => {
            Err(CodecError::UnexpectedMessage(format!("{other:?} before connection_ack")).into())
        }
    }
}

async fn await_ack(stream: &mut SplitStream<Socket>) -> Result<(), CliError> {
    while let Some(frame) = stream.next().await {
        let Message::Text(text) = frame.map_err(ws_error)? else {
            continue;
        };
        if handshake(wire::decode_server(&text)?)? {
            return Ok(());
        }
    }
    Err(CliError::WsClosed)
}

async fn read_loop(mut stream: SplitStream<Socket>, mut senders: HashMap<ChannelKind, PayloadSender>) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => {
                fail_all(&mut senders, &error.to_string());
                return;
            }
        };
        let message = match wire::decode_server(&text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "skipping undecodable socket message");
                continue;
            }
        };
        match route(message) {
            Route::Deliver(kind, item) => {
                let delivered = senders.get(&kind).is_some_and(|tx| tx.unbounded_send(item).is_ok());
                if !delivered {
                    senders.remove(&kind);
                }
            }
            Route::Finish(kind) => {
                senders.remove(&kind);
                tracing::info!(channel = %kind, "subscription completed by server");
            }
            Route::FailAll(reason) => {
                fail_all(&mut senders, &reason);
                return;
            }
            Route::Ignore => {}
        }
        if senders.is_empty() {
            return;
        }
    }
    fail_all(&mut senders, "websocket closed");
}

fn fail_all(senders: &mut HashMap<ChannelKind, PayloadSender>, reason: &str) {
    for (kind, tx) in senders.drain() {
        if tx.unbounded_send(Err(SyncError::Transport(reason.to_owned()))).is_err() {
            tracing::debug!(channel = %kind, "channel already stopped");
        }
    }
}

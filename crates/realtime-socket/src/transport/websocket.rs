use super::{Connector, Link, TransportError};
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::{
	connect_async,
	tungstenite::{protocol::Message as TungsteniteMessage, Error as WsError},
};
use tracing::{debug, trace};

impl From<WsError> for TransportError {
	fn from(err: WsError) -> Self {
		match err {
			WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => Self::Unauthorized(response.status().as_u16()),
			WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
			WsError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => Self::Refused(e.to_string()),
			other => Self::WebSocket(other.to_string()),
		}
	}
}

/// Websocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
	pub const fn new() -> Self {
		Self
	}
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
	async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
		debug!(%endpoint, "opening websocket");
		let (ws_stream, response) = connect_async(endpoint).await?;
		trace!(status = %response.status(), "websocket upgraded");

		let (sink, stream) = ws_stream.split();

		let sink = sink
			.sink_map_err(TransportError::from)
			.with(|text: String| future::ready(Ok::<_, TransportError>(TungsteniteMessage::Text(text.into()))));

		let stream = stream.filter_map(|msg| {
			future::ready(match msg {
				Ok(TungsteniteMessage::Text(text)) => Some(Ok(text.to_string())),
				Ok(TungsteniteMessage::Close(frame)) => {
					debug!(?frame, "websocket close frame received");
					Some(Err(TransportError::Closed))
				}
				// pings are answered by tungstenite; binary frames carry attachments we don't support
				Ok(_) => None,
				Err(e) => Some(Err(TransportError::from(e))),
			})
		});

		Ok(Link::new(Box::pin(sink), Box::pin(stream)))
	}
}

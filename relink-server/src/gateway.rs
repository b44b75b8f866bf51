use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::{debug, info, warn};
use relink_core::{ChatId, EvictionReason, Session, SessionEvent, SessionReceiver, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::{
    auth::Identity,
    context::ServerContext,
    serialized::{Eviction, Message, ToSerialized},
    Router,
};

type Outgoing = Arc<Mutex<SplitSink<WebSocket, WsMessage>>>;

/// A frame sent by the client
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a room. Replied to with `joined` and `history`.
    JoinRoom { chat_id: String },
    /// Unsubscribe from a room. Replied to with `left`.
    LeaveRoom { chat_id: String },
    /// Post a message to a subscribed room
    Message { chat_id: String, text: String },
}

/// A frame sent by the server
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined {
        chat_id: String,
    },
    /// Everything said in the room before the subscription, oldest first
    History {
        chat_id: String,
        messages: Vec<Message>,
    },
    Left {
        chat_id: String,
    },
    /// A message accepted into a subscribed room, including the client's own
    Message {
        chat_id: String,
        message: Message,
    },
    /// The subscription was ended by the server
    Evicted {
        chat_id: String,
        reason: Eviction,
    },
    /// A frame was rejected. The connection stays open.
    Error {
        error: String,
    },
}

impl From<SessionEvent> for ServerFrame {
    fn from(value: SessionEvent) -> Self {
        match value {
            SessionEvent::Message(message) => Self::Message {
                chat_id: message.chat_id.to_string(),
                message: message.to_serialized(),
            },
            SessionEvent::Evicted { chat_id, reason } => Self::Evicted {
                chat_id: chat_id.to_string(),
                reason: reason.to_serialized(),
            },
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/gateway",
    tag = "gateway",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 101, description = "Upgraded to a WebSocket speaking ClientFrame and ServerFrame as JSON text")
    )
)]
async fn gateway(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(context, user_id, socket))
}

async fn handle_socket(context: ServerContext, user_id: UserId, socket: WebSocket) {
    let coordinator = context.coordinator.clone();
    let (session, events) = coordinator.connect(user_id);
    let (outgoing, mut incoming) = socket.split();
    let outgoing: Outgoing = Arc::new(Mutex::new(outgoing));

    info!("Session {} of {} connected", session.id, session.user_id);

    let mut writer = tokio::spawn(forward_events(events, outgoing.clone()));

    loop {
        tokio::select! {
            _ = session.closed() => break,
            _ = &mut writer => break,
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(&context, &session, &outgoing, &text).await
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    coordinator.disconnect(&session);
    writer.abort();

    let mut outgoing = outgoing.lock().await;

    if let Some(chat_id) = session.lagged_in() {
        let notice = ServerFrame::from(SessionEvent::Evicted {
            chat_id,
            reason: EvictionReason::Lagged,
        });

        send_frame(&mut outgoing, &notice).await;
    }

    let _ = outgoing.close().await;
    info!("Session {} of {} disconnected", session.id, session.user_id);
}

/// Drains the session's queue into the socket until either side goes away
async fn forward_events(mut events: SessionReceiver, outgoing: Outgoing) {
    while let Some(event) = events.recv().await {
        let mut outgoing = outgoing.lock().await;

        // A join may have sent this message as history while we waited for the socket
        if events.is_stale(&event) {
            continue;
        }

        if !send_frame(&mut outgoing, &event.into()).await {
            break;
        }
    }
}

async fn handle_frame(context: &ServerContext, session: &Arc<Session>, outgoing: &Outgoing, text: &str) {
    let coordinator = &context.coordinator;

    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Session {} sent a malformed frame: {}", session.id, e);
            let error = ServerFrame::Error {
                error: "Malformed frame".to_string(),
            };

            send_frame(&mut *outgoing.lock().await, &error).await;
            return;
        }
    };

    match frame {
        ClientFrame::JoinRoom { chat_id } => {
            // Holding the socket keeps queued live messages behind the history
            let mut outgoing = outgoing.lock().await;

            let reply = match coordinator
                .rooms
                .subscribe(session, &ChatId::from(chat_id.as_str()))
                .await
            {
                Ok(history) => {
                    let joined = ServerFrame::Joined {
                        chat_id: chat_id.clone(),
                    };

                    if !send_frame(&mut outgoing, &joined).await {
                        return;
                    }

                    ServerFrame::History {
                        chat_id,
                        messages: history.to_serialized(),
                    }
                }
                Err(e) => ServerFrame::Error {
                    error: e.to_string(),
                },
            };

            send_frame(&mut outgoing, &reply).await;
        }
        ClientFrame::LeaveRoom { chat_id } => {
            coordinator
                .rooms
                .unsubscribe(session, &ChatId::from(chat_id.as_str()));

            send_frame(&mut *outgoing.lock().await, &ServerFrame::Left { chat_id }).await;
        }
        ClientFrame::Message { chat_id, text } => {
            let result = coordinator
                .broker
                .send(session, &ChatId::from(chat_id), &text)
                .await;

            // The sender renders its own message from the broadcast
            if let Err(e) = result {
                let error = ServerFrame::Error {
                    error: e.to_string(),
                };

                send_frame(&mut *outgoing.lock().await, &error).await;
            }
        }
    }
}

/// Returns false if the socket is gone
async fn send_frame(outgoing: &mut SplitSink<WebSocket, WsMessage>, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not serialize frame: {}", e);
            return true;
        }
    };

    outgoing.send(WsMessage::Text(text)).await.is_ok()
}

pub fn router() -> Router {
    Router::new().route("/gateway", get(gateway))
}

#[cfg(test)]
mod test {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use futures_util::{SinkExt, StreamExt};
    use relink_core::{
        ChatId, Config, Coordinator, EvictionReason, Location, MemoryStorage, Message, NewOffer,
        Offer, OfferDetails, SessionEvent,
    };
    use serde_json::{json, Value};
    use tokio::{
        net::{TcpListener, TcpStream},
        time::{sleep, timeout},
    };
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
        MaybeTlsStream, WebSocketStream,
    };

    use crate::{router, test_support::test_context, RateLimiter, ServerContext, TrustedHeader};

    use super::{ClientFrame, ServerFrame};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(context: ServerContext) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                router(context).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        addr
    }

    async fn connect(addr: SocketAddr, user: &str) -> Client {
        let mut request = format!("ws://{}/v1/gateway", addr)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("x-relink-user", HeaderValue::from_str(user).unwrap());

        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    async fn send(client: &mut Client, frame: Value) {
        client.send(WsMessage::Text(frame.to_string())).await.unwrap();
    }

    /// The next frame from the server, or `None` once it closed the socket
    async fn next(client: &mut Client) -> Option<Value> {
        loop {
            let message = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("the server went quiet")?;

            match message {
                Ok(WsMessage::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn create_offer(coordinator: &Coordinator, creator: &str) -> Offer {
        coordinator
            .offers
            .create_offer(NewOffer {
                creator_id: creator.into(),
                capacity: 3,
                details: OfferDetails {
                    title: "Firewood".to_string(),
                    description: "Half a cord".to_string(),
                    location: Location { lat: 0.0, lng: 0.0 },
                    image: None,
                },
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn joining_replays_history_before_live_messages() {
        let context = test_context();
        let coordinator = context.coordinator.clone();
        let addr = serve(context).await;

        let offer = create_offer(&coordinator, "carol").await;
        let elsewhere = create_offer(&coordinator, "carol").await;

        let (earlier, _events) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&earlier, &offer.chat_id).await.unwrap();
        coordinator
            .broker
            .send(&earlier, &offer.chat_id, "said before")
            .await
            .unwrap();
        coordinator.disconnect(&earlier);

        let mut client = connect(addr, "carol").await;
        let chat_id = offer.chat_id.to_string();

        send(&mut client, json!({ "type": "join_room", "chat_id": chat_id })).await;

        let joined = next(&mut client).await.unwrap();
        assert_eq!(joined, json!({ "type": "joined", "chat_id": chat_id }));

        let history = next(&mut client).await.unwrap();
        assert_eq!(history["type"], "history");
        assert_eq!(history["messages"][0]["id"], 1);
        assert_eq!(history["messages"][0]["text"], "said before");

        send(
            &mut client,
            json!({ "type": "message", "chat_id": chat_id, "text": "said live" }),
        )
        .await;

        let live = next(&mut client).await.unwrap();
        assert_eq!(live["type"], "message");
        assert_eq!(live["message"]["id"], 2);
        assert_eq!(live["message"]["text"], "said live");

        // Posting to a room the connection never joined is refused, the connection stays
        send(
            &mut client,
            json!({ "type": "message", "chat_id": elsewhere.chat_id.to_string(), "text": "hi" }),
        )
        .await;

        let refused = next(&mut client).await.unwrap();
        assert_eq!(refused["type"], "error");

        send(&mut client, json!({ "type": "leave_room", "chat_id": chat_id })).await;
        let left = next(&mut client).await.unwrap();
        assert_eq!(left, json!({ "type": "left", "chat_id": chat_id }));
    }

    #[tokio::test]
    async fn closing_the_socket_unsubscribes() {
        let context = test_context();
        let coordinator = context.coordinator.clone();
        let addr = serve(context).await;

        let offer = create_offer(&coordinator, "carol").await;
        let room = coordinator.rooms.room(&offer.chat_id).unwrap();

        let mut client = connect(addr, "carol").await;
        send(
            &mut client,
            json!({ "type": "join_room", "chat_id": offer.chat_id.to_string() }),
        )
        .await;

        assert_eq!(next(&mut client).await.unwrap()["type"], "joined");
        assert_eq!(next(&mut client).await.unwrap()["type"], "history");
        assert_eq!(room.subscriber_count(), 1);

        client.close(None).await.unwrap();

        for _ in 0..100 {
            if room.subscriber_count() == 0 {
                break;
            }

            sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(room.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_connections_are_told_before_being_closed() {
        let config = Config {
            outbound_queue_size: 1,
            ..Default::default()
        };
        let context = ServerContext::new(
            Coordinator::new(config, MemoryStorage::new()),
            Arc::new(TrustedHeader::default()),
            RateLimiter::new(10_000, Duration::from_secs(60)),
        );
        let coordinator = context.coordinator.clone();
        let addr = serve(context).await;

        let offer = create_offer(&coordinator, "carol").await;
        let chat_id = offer.chat_id.to_string();

        let mut client = connect(addr, "carol").await;
        send(&mut client, json!({ "type": "join_room", "chat_id": chat_id })).await;

        assert_eq!(next(&mut client).await.unwrap()["type"], "joined");
        assert_eq!(next(&mut client).await.unwrap()["type"], "history");

        // Nothing yields in between, so the connection can't drain its queue of one
        let (sender, _events) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&sender, &offer.chat_id).await.unwrap();

        for text in ["one", "two", "three"] {
            let _ = coordinator.broker.send(&sender, &offer.chat_id, text).await;
        }

        let mut frames = vec![];
        while let Some(frame) = next(&mut client).await {
            frames.push(frame);
        }

        assert_eq!(
            frames.last(),
            Some(&json!({ "type": "evicted", "chat_id": chat_id, "reason": "lagged" }))
        );
        assert!(frames.iter().all(|f| f["type"] != "message" || f["message"]["id"] == 1));
    }

    #[test]
    fn client_frames_are_tagged_by_type() {
        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "join_room", "chat_id": "c_12345678" }))
                .unwrap();
        assert!(matches!(frame, ClientFrame::JoinRoom { chat_id } if chat_id == "c_12345678"));

        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "message",
            "chat_id": "c_12345678",
            "text": "hello"
        }))
        .unwrap();
        assert!(matches!(frame, ClientFrame::Message { text, .. } if text == "hello"));

        let unknown = serde_json::from_value::<ClientFrame>(json!({ "type": "shout" }));
        assert!(unknown.is_err());
    }

    #[test]
    fn session_events_become_server_frames() {
        let message = Message {
            id: 3,
            chat_id: ChatId::from("c_12345678"),
            user_id: "carol".into(),
            text: "I can drive".to_string(),
            ts: 1_700_000_000,
        };

        let frame = ServerFrame::from(SessionEvent::Message(Arc::new(message)));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "message",
                "chat_id": "c_12345678",
                "message": {
                    "id": 3,
                    "chat_id": "c_12345678",
                    "user_id": "carol",
                    "text": "I can drive",
                    "ts": 1_700_000_000
                }
            })
        );

        let frame = ServerFrame::from(SessionEvent::Evicted {
            chat_id: ChatId::from("c_12345678"),
            reason: EvictionReason::MembershipRevoked,
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "evicted",
                "chat_id": "c_12345678",
                "reason": "membership_revoked"
            })
        );
    }
}

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json,
};
use relink_core::ChatId;

use crate::{
    auth::Identity,
    context::ServerContext,
    errors::ServerResult,
    schemas::HistoryQuery,
    serialized::{ErrorBody, MessageList, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/chats/{chat_id}/messages",
    tag = "chats",
    params(
        ("chat_id" = String, Path, description = "Chat id of an offer"),
        HistoryQuery
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = MessageList),
        (status = 403, body = ErrorBody, description = "The caller is not a member of the offer"),
        (status = 404, body = ErrorBody)
    )
)]
async fn messages(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ServerResult<Json<MessageList>> {
    let messages = context
        .coordinator
        .broker
        .history(&ChatId::from(chat_id), &user_id, query.after)
        .await?;

    Ok(Json(MessageList::new(messages.to_serialized())))
}

pub fn router() -> Router {
    Router::new().route("/:chat_id/messages", get(messages))
}

#[cfg(test)]
mod test {
    use axum::http::StatusCode;
    use relink_core::{Location, NewOffer, OfferDetails};

    use crate::test_support::{request, send, test_context, test_router_with};

    #[tokio::test]
    async fn members_read_history_after_a_known_message() {
        let context = test_context();
        let coordinator = context.coordinator.clone();
        let router = test_router_with(context);

        let offer = coordinator
            .offers
            .create_offer(NewOffer {
                creator_id: "carol".into(),
                capacity: 2,
                details: OfferDetails {
                    title: "Water".to_string(),
                    description: "Two crates".to_string(),
                    location: Location { lat: 0.0, lng: 0.0 },
                    image: None,
                },
            })
            .await
            .unwrap();

        let (session, _events) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&session, &offer.chat_id).await.unwrap();

        for text in ["first", "second"] {
            coordinator
                .broker
                .send(&session, &offer.chat_id, text)
                .await
                .unwrap();
        }

        let uri = format!("/v1/chats/{}/messages?after=1", offer.chat_id);
        let (status, body) = send(&router, request("GET", &uri, "carol", None)).await;

        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "second");
        assert_eq!(messages[0]["id"], 2);

        let (status, _) = send(&router, request("GET", &uri, "eve", None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            request("GET", "/v1/chats/c_unknown1/messages", "carol", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

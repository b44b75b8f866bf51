use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};
use relink_core::{NewOffer, OfferId};

use crate::{
    auth::Identity,
    context::ServerContext,
    errors::ServerResult,
    schemas::{NewOfferSchema, OfferQuery, ValidatedJson},
    serialized::{ErrorBody, Offer, OfferList, Success, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/posts",
    tag = "posts",
    params(OfferQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = OfferList),
        (status = 400, body = ErrorBody, description = "The location filter is malformed")
    )
)]
async fn list_offers(
    _identity: Identity,
    State(context): State<ServerContext>,
    Query(query): Query<OfferQuery>,
) -> ServerResult<Json<OfferList>> {
    let filter = query.filter()?;
    let offers = context.coordinator.offers.offers(&filter).await?;

    Ok(Json(OfferList::new(offers.to_serialized())))
}

#[utoipa::path(
    post,
    path = "/v1/posts",
    tag = "posts",
    request_body = NewOfferSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Offer),
        (status = 400, body = ErrorBody)
    )
)]
async fn create_offer(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewOfferSchema>,
) -> ServerResult<(StatusCode, Json<Offer>)> {
    let offer = context
        .coordinator
        .offers
        .create_offer(NewOffer {
            creator_id: user_id,
            capacity: body.capacity,
            details: body.into_details(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(offer.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/v1/posts/mine",
    tag = "posts",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = OfferList, description = "The offers the caller is a member of")
    )
)]
async fn my_offers(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
) -> ServerResult<Json<OfferList>> {
    let offers = context.coordinator.offers.offers_for_member(&user_id).await?;

    Ok(Json(OfferList::new(offers.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/v1/posts/{id}",
    tag = "posts",
    params(("id" = String, Path, description = "Offer id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Offer),
        (status = 404, body = ErrorBody)
    )
)]
async fn offer(
    _identity: Identity,
    State(context): State<ServerContext>,
    Path(offer_id): Path<String>,
) -> ServerResult<Json<Offer>> {
    let offer = context.coordinator.offers.offer(&OfferId::from(offer_id)).await?;

    Ok(Json(offer.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/posts/{id}/join",
    tag = "posts",
    params(("id" = String, Path, description = "Offer id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Offer),
        (status = 404, body = ErrorBody),
        (status = 409, body = ErrorBody, description = "The offer is full, or the caller already joined")
    )
)]
async fn join_offer(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    Path(offer_id): Path<String>,
) -> ServerResult<Json<Offer>> {
    let offer = context
        .coordinator
        .offers
        .join(&OfferId::from(offer_id), &user_id)
        .await?;

    Ok(Json(offer.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/posts/{id}/leave",
    tag = "posts",
    params(("id" = String, Path, description = "Offer id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Offer),
        (status = 403, body = ErrorBody, description = "Creators can't leave their own offer"),
        (status = 404, body = ErrorBody),
        (status = 409, body = ErrorBody, description = "The caller is not a member")
    )
)]
async fn leave_offer(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    Path(offer_id): Path<String>,
) -> ServerResult<Json<Offer>> {
    let offer = context
        .coordinator
        .offers
        .leave(&OfferId::from(offer_id), &user_id)
        .await?;

    Ok(Json(offer.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/posts/{id}",
    tag = "posts",
    params(("id" = String, Path, description = "Offer id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success),
        (status = 403, body = ErrorBody, description = "Only the creator may delete an offer"),
        (status = 404, body = ErrorBody)
    )
)]
async fn delete_offer(
    Identity(user_id): Identity,
    State(context): State<ServerContext>,
    Path(offer_id): Path<String>,
) -> ServerResult<Json<Success>> {
    context
        .coordinator
        .offers
        .delete(&OfferId::from(offer_id), &user_id)
        .await?;

    Ok(Json(Success::yes()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_offers).post(create_offer))
        .route("/mine", get(my_offers))
        .route("/:id", get(offer).delete(delete_offer))
        .route("/:id/join", post(join_offer))
        .route("/:id/leave", post(leave_offer))
}

#[cfg(test)]
mod test {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};

    use crate::test_support::{request, send, test_router};

    fn new_offer(capacity: u32) -> Value {
        json!({
            "title": "Spare tent",
            "description": "Fits two people, dry and warm",
            "capacity": capacity,
            "location": { "lat": 52.52, "lng": 13.405 }
        })
    }

    #[tokio::test]
    async fn offers_fill_up_and_free_slots_again() {
        let router = test_router();

        let (status, offer) = send(
            &router,
            request("POST", "/v1/posts", "carol", Some(new_offer(2))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(offer["members"], json!(["carol"]));

        let id = offer["id"].as_str().unwrap().to_string();

        let (status, offer) = send(
            &router,
            request("POST", &format!("/v1/posts/{id}/join"), "alex", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(offer["members"], json!(["carol", "alex"]));

        let (status, body) = send(
            &router,
            request("POST", &format!("/v1/posts/{id}/join"), "bea", None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Offer is full");

        let (status, _) = send(
            &router,
            request("POST", &format!("/v1/posts/{id}/leave"), "alex", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, offer) = send(
            &router,
            request("POST", &format!("/v1/posts/{id}/join"), "bea", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(offer["members"], json!(["carol", "bea"]));
    }

    #[tokio::test]
    async fn creators_delete_and_others_may_not() {
        let router = test_router();

        let (_, offer) = send(
            &router,
            request("POST", "/v1/posts", "carol", Some(new_offer(3))),
        )
        .await;
        let id = offer["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &router,
            request("POST", &format!("/v1/posts/{id}/leave"), "carol", None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            request("DELETE", &format!("/v1/posts/{id}"), "alex", None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &router,
            request("DELETE", &format!("/v1/posts/{id}"), "carol", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, _) = send(
            &router,
            request("GET", &format!("/v1/posts/{id}"), "carol", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listings_filter_by_location_and_membership() {
        let router = test_router();

        send(
            &router,
            request("POST", "/v1/posts", "carol", Some(new_offer(3))),
        )
        .await;

        let (status, body) = send(
            &router,
            request("GET", "/v1/posts?near=52.5,13.4&km=10", "alex", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["posts"].as_array().unwrap().len(), 1);

        let (_, body) = send(
            &router,
            request("GET", "/v1/posts?near=48.13,11.57", "alex", None),
        )
        .await;
        assert_eq!(body["posts"].as_array().unwrap().len(), 0);

        let (status, _) = send(
            &router,
            request("GET", "/v1/posts?near=nowhere", "alex", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, mine) = send(&router, request("GET", "/v1/posts/mine", "carol", None)).await;
        assert_eq!(mine["posts"].as_array().unwrap().len(), 1);

        let (_, theirs) = send(&router, request("GET", "/v1/posts/mine", "alex", None)).await;
        assert_eq!(theirs["posts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn invalid_offers_and_anonymous_callers_are_rejected() {
        let router = test_router();

        let mut invalid = new_offer(2);
        invalid["location"]["lat"] = json!(120.0);

        let (status, body) = send(
            &router,
            request("POST", "/v1/posts", "carol", Some(invalid)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let anonymous = Request::builder()
            .method("GET")
            .uri("/v1/posts")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(&router, anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

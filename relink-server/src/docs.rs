use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    chats, gateway, offers,
    schemas::{LocationSchema, NewOfferSchema},
    serialized::{
        ErrorBody, Eviction, Health, Location, Message, MessageList, Offer, OfferList, Success,
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        offers::list_offers,
        offers::create_offer,
        offers::my_offers,
        offers::offer,
        offers::join_offer,
        offers::leave_offer,
        offers::delete_offer,
        chats::messages,
        gateway::gateway,
    ),
    components(schemas(
        Offer,
        Location,
        Message,
        OfferList,
        MessageList,
        Success,
        Health,
        ErrorBody,
        Eviction,
        NewOfferSchema,
        LocationSchema,
        gateway::ClientFrame,
        gateway::ServerFrame,
    )),
    modifiers(&Security),
    info(
        title = "reLink API",
        description = "relink-server lets neighbours offer help, join offers, and chat with the group"
    )
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod test {
    use utoipa::OpenApi;

    use super::ApiDoc;

    #[test]
    fn every_route_is_documented() {
        let api = ApiDoc::openapi();
        let paths: Vec<_> = api.paths.paths.keys().cloned().collect();

        for path in [
            "/v1/posts",
            "/v1/posts/mine",
            "/v1/posts/{id}",
            "/v1/posts/{id}/join",
            "/v1/posts/{id}/leave",
            "/v1/chats/{chat_id}/messages",
            "/v1/gateway",
        ] {
            assert!(paths.iter().any(|p| p == path), "{path} is missing");
        }
    }
}

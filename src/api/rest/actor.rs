use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, ActorRole};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ID_HEADER: &str = "x-actor-id";

/// Identity forwarded by the auth gateway in front of this service.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = match header(parts, ROLE_HEADER)? {
            Some("admin") => ActorRole::Admin,
            Some("courier") => ActorRole::Courier,
            Some("customer") => ActorRole::Customer,
            Some(other) => {
                return Err(AppError::BadRequest(format!("unknown actor role {other}")));
            }
            None => return Err(AppError::BadRequest(format!("missing {ROLE_HEADER} header"))),
        };

        let id = header(parts, ID_HEADER)?
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|_| AppError::BadRequest(format!("{ID_HEADER} must be a uuid")))
            })
            .transpose()?;

        if role != ActorRole::Customer && id.is_none() {
            return Err(AppError::BadRequest(format!("{role} calls need {ID_HEADER}")));
        }

        Ok(Actor { role, id })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| AppError::BadRequest(format!("{name} is not valid ascii")))
        })
        .transpose()
}

/// The courier id of `actor`, rejecting every other role.
pub fn courier_id(actor: &Actor, action: &str) -> Result<Uuid, AppError> {
    match (actor.role, actor.id) {
        (ActorRole::Courier, Some(id)) => Ok(id),
        (role, _) => Err(AppError::unauthorized(role, action)),
    }
}

pub fn require_admin(actor: &Actor, action: &str) -> Result<(), AppError> {
    match actor.role {
        ActorRole::Admin => Ok(()),
        role => Err(AppError::unauthorized(role, action)),
    }
}

//! `place/*` commands.

use super::{model_error, parse_args};
use crate::dispatch::{CommandService, CommandTable, Requester};
use crate::model::Model;
use common::{AuthLevel, ErrorCode, Request, Response, MAX_RESULT_LIMIT};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct GetMembersArgs {
    #[serde(default)]
    place_id: String,
    #[serde(default)]
    skip: usize,
    #[serde(default)]
    limit: usize,
}

pub struct PlaceService {
    model: Arc<dyn Model>,
    table: CommandTable<Self>,
}

impl PlaceService {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            table: CommandTable::<Self>::new().with(
                "place/get_members",
                AuthLevel::AppLevel1,
                |s, who, req, res| Box::pin(s.get_members(who, req, res)),
            ),
        }
    }

    /// One page of member ids. `limit` is capped at the platform maximum.
    async fn get_members(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(args) = parse_args::<GetMembersArgs>(request, response) else {
            return;
        };
        if args.place_id.is_empty() {
            response.error(ErrorCode::Incomplete, &["place_id"]);
            return;
        }
        let place = match self.model.get_place(&args.place_id).await {
            Ok(Some(place)) => place,
            Ok(None) => {
                response.error(ErrorCode::Invalid, &["place_id"]);
                return;
            }
            Err(e) => return model_error(response, &request.command, e),
        };

        let allowed = requester.level >= AuthLevel::AdminUser
            || requester.account_id().is_some_and(|id| place.is_member(id));
        if !allowed {
            response.error(ErrorCode::Access, &["place_id"]);
            return;
        }

        let limit = match args.limit {
            0 => MAX_RESULT_LIMIT,
            n => n.min(MAX_RESULT_LIMIT),
        };
        let members = place.members();
        let total = members.len();
        let page: Vec<String> = members.into_iter().skip(args.skip).take(limit).collect();

        response.ok(json!({
            "place_id": place.id,
            "members": page,
            "total": total,
        }));
    }
}

impl CommandService for PlaceService {
    const PREFIX: &'static str = "place";

    fn commands(&self) -> &CommandTable<Self> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Worker;
    use crate::flags::FlagStore;
    use crate::model::Place;
    use crate::reports::Reporter;
    use crate::testing::{seeded_model, APP_ID, APP_TOKEN};
    use serde_json::Value;

    fn worker() -> Worker {
        let model = seeded_model();
        let members: Vec<String> = (0..150).map(|i| format!("m{i:03}")).collect();
        model.insert_place(Place {
            id: "big".into(),
            name: "Big".into(),
            creators: vec!["alice".into()],
            key_holders: members,
        });
        Worker::builder(model.clone(), Arc::new(FlagStore::new()), Arc::new(Reporter::new()))
            .register(Arc::new(PlaceService::new(model)))
            .unwrap()
            .build()
    }

    fn request(data: Value) -> Request {
        let mut req = Request::new("place/get_members", data);
        req.app_id = APP_ID.into();
        req.app_token = APP_TOKEN.into();
        req
    }

    #[tokio::test]
    async fn test_members_for_app_caller() {
        let res = worker().execute(&request(json!({"place_id": "p1"}))).await;
        assert!(res.is_ok());
        assert_eq!(res.data["members"], json!(["alice", "bob"]));
        assert_eq!(res.data["total"], json!(2));
    }

    #[tokio::test]
    async fn test_pages_capped() {
        let worker = worker();
        let res = worker
            .execute(&request(json!({"place_id": "big", "limit": 500})))
            .await;
        assert_eq!(res.data["members"].as_array().unwrap().len(), MAX_RESULT_LIMIT);
        assert_eq!(res.data["total"], json!(151));

        let res = worker
            .execute(&request(json!({"place_id": "big", "skip": 100})))
            .await;
        assert_eq!(res.data["members"].as_array().unwrap().len(), 51);
    }

    #[tokio::test]
    async fn test_non_member_denied() {
        let res = worker().execute(&request(json!({"place_id": "p2"}))).await;
        assert_eq!(res.error_code(), Some(ErrorCode::Access));
    }

    #[tokio::test]
    async fn test_anonymous_not_authorized() {
        let req = Request::new("place/get_members", json!({"place_id": "p1"}));
        assert!(worker().execute(&req).await.is_not_authorized());
    }
}

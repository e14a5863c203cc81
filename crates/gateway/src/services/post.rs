//! `post/*` commands.

use super::{model_error, parse_args};
use crate::dispatch::{CommandService, CommandTable, Requester};
use crate::mailer::{Mailer, PostMail};
use crate::model::{Model, NewPost, Place};
use crate::push::PushManager;
use crate::reports::{self, Reporter};
use common::{AuthLevel, ErrorCode, Request, Response, MAX_RESULT_LIMIT};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct AddPostArgs {
    /// Comma separated place ids and email addresses.
    #[serde(default)]
    targets: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

/// Split `targets` into place ids and email addresses, dropping blanks and
/// repeats.
fn split_targets(targets: &str) -> (Vec<String>, Vec<String>) {
    let mut place_ids: Vec<String> = Vec::new();
    let mut emails: Vec<String> = Vec::new();
    for target in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let list = if target.contains('@') { &mut emails } else { &mut place_ids };
        if !list.iter().any(|t| t == target) {
            list.push(target.to_string());
        }
    }
    (place_ids, emails)
}

pub struct PostService {
    model: Arc<dyn Model>,
    push: Arc<PushManager>,
    mailer: Arc<dyn Mailer>,
    reporter: Arc<Reporter>,
    table: CommandTable<Self>,
}

impl PostService {
    pub fn new(
        model: Arc<dyn Model>,
        push: Arc<PushManager>,
        mailer: Arc<dyn Mailer>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            model,
            push,
            mailer,
            reporter,
            table: CommandTable::<Self>::new().with("post/add", AuthLevel::User, |s, who, req, res| {
                Box::pin(s.add(who, req, res))
            }),
        }
    }

    async fn add(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(sender_id) = requester.account_id() else {
            response.not_authorized();
            return;
        };
        let Some(args) = parse_args::<AddPostArgs>(request, response) else {
            return;
        };

        let (place_ids, emails) = split_targets(&args.targets);
        if place_ids.is_empty() && emails.is_empty() {
            response.error(ErrorCode::Incomplete, &["targets"]);
            return;
        }
        if place_ids.len() + emails.len() > MAX_RESULT_LIMIT {
            response.error(ErrorCode::Limit, &["targets"]);
            return;
        }
        if args.subject.trim().is_empty() && args.body.trim().is_empty() {
            response.error(ErrorCode::Incomplete, &["subject", "body"]);
            return;
        }

        // Validate every place before writing anything.
        let mut places: Vec<Place> = Vec::with_capacity(place_ids.len());
        for place_id in &place_ids {
            match self.model.get_place(place_id).await {
                Ok(Some(place)) if place.is_member(sender_id) => places.push(place),
                Ok(Some(_)) => {
                    debug!("{} cannot post to {}", sender_id, place_id);
                    response.error(ErrorCode::Access, &[place_id.as_str()]);
                    return;
                }
                Ok(None) => {
                    response.error(ErrorCode::Invalid, &[place_id.as_str()]);
                    return;
                }
                Err(e) => return model_error(response, &request.command, e),
            }
        }

        let post = match self
            .model
            .add_post(NewPost {
                sender_id: sender_id.to_string(),
                place_ids,
                recipients: emails,
                subject: args.subject,
                body: args.body,
            })
            .await
        {
            Ok(post) => post,
            Err(e) => return model_error(response, &request.command, e),
        };
        self.reporter.incr(reports::POSTS_ADDED);

        self.push.post_added(&post, &places);
        if !post.recipients.is_empty() {
            let mail = PostMail {
                post_id: post.id.clone(),
                sender_id: post.sender_id.clone(),
                recipients: post.recipients.clone(),
            };
            if let Err(e) = self.mailer.send_post(mail).await {
                warn!("Failed to queue mail for post {}: {:?}", post.id, e);
            }
        }

        response.ok(json!({"post_id": post.id}));
    }
}

impl CommandService for PostService {
    const PREFIX: &'static str = "post";

    fn commands(&self) -> &CommandTable<Self> {
        &self.table
    }
}

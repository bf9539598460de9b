use axum::{
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Result, ServiceError},
    models::Caller,
    params::ValidationError,
    service::Service,
};

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/webservice/rest/server.php", post(call_function))
        .route("/webservice/functions", get(list_functions))
        .with_state(service)
}

/// Remotely callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsFunction {
    GetGrades,
    UpdateGrade,
    GetForumsByCourses,
    GetForumDiscussions,
    GetForumPosts,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub capabilities: &'static str,
}

impl WsFunction {
    pub const ALL: [WsFunction; 5] = [
        WsFunction::GetGrades,
        WsFunction::UpdateGrade,
        WsFunction::GetForumsByCourses,
        WsFunction::GetForumDiscussions,
        WsFunction::GetForumPosts,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.info().name == name)
    }

    pub fn info(self) -> FunctionInfo {
        match self {
            WsFunction::GetGrades => FunctionInfo {
                name: "local_coursews_get_grades",
                description: "Returns grade item details and optionally student grades for an activity.",
                kind: "read",
                capabilities: "moodle/grade:view, moodle/grade:viewall",
            },
            WsFunction::UpdateGrade => FunctionInfo {
                name: "local_coursews_update_grade",
                description: "Creates, updates or deletes a grade item and its student grades.",
                kind: "write",
                capabilities: "moodle/grade:manage, moodle/grade:hide, moodle/grade:edit",
            },
            WsFunction::GetForumsByCourses => FunctionInfo {
                name: "local_coursews_get_forums_by_courses",
                description: "Returns the forums in the given courses, or in every enrolled course.",
                kind: "read",
                capabilities: "mod/forum:viewdiscussion",
            },
            WsFunction::GetForumDiscussions => FunctionInfo {
                name: "local_coursews_get_forum_discussions",
                description: "Returns the discussions of the given forums with reply and unread counts.",
                kind: "read",
                capabilities: "mod/forum:viewdiscussion, mod/forum:viewqandawithoutposting",
            },
            WsFunction::GetForumPosts => FunctionInfo {
                name: "local_coursews_get_forum_posts",
                description: "Returns every post in a discussion.",
                kind: "read",
                capabilities: "mod/forum:viewdiscussion, mod/forum:viewqandawithoutposting",
            },
        }
    }
}

#[derive(Deserialize, Debug)]
struct WsQuery {
    wsfunction: Option<String>,
    wstoken: Option<String>,
}

async fn list_functions() -> Json<Vec<FunctionInfo>> {
    Json(WsFunction::ALL.into_iter().map(WsFunction::info).collect())
}

async fn call_function(
    State(svc): State<Service>,
    Query(q): Query<WsQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    body: Bytes,
) -> Result<Response> {
    let name = q.wsfunction.unwrap_or_default();
    let function =
        WsFunction::from_name(&name).ok_or_else(|| ServiceError::not_found("external function", &name))?;

    let token = q
        .wstoken
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()))
        .ok_or(ServiceError::InvalidToken)?;
    let user_id = svc
        .store()
        .user_for_token(&token)
        .await?
        .ok_or(ServiceError::InvalidToken)?;
    let caller = Caller { user_id };

    let params = parse_body(&body)?;
    let resp = match function {
        WsFunction::GetGrades => Json(svc.get_grades(&caller, &params).await?).into_response(),
        WsFunction::UpdateGrade => Json(svc.update_grade(&caller, &params).await?).into_response(),
        WsFunction::GetForumsByCourses => {
            Json(svc.get_forums_by_courses(&caller, &params).await?).into_response()
        }
        WsFunction::GetForumDiscussions => {
            Json(svc.get_forum_discussions(&caller, &params).await?).into_response()
        }
        WsFunction::GetForumPosts => Json(svc.get_forum_posts(&caller, &params).await?).into_response(),
    };
    Ok(resp)
}

// an empty body means no parameters
fn parse_body(body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| {
        ServiceError::Validation(ValidationError {
            path: "(body)".into(),
            reason: e.to_string(),
        })
    })
}

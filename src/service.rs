//! The five remote operations. Each call validates its input, resolves and
//! validates its context, asks the access engine, then reads or writes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    access::{AccessEngine, Policy, WriteParts},
    config::ForumSettings,
    context::{ContextLevel, ContextResolver},
    error::{Result, ServiceError},
    forum::{self, ForumReader},
    gradebook::{GradeQuery, GradeUpdate, RawGradeUpdate},
    grades::{self, GradesResponse, UpdateGradeResponse},
    models::{Caller, DiscussionSummary, ForumSummary, PostSummary},
    params,
    rewrite::ContentRewriter,
    store::Store,
};

#[derive(Clone)]
pub struct Service {
    store: Arc<dyn Store>,
    rewriter: Arc<dyn ContentRewriter>,
    settings: ForumSettings,
}

impl Service {
    pub fn new(
        store: Arc<dyn Store>,
        rewriter: Arc<dyn ContentRewriter>,
        settings: ForumSettings,
    ) -> Self {
        Service {
            store,
            rewriter,
            settings,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    fn span(&self, function: &'static str, caller: &Caller) -> tracing::Span {
        tracing::info_span!("ws", function, user = caller.user_id, request_id = %Uuid::new_v4())
    }

    fn reader<'a>(&'a self, caller: &'a Caller) -> ForumReader<'a> {
        ForumReader::new(
            self.store.as_ref(),
            self.rewriter.as_ref(),
            &self.settings,
            caller,
            Utc::now().timestamp(),
        )
    }

    pub async fn get_grades(&self, caller: &Caller, input: &Value) -> Result<GradesResponse> {
        let span = self.span("get_grades", caller);
        async move {
            let p: grades::GetGradesParams = params::parse(&grades::get_grades_spec(), input)?;
            let req = p.grades;
            let (itemtype, itemmodule) = grades::split_component(&req.component);
            let store = self.store.as_ref();

            let ctx = ContextResolver::new(store)
                .resolve_valid(ContextLevel::Course, req.courseid, caller)
                .await?;
            let course = store
                .course(req.courseid)
                .await?
                .ok_or_else(|| ServiceError::not_found("course", req.courseid))?;
            AccessEngine::new(store, caller)
                .decide(
                    Policy::ViewGrades {
                        course: &course,
                        requested: req.userids.as_deref(),
                    },
                    &ctx,
                )
                .await?;

            let (_cm, activity) = grades::resolve_activity(store, &itemmodule, req.cmid).await?;
            let info = store
                .grading_info(&GradeQuery {
                    courseid: req.courseid,
                    itemtype,
                    itemmodule,
                    iteminstance: activity.id,
                    userids: req.userids.unwrap_or_default(),
                })
                .await?;
            let out = grades::flatten(info);
            tracing::debug!(items = out.items.len(), outcomes = out.outcomes.len(), "grades read");
            Ok(out)
        }
        .instrument(span)
        .await
    }

    pub async fn update_grade(&self, caller: &Caller, input: &Value) -> Result<UpdateGradeResponse> {
        let span = self.span("update_grade", caller);
        async move {
            let p: grades::UpdateGradeParams = params::parse(&grades::update_grade_spec(), input)?;
            let req = p.grade;
            let (itemtype, itemmodule) = grades::split_component(&req.component);
            let store = self.store.as_ref();

            let ctx = ContextResolver::new(store)
                .resolve_valid(ContextLevel::Course, req.courseid, caller)
                .await?;
            let parts = WriteParts::of(req.grades.as_deref(), req.itemdetails.as_ref());
            AccessEngine::new(store, caller)
                .decide(Policy::UpdateGrades(parts), &ctx)
                .await?;

            let (_cm, activity) = grades::resolve_activity(store, &itemmodule, req.cmid).await?;
            let update = GradeUpdate {
                source: req.source,
                courseid: req.courseid,
                itemtype,
                itemmodule,
                iteminstance: activity.id,
                itemnumber: req.itemnumber,
                grades: req.grades.map(|gs| {
                    gs.into_iter()
                        .map(|g| RawGradeUpdate {
                            userid: g.studentid,
                            rawgrade: g.grade,
                            feedback: g.feedback,
                        })
                        .collect()
                }),
                details: req.itemdetails,
                usermodified: caller.user_id,
                now: Utc::now().timestamp(),
            };
            let status = store
                .update_grades(&update)
                .await
                .map_err(ServiceError::StorageWrite)?;
            tracing::info!(result = status.code(), "grade update finished");
            Ok(UpdateGradeResponse {
                result: status.code(),
            })
        }
        .instrument(span)
        .await
    }

    pub async fn get_forums_by_courses(
        &self,
        caller: &Caller,
        input: &Value,
    ) -> Result<Vec<ForumSummary>> {
        let span = self.span("get_forums_by_courses", caller);
        async move {
            let p: forum::ForumsByCoursesParams =
                params::parse(&forum::forums_by_courses_spec(), input)?;
            self.reader(caller).forums_by_courses(&p.courseids).await
        }
        .instrument(span)
        .await
    }

    pub async fn get_forum_discussions(
        &self,
        caller: &Caller,
        input: &Value,
    ) -> Result<Vec<DiscussionSummary>> {
        let span = self.span("get_forum_discussions", caller);
        async move {
            let p: forum::DiscussionsParams = params::parse(&forum::discussions_spec(), input)?;
            self.reader(caller).discussions(&p.forumids).await
        }
        .instrument(span)
        .await
    }

    pub async fn get_forum_posts(&self, caller: &Caller, input: &Value) -> Result<Vec<PostSummary>> {
        let span = self.span("get_forum_posts", caller);
        async move {
            let p: forum::PostsParams = params::parse(&forum::posts_spec(), input)?;
            self.reader(caller).posts(p.discussionid).await
        }
        .instrument(span)
        .await
    }
}

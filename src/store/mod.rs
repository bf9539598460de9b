//! Storage collaborator. Every read the operations need is a keyed lookup or
//! a scan filtered by a parent id; the only write is the grade update, which
//! a backend must apply atomically.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    access::Capability,
    context::{Context, ContextLevel},
    error::StoreError,
    gradebook::{GradeQuery, GradeUpdate, GradeUpdateStatus, GradingInfo},
    models::{Activity, Course, CourseModule, Discussion, Forum, Post, User},
};

#[cfg(test)]
pub mod memory;
pub mod pg;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<i64>>;

    async fn context(&self, level: ContextLevel, instance: i64) -> StoreResult<Option<Context>>;
    /// Whether `user` holds `capability` in `context` or any of its parents.
    async fn has_capability(
        &self,
        user: i64,
        capability: Capability,
        context: &Context,
    ) -> StoreResult<bool>;

    async fn is_enrolled(&self, user: i64, course: i64) -> StoreResult<bool>;
    async fn enrolled_courses(&self, user: i64) -> StoreResult<Vec<i64>>;

    async fn course(&self, id: i64) -> StoreResult<Option<Course>>;
    async fn course_module(&self, id: i64) -> StoreResult<Option<CourseModule>>;
    async fn course_modules(&self, course: i64, module: &str) -> StoreResult<Vec<CourseModule>>;
    async fn activity(&self, module: &str, instance: i64) -> StoreResult<Option<Activity>>;

    async fn forum(&self, id: i64) -> StoreResult<Option<Forum>>;
    async fn forums_in_course(&self, course: i64) -> StoreResult<Vec<Forum>>;
    async fn discussion(&self, id: i64) -> StoreResult<Option<Discussion>>;
    async fn discussions_in_forum(&self, forum: i64) -> StoreResult<Vec<Discussion>>;
    async fn posts_in_discussion(&self, discussion: i64) -> StoreResult<Vec<Post>>;
    async fn user_has_posted(&self, discussion: i64, user: i64) -> StoreResult<bool>;
    async fn user(&self, id: i64) -> StoreResult<Option<User>>;

    /// Forums the user opted out of tracking.
    async fn forum_untracked(&self, user: i64, forum: i64) -> StoreResult<bool>;
    /// Unread post counts per discussion, counting only posts modified after
    /// `cutoff`. Discussions without unread posts are absent.
    async fn unread_counts(
        &self,
        user: i64,
        forum: i64,
        cutoff: i64,
    ) -> StoreResult<HashMap<i64, i64>>;

    async fn grading_info(&self, query: &GradeQuery) -> StoreResult<GradingInfo>;
    async fn update_grades(&self, update: &GradeUpdate) -> StoreResult<GradeUpdateStatus>;
}

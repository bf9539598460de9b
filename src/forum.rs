//! Forum, discussion and post listings.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    access::{AccessEngine, Capability, Policy},
    config::{ForumSettings, FullnameDisplay},
    context::{Context, ContextLevel, ContextResolver},
    error::{Result, ServiceError},
    models::{
        Caller, CourseModule, Discussion, DiscussionSummary, Forum, ForumSummary, Post,
        PostSummary, TrackingType, User,
    },
    params::{ParamSpec, ParamType},
    rewrite::{ContentRewriter, FileArea},
    store::Store,
};

const COMPONENT: &str = "mod_forum";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForumsByCoursesParams {
    pub courseids: Vec<i64>,
}

pub fn forums_by_courses_spec() -> ParamSpec {
    ParamSpec::single([(
        "courseids",
        ParamSpec::multiple(ParamSpec::value(ParamType::Int)).default(json!([])),
    )])
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DiscussionsParams {
    pub forumids: Vec<i64>,
}

pub fn discussions_spec() -> ParamSpec {
    ParamSpec::single([(
        "forumids",
        ParamSpec::multiple(ParamSpec::value(ParamType::Int)),
    )])
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PostsParams {
    pub discussionid: i64,
}

pub fn posts_spec() -> ParamSpec {
    ParamSpec::single([("discussionid", ParamSpec::value(ParamType::Int))])
}

/// Request-local memo of user records, so each author is fetched once.
#[derive(Default)]
pub struct UserCache {
    users: HashMap<i64, User>,
}

impl UserCache {
    pub async fn get(&mut self, store: &dyn Store, id: i64) -> Result<&User> {
        if !self.users.contains_key(&id) {
            let user = store
                .user(id)
                .await?
                .ok_or_else(|| ServiceError::not_found("user", id))?;
            self.users.insert(id, user);
        }
        self.users
            .get(&id)
            .ok_or_else(|| ServiceError::not_found("user", id))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

/// Ids in first-seen order with repeats dropped.
fn unique(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub fn fullname(user: &User, can_view_fullnames: bool, display: FullnameDisplay) -> String {
    let display = if can_view_fullnames {
        FullnameDisplay::FirstLast
    } else {
        display
    };
    match display {
        FullnameDisplay::FirstLast => format!("{} {}", user.firstname, user.lastname),
        FullnameDisplay::LastFirst => format!("{} {}", user.lastname, user.firstname),
        FullnameDisplay::FirstOnly => user.firstname.clone(),
    }
}

/// Reply count and last reply id of a discussion, derived from its posts.
/// With no replies the first post counts as the last one.
pub fn reply_stats(discussion: &Discussion, posts: &[Post]) -> (i64, i64) {
    let replies = posts.iter().filter(|p| p.parent != 0);
    let (count, last) = replies.fold((0i64, None), |(n, last), p| {
        (n + 1, Some(last.map_or(p.id, |l: i64| l.max(p.id))))
    });
    (count, last.unwrap_or(discussion.firstpost))
}

pub struct ForumReader<'a> {
    store: &'a dyn Store,
    rewriter: &'a dyn ContentRewriter,
    settings: &'a ForumSettings,
    caller: &'a Caller,
    now: i64,
}

impl<'a> ForumReader<'a> {
    pub fn new(
        store: &'a dyn Store,
        rewriter: &'a dyn ContentRewriter,
        settings: &'a ForumSettings,
        caller: &'a Caller,
        now: i64,
    ) -> Self {
        ForumReader {
            store,
            rewriter,
            settings,
            caller,
            now,
        }
    }

    fn resolver(&self) -> ContextResolver<'a> {
        ContextResolver::new(self.store)
    }

    fn access(&self) -> AccessEngine<'a> {
        AccessEngine::new(self.store, self.caller)
    }

    /// Forums of the given courses, or of every enrolled course when empty.
    pub async fn forums_by_courses(&self, courseids: &[i64]) -> Result<Vec<ForumSummary>> {
        let courseids = if courseids.is_empty() {
            self.store.enrolled_courses(self.caller.user_id).await?
        } else {
            unique(courseids)
        };

        let mut out = Vec::new();
        for cid in courseids {
            self.resolver()
                .resolve_valid(ContextLevel::Course, cid, self.caller)
                .await?;
            let mut forums: HashMap<i64, Forum> = self
                .store
                .forums_in_course(cid)
                .await?
                .into_iter()
                .map(|f| (f.id, f))
                .collect();
            if forums.is_empty() {
                continue;
            }
            for cm in self.store.course_modules(cid, "forum").await? {
                // structural entries without a forum row, and rows without one, are skipped
                let Some(mut forum) = forums.remove(&cm.instance) else {
                    continue;
                };
                let ctx = self
                    .resolver()
                    .resolve_valid(ContextLevel::Module, cm.id, self.caller)
                    .await?;
                if !self.is_visible(&cm, &ctx).await? {
                    continue;
                }
                self.access()
                    .decide(Policy::ReadForum { module: &cm }, &ctx)
                    .await?;
                forum.intro = self.rewriter.rewrite(
                    &forum.intro,
                    &FileArea {
                        context_id: ctx.id,
                        component: COMPONENT,
                        filearea: "intro",
                        itemid: None,
                    },
                );
                out.push(ForumSummary { forum, cmid: cm.id });
            }
        }
        tracing::debug!(count = out.len(), "forums listed");
        Ok(out)
    }

    async fn is_visible(&self, cm: &CourseModule, ctx: &Context) -> Result<bool> {
        Ok((cm.visible && cm.section_visible)
            || self.access().has(Capability::ViewHiddenActivities, ctx).await?)
    }

    /// Locate the forum's course module, checking course access once per course.
    async fn forum_module(
        &self,
        forum: &Forum,
        modinfo: &mut HashMap<i64, Vec<CourseModule>>,
    ) -> Result<(CourseModule, Context)> {
        if !modinfo.contains_key(&forum.course) {
            self.resolver()
                .resolve_valid(ContextLevel::Course, forum.course, self.caller)
                .await?;
            let cms = self.store.course_modules(forum.course, "forum").await?;
            modinfo.insert(forum.course, cms);
        }
        let cm = modinfo
            .get(&forum.course)
            .and_then(|cms| cms.iter().find(|cm| cm.instance == forum.id))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                errorcode: "invalidmodule",
                entity: "forum module",
                id: forum.id.to_string(),
            })?;
        let ctx = self
            .resolver()
            .resolve_valid(ContextLevel::Module, cm.id, self.caller)
            .await?;
        self.access()
            .decide(Policy::ReadForum { module: &cm }, &ctx)
            .await?;
        Ok((cm, ctx))
    }

    async fn unread_counts(
        &self,
        forum: &Forum,
        users: &mut UserCache,
    ) -> Result<Option<HashMap<i64, i64>>> {
        let tracking = TrackingType::from_db(forum.trackingtype);
        if !self.settings.track_read_posts || tracking == TrackingType::Off {
            return Ok(None);
        }
        let tracked = match tracking {
            TrackingType::Forced => true,
            _ => {
                let trackforums = users.get(self.store, self.caller.user_id).await?.trackforums;
                trackforums
                    && !self
                        .store
                        .forum_untracked(self.caller.user_id, forum.id)
                        .await?
            }
        };
        if !tracked {
            return Ok(None);
        }
        let cutoff = self
            .now
            .saturating_sub(self.settings.old_post_days.saturating_mul(24 * 3600));
        Ok(Some(
            self.store
                .unread_counts(self.caller.user_id, forum.id, cutoff)
                .await?,
        ))
    }

    pub async fn discussions(&self, forumids: &[i64]) -> Result<Vec<DiscussionSummary>> {
        let mut modinfo: HashMap<i64, Vec<CourseModule>> = HashMap::new();
        let mut users = UserCache::default();
        let mut out = Vec::new();

        for fid in unique(forumids) {
            let forum = self
                .store
                .forum(fid)
                .await?
                .ok_or_else(|| ServiceError::not_found("forum", fid))?;
            let (_cm, ctx) = self.forum_module(&forum, &mut modinfo).await?;
            let can_view_fullnames = self.access().has(Capability::ViewFullNames, &ctx).await?;
            let unreads = self.unread_counts(&forum, &mut users).await?;

            for discussion in self.store.discussions_in_forum(fid).await? {
                if forum.is_qanda() {
                    let posted = self
                        .store
                        .user_has_posted(discussion.id, self.caller.user_id)
                        .await?;
                    self.access()
                        .decide(Policy::ReadQandaDiscussion { posted }, &ctx)
                        .await?;
                }
                let posts = self.store.posts_in_discussion(discussion.id).await?;
                let subject = posts
                    .iter()
                    .find(|p| p.id == discussion.firstpost)
                    .map(|p| p.subject.clone())
                    .ok_or_else(|| ServiceError::not_found("post", discussion.firstpost))?;
                let (numreplies, lastpost) = reply_stats(&discussion, &posts);
                let last_author = posts
                    .iter()
                    .find(|p| p.id == lastpost)
                    .map(|p| p.userid)
                    .ok_or_else(|| ServiceError::not_found("post", lastpost))?;

                let display = self.settings.fullname_display;
                let first = users.get(self.store, discussion.userid).await?.clone();
                let last = users.get(self.store, last_author).await?;

                out.push(DiscussionSummary {
                    id: discussion.id,
                    course: discussion.course,
                    forum: discussion.forum,
                    name: discussion.name.clone(),
                    userid: discussion.userid,
                    groupid: discussion.groupid,
                    assessed: discussion.assessed,
                    timemodified: discussion.timemodified,
                    usermodified: discussion.usermodified,
                    timestart: discussion.timestart,
                    timeend: discussion.timeend,
                    firstpost: discussion.firstpost,
                    firstuserfullname: fullname(&first, can_view_fullnames, display),
                    firstuserimagealt: first.imagealt.clone(),
                    firstuserpicture: first.picture,
                    firstuseremail: first.email.clone(),
                    subject,
                    numreplies,
                    numunread: unreads
                        .as_ref()
                        .map(|u| u.get(&discussion.id).copied().unwrap_or(0)),
                    lastpost,
                    lastuserid: last.id,
                    lastuserfullname: fullname(last, can_view_fullnames, display),
                    lastuserimagealt: last.imagealt.clone(),
                    lastuserpicture: last.picture,
                    lastuseremail: last.email.clone(),
                });
            }
        }
        tracing::debug!(count = out.len(), users = users.len(), "discussions listed");
        Ok(out)
    }

    pub async fn posts(&self, discussionid: i64) -> Result<Vec<PostSummary>> {
        let discussion = self
            .store
            .discussion(discussionid)
            .await?
            .ok_or_else(|| ServiceError::not_found("discussion", discussionid))?;
        let forum = self
            .store
            .forum(discussion.forum)
            .await?
            .ok_or_else(|| ServiceError::not_found("forum", discussion.forum))?;
        let (_cm, ctx) = self.forum_module(&forum, &mut HashMap::new()).await?;
        let can_view_fullnames = self.access().has(Capability::ViewFullNames, &ctx).await?;

        if forum.is_qanda() {
            let posted = self
                .store
                .user_has_posted(discussionid, self.caller.user_id)
                .await?;
            self.access()
                .decide(Policy::ReadQandaDiscussion { posted }, &ctx)
                .await?;
        }

        let mut users = UserCache::default();
        let mut out = Vec::new();
        for mut post in self.store.posts_in_discussion(discussionid).await? {
            let author = users.get(self.store, post.userid).await?;
            let userfullname = fullname(author, can_view_fullnames, self.settings.fullname_display);
            post.message = self.rewriter.rewrite(
                &post.message,
                &FileArea {
                    context_id: ctx.id,
                    component: COMPONENT,
                    filearea: "post",
                    itemid: Some(post.id),
                },
            );
            out.push(PostSummary { post, userfullname });
        }
        tracing::debug!(count = out.len(), users = users.len(), "posts listed");
        Ok(out)
    }
}

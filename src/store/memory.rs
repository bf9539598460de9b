//! In-memory store used as a seeded fixture by the tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{Store, StoreResult};
use crate::{
    access::Capability,
    context::{Context, ContextLevel},
    error::StoreError,
    gradebook::{
        self, GradeGradeRow, GradeItemRow, GradeQuery, GradeUpdate, GradeUpdateStatus,
        GradingInfo, ItemAction, ScaleRow,
    },
    models::{Activity, Course, CourseModule, Discussion, Forum, Post, User},
};

const SYSTEM_CONTEXT: i64 = 1;

#[derive(Default)]
struct Data {
    next_context: i64,
    contexts: Vec<Context>,
    grants: HashSet<(i64, i64, Capability)>,
    enrolments: HashSet<(i64, i64)>,
    tokens: HashMap<String, i64>,
    courses: HashMap<i64, Course>,
    modules: BTreeMap<i64, CourseModule>,
    activities: HashMap<(String, i64), Activity>,
    forums: BTreeMap<i64, Forum>,
    discussions: BTreeMap<i64, Discussion>,
    posts: BTreeMap<i64, Post>,
    users: HashMap<i64, User>,
    untracked: HashSet<(i64, i64)>,
    read: HashSet<(i64, i64)>,
    grade_items: Vec<GradeItemRow>,
    grade_grades: Vec<GradeGradeRow>,
    scales: Vec<ScaleRow>,
    broken_level: Option<ContextLevel>,
    reject_grade_writes: bool,
}

impl Data {
    fn context(&self, level: ContextLevel, instance: i64) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.level == level && c.instance_id == instance)
    }

    fn add_context(&mut self, level: ContextLevel, instance: i64, parent_path: &str) -> String {
        self.next_context = self.next_context.max(SYSTEM_CONTEXT) + 1;
        let id = self.next_context;
        let path = format!("{}/{}", parent_path, id);
        self.contexts.push(Context {
            id,
            level,
            instance_id: instance,
            path: path.clone(),
            deleted: false,
        });
        path
    }

    fn context_id(&self, level: ContextLevel, instance: i64) -> i64 {
        self.context(level, instance)
            .map(|c| c.id)
            .unwrap_or_else(|| panic!("no {:?} context for {}", level, instance))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Data>,
    user_lookups: AtomicUsize,
}

pub fn forum_row(id: i64, course: i64, kind: &str) -> Forum {
    Forum {
        id,
        course,
        kind: kind.to_string(),
        name: format!("Forum {}", id),
        intro: format!(r#"<img src="@@PLUGINFILE@@/banner{}.png">"#, id),
        introformat: 1,
        assessed: 0,
        assesstimestart: 0,
        assesstimefinish: 0,
        scale: 0,
        maxbytes: 512_000,
        maxattachments: 9,
        forcesubscribe: 0,
        trackingtype: 1,
        rsstype: 0,
        rssarticles: 0,
        timemodified: 1_700_000_000,
        warnafter: 0,
        blockafter: 0,
        blockperiod: 0,
        completiondiscussions: 0,
        completionreplies: 0,
        completionposts: 0,
    }
}

impl MemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, Data> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Data> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_course(&self, id: i64, showgrades: bool) {
        let mut d = self.write();
        d.courses.insert(
            id,
            Course {
                id,
                fullname: format!("Course {}", id),
                shortname: format!("C{}", id),
                showgrades,
                visible: true,
            },
        );
        d.add_context(ContextLevel::Course, id, &format!("/{}", SYSTEM_CONTEXT));
    }

    pub fn add_user(&self, id: i64, firstname: &str, lastname: &str) {
        let mut d = self.write();
        d.users.insert(
            id,
            User {
                id,
                firstname: firstname.to_string(),
                lastname: lastname.to_string(),
                email: format!("{}.{}@example.org", firstname, lastname).to_lowercase(),
                picture: id * 10,
                imagealt: None,
                trackforums: true,
            },
        );
        d.add_context(ContextLevel::User, id, &format!("/{}", SYSTEM_CONTEXT));
    }

    pub fn set_trackforums(&self, user: i64, on: bool) {
        if let Some(u) = self.write().users.get_mut(&user) {
            u.trackforums = on;
        }
    }

    pub fn add_token(&self, token: &str, user: i64) {
        self.write().tokens.insert(token.to_string(), user);
    }

    pub fn enrol(&self, user: i64, course: i64) {
        self.write().enrolments.insert((user, course));
    }

    pub fn add_module(&self, cmid: i64, course: i64, module: &str, instance: i64, visible: bool) {
        let mut d = self.write();
        d.modules.insert(
            cmid,
            CourseModule {
                id: cmid,
                course,
                module: module.to_string(),
                instance,
                visible,
                section_visible: true,
            },
        );
        let parent = d
            .context(ContextLevel::Course, course)
            .map(|c| c.path.clone())
            .unwrap_or_else(|| format!("/{}", SYSTEM_CONTEXT));
        d.add_context(ContextLevel::Module, cmid, &parent);
    }

    pub fn module(&self, cmid: i64) -> CourseModule {
        self.read().modules[&cmid].clone()
    }

    pub fn add_activity(&self, module: &str, id: i64, course: i64) {
        self.write().activities.insert(
            (module.to_string(), id),
            Activity {
                id,
                course,
                name: format!("{} {}", module, id),
            },
        );
    }

    pub fn add_forum(&self, forum: Forum) {
        self.write().forums.insert(forum.id, forum);
    }

    /// Discussion `id` with its first post `id * 100`, authored by `author`.
    pub fn add_discussion(&self, id: i64, forum: i64, author: i64) {
        let mut d = self.write();
        let course = d.forums.get(&forum).map(|f| f.course).unwrap_or(0);
        let firstpost = id * 100;
        d.discussions.insert(
            id,
            Discussion {
                id,
                course,
                forum,
                name: format!("Discussion {}", id),
                firstpost,
                userid: author,
                groupid: -1,
                assessed: 0,
                timemodified: 1_700_000_000,
                usermodified: author,
                timestart: 0,
                timeend: 0,
            },
        );
        d.posts.insert(firstpost, post_row(firstpost, id, 0, author));
    }

    pub fn add_reply(&self, id: i64, discussion: i64, parent: i64, author: i64) {
        self.write()
            .posts
            .insert(id, post_row(id, discussion, parent, author));
    }

    pub fn mark_read(&self, user: i64, post: i64) {
        self.write().read.insert((user, post));
    }

    pub fn untrack(&self, user: i64, forum: i64) {
        self.write().untracked.insert((user, forum));
    }

    pub fn grant_course(&self, user: i64, course: i64, cap: Capability) {
        let mut d = self.write();
        let ctx = d.context_id(ContextLevel::Course, course);
        d.grants.insert((user, ctx, cap));
    }

    pub fn revoke_course(&self, user: i64, course: i64, cap: Capability) {
        let mut d = self.write();
        let ctx = d.context_id(ContextLevel::Course, course);
        d.grants.remove(&(user, ctx, cap));
    }

    pub fn grant_module(&self, user: i64, cmid: i64, cap: Capability) {
        let mut d = self.write();
        let ctx = d.context_id(ContextLevel::Module, cmid);
        d.grants.insert((user, ctx, cap));
    }

    pub fn grant_user_context(&self, user: i64, target: i64, cap: Capability) {
        let mut d = self.write();
        let ctx = d.context_id(ContextLevel::User, target);
        d.grants.insert((user, ctx, cap));
    }

    pub fn delete_context(&self, level: ContextLevel, instance: i64) {
        let mut d = self.write();
        if let Some(c) = d
            .contexts
            .iter_mut()
            .find(|c| c.level == level && c.instance_id == instance)
        {
            c.deleted = true;
        }
    }

    pub fn context_of(&self, level: ContextLevel, instance: i64) -> Context {
        self.read()
            .context(level, instance)
            .cloned()
            .unwrap_or_else(|| panic!("no {:?} context for {}", level, instance))
    }

    pub fn add_grade_item(&self, item: GradeItemRow) {
        self.write().grade_items.push(item);
    }

    pub fn add_grade(&self, grade: GradeGradeRow) {
        self.write().grade_grades.push(grade);
    }

    pub fn add_scale(&self, scale: ScaleRow) {
        self.write().scales.push(scale);
    }

    pub fn grade_items(&self) -> Vec<GradeItemRow> {
        self.read().grade_items.clone()
    }

    pub fn grade_of(&self, itemid: i64, user: i64) -> Option<GradeGradeRow> {
        self.read()
            .grade_grades
            .iter()
            .find(|g| g.itemid == itemid && g.userid == user)
            .cloned()
    }

    /// Make every context lookup at `level` fail as a backend error would.
    pub fn break_contexts(&self, level: ContextLevel) {
        self.write().broken_level = Some(level);
    }

    pub fn reject_grade_writes(&self) {
        self.write().reject_grade_writes = true;
    }

    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }
}

fn post_row(id: i64, discussion: i64, parent: i64, author: i64) -> Post {
    Post {
        id,
        discussion,
        parent,
        userid: author,
        created: 1_700_000_000 + id,
        modified: 1_700_000_000 + id,
        mailed: 1,
        subject: format!("Post {}", id),
        message: format!(r#"<p>post {}</p><img src="@@PLUGINFILE@@/pic.png">"#, id),
        messageformat: 1,
        messagetrust: 0,
        attachment: String::new(),
        totalscore: 0,
        mailnow: 0,
    }
}

fn same_item(item: &GradeItemRow, u: &GradeUpdate) -> bool {
    item.courseid == u.courseid
        && item.itemtype == u.itemtype
        && item.itemmodule == u.itemmodule
        && item.iteminstance == u.iteminstance
        && item.itemnumber == u.itemnumber
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<i64>> {
        Ok(self.read().tokens.get(token).copied())
    }

    async fn context(&self, level: ContextLevel, instance: i64) -> StoreResult<Option<Context>> {
        let d = self.read();
        if d.broken_level == Some(level) {
            return Err(StoreError::Corrupt {
                table: "context",
                detail: format!("{} {} unreadable", level.name(), instance),
            });
        }
        Ok(d.context(level, instance).cloned())
    }

    async fn has_capability(
        &self,
        user: i64,
        capability: Capability,
        context: &Context,
    ) -> StoreResult<bool> {
        let d = self.read();
        Ok(context
            .lineage()
            .into_iter()
            .any(|ctx| d.grants.contains(&(user, ctx, capability))))
    }

    async fn is_enrolled(&self, user: i64, course: i64) -> StoreResult<bool> {
        Ok(self.read().enrolments.contains(&(user, course)))
    }

    async fn enrolled_courses(&self, user: i64) -> StoreResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .read()
            .enrolments
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, c)| *c)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn course(&self, id: i64) -> StoreResult<Option<Course>> {
        Ok(self.read().courses.get(&id).cloned())
    }

    async fn course_module(&self, id: i64) -> StoreResult<Option<CourseModule>> {
        Ok(self.read().modules.get(&id).cloned())
    }

    async fn course_modules(&self, course: i64, module: &str) -> StoreResult<Vec<CourseModule>> {
        Ok(self
            .read()
            .modules
            .values()
            .filter(|cm| cm.course == course && cm.module == module)
            .cloned()
            .collect())
    }

    async fn activity(&self, module: &str, instance: i64) -> StoreResult<Option<Activity>> {
        let d = self.read();
        if module == "forum" {
            return Ok(d.forums.get(&instance).map(|f| Activity {
                id: f.id,
                course: f.course,
                name: f.name.clone(),
            }));
        }
        Ok(d.activities.get(&(module.to_string(), instance)).cloned())
    }

    async fn forum(&self, id: i64) -> StoreResult<Option<Forum>> {
        Ok(self.read().forums.get(&id).cloned())
    }

    async fn forums_in_course(&self, course: i64) -> StoreResult<Vec<Forum>> {
        Ok(self
            .read()
            .forums
            .values()
            .filter(|f| f.course == course)
            .cloned()
            .collect())
    }

    async fn discussion(&self, id: i64) -> StoreResult<Option<Discussion>> {
        Ok(self.read().discussions.get(&id).cloned())
    }

    async fn discussions_in_forum(&self, forum: i64) -> StoreResult<Vec<Discussion>> {
        Ok(self
            .read()
            .discussions
            .values()
            .filter(|d| d.forum == forum)
            .cloned()
            .collect())
    }

    async fn posts_in_discussion(&self, discussion: i64) -> StoreResult<Vec<Post>> {
        Ok(self
            .read()
            .posts
            .values()
            .filter(|p| p.discussion == discussion)
            .cloned()
            .collect())
    }

    async fn user_has_posted(&self, discussion: i64, user: i64) -> StoreResult<bool> {
        Ok(self
            .read()
            .posts
            .values()
            .any(|p| p.discussion == discussion && p.userid == user))
    }

    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.read().users.get(&id).cloned())
    }

    async fn forum_untracked(&self, user: i64, forum: i64) -> StoreResult<bool> {
        Ok(self.read().untracked.contains(&(user, forum)))
    }

    async fn unread_counts(
        &self,
        user: i64,
        forum: i64,
        cutoff: i64,
    ) -> StoreResult<HashMap<i64, i64>> {
        let d = self.read();
        let mut counts = HashMap::new();
        for p in d.posts.values() {
            let in_forum = d
                .discussions
                .get(&p.discussion)
                .is_some_and(|disc| disc.forum == forum);
            if in_forum && p.modified > cutoff && !d.read.contains(&(user, p.id)) {
                *counts.entry(p.discussion).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn grading_info(&self, query: &GradeQuery) -> StoreResult<GradingInfo> {
        let d = self.read();
        let mut items: Vec<GradeItemRow> = d
            .grade_items
            .iter()
            .filter(|i| {
                i.courseid == query.courseid
                    && i.itemtype == query.itemtype
                    && i.itemmodule == query.itemmodule
                    && i.iteminstance == query.iteminstance
            })
            .cloned()
            .collect();
        items.sort_by_key(|i| i.itemnumber);
        Ok(gradebook::grading_info(query, &items, &d.grade_grades, &d.scales))
    }

    async fn update_grades(&self, update: &GradeUpdate) -> StoreResult<GradeUpdateStatus> {
        let mut d = self.write();
        if d.reject_grade_writes {
            return Err(StoreError::Corrupt {
                table: "grade_item",
                detail: "write rejected".into(),
            });
        }
        let matching: Vec<GradeItemRow> = d
            .grade_items
            .iter()
            .filter(|i| same_item(i, update))
            .cloned()
            .collect();

        match gradebook::resolve_item(&matching, update) {
            ItemAction::Finish(status) => Ok(status),
            ItemAction::Delete(id) => {
                d.grade_items.retain(|i| i.id != id);
                d.grade_grades.retain(|g| g.itemid != id);
                Ok(GradeUpdateStatus::Ok)
            }
            ItemAction::Write(mut item) => {
                // work on copies; nothing is kept unless every grade applies
                let mut items = d.grade_items.clone();
                let mut grades = d.grade_grades.clone();
                if item.id == 0 {
                    item.id = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
                    items.push(item.clone());
                } else if let Some(slot) = items.iter_mut().find(|i| i.id == item.id) {
                    *slot = item.clone();
                }
                for raw in update.grades.iter().flatten() {
                    let pos = grades
                        .iter()
                        .position(|g| g.itemid == item.id && g.userid == raw.userid);
                    let merged = gradebook::merge_grade(
                        &item,
                        pos.map(|i| &grades[i]),
                        raw,
                        update.usermodified,
                        update.now,
                    );
                    let mut row = match merged {
                        Ok(row) => row,
                        Err(status) => return Ok(status),
                    };
                    match pos {
                        Some(i) => grades[i] = row,
                        None => {
                            row.id = grades.iter().map(|g| g.id).max().unwrap_or(0) + 1;
                            grades.push(row);
                        }
                    }
                }
                d.grade_items = items;
                d.grade_grades = grades;
                Ok(GradeUpdateStatus::Ok)
            }
        }
    }
}

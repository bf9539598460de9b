use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, Postgres, Transaction};

use crate::{
    access::Capability,
    context::{Context, ContextLevel},
    db::Db,
    error::StoreError,
    gradebook::{
        self, GradeGradeRow, GradeItemRow, GradeQuery, GradeUpdate, GradeUpdateStatus,
        GradingInfo, ItemAction, ScaleRow,
    },
    models::{Activity, Course, CourseModule, Discussion, Forum, Post, User},
};

use super::{Store, StoreResult};

const GRADE_ITEM_COLUMNS: &str = "id, courseid, itemtype, itemmodule, iteminstance, itemnumber, \
     itemname, idnumber, gradetype, grademax, grademin, gradepass, scaleid, outcomeid, \
     multfactor, plusfactor, locked, hidden";

const GRADE_COLUMNS: &str = "id, itemid, userid, rawgrade, finalgrade, feedback, feedbackformat, \
     locked, hidden, overridden, usermodified, timecreated, timemodified";

#[derive(sqlx::FromRow)]
struct ContextRow {
    id: i64,
    contextlevel: i32,
    instanceid: i64,
    path: String,
    deleted: bool,
}

impl TryFrom<ContextRow> for Context {
    type Error = StoreError;

    fn try_from(row: ContextRow) -> Result<Self, Self::Error> {
        let level = match row.contextlevel {
            30 => ContextLevel::User,
            50 => ContextLevel::Course,
            70 => ContextLevel::Module,
            other => {
                return Err(StoreError::Corrupt {
                    table: "context",
                    detail: format!("context {} has level {}", row.id, other),
                })
            }
        };
        Ok(Context {
            id: row.id,
            level,
            instance_id: row.instanceid,
            path: row.path,
            deleted: row.deleted,
        })
    }
}

pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        PgStore { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<i64>> {
        Ok(
            query_scalar::<_, i64>("SELECT userid FROM external_token WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn context(&self, level: ContextLevel, instance: i64) -> StoreResult<Option<Context>> {
        let row = query_as::<_, ContextRow>(
            "SELECT id, contextlevel, instanceid, path, deleted FROM context \
             WHERE contextlevel = $1 AND instanceid = $2",
        )
        .bind(level.code())
        .bind(instance)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Context::try_from).transpose()
    }

    async fn has_capability(
        &self,
        user: i64,
        capability: Capability,
        context: &Context,
    ) -> StoreResult<bool> {
        Ok(query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM capability_grant \
             WHERE userid = $1 AND capability = $2 AND contextid = ANY($3))",
        )
        .bind(user)
        .bind(capability.as_str())
        .bind(context.lineage())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn is_enrolled(&self, user: i64, course: i64) -> StoreResult<bool> {
        Ok(query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM enrolment WHERE userid = $1 AND courseid = $2)",
        )
        .bind(user)
        .bind(course)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn enrolled_courses(&self, user: i64) -> StoreResult<Vec<i64>> {
        Ok(
            query_scalar::<_, i64>("SELECT courseid FROM enrolment WHERE userid = $1 ORDER BY courseid")
                .bind(user)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn course(&self, id: i64) -> StoreResult<Option<Course>> {
        Ok(query_as::<_, Course>(
            "SELECT id, fullname, shortname, showgrades, visible FROM course WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn course_module(&self, id: i64) -> StoreResult<Option<CourseModule>> {
        Ok(query_as::<_, CourseModule>(
            "SELECT id, course, module, instance, visible, section_visible \
             FROM course_module WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn course_modules(&self, course: i64, module: &str) -> StoreResult<Vec<CourseModule>> {
        Ok(query_as::<_, CourseModule>(
            "SELECT id, course, module, instance, visible, section_visible \
             FROM course_module WHERE course = $1 AND module = $2 ORDER BY id",
        )
        .bind(course)
        .bind(module)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn activity(&self, module: &str, instance: i64) -> StoreResult<Option<Activity>> {
        let q = if module == "forum" {
            query_as::<_, Activity>("SELECT id, course, name FROM forum WHERE id = $1").bind(instance)
        } else {
            query_as::<_, Activity>(
                "SELECT id, course, name FROM activity WHERE id = $1 AND module = $2",
            )
            .bind(instance)
            .bind(module)
        };
        Ok(q.fetch_optional(&self.pool).await?)
    }

    async fn forum(&self, id: i64) -> StoreResult<Option<Forum>> {
        Ok(query_as::<_, Forum>("SELECT * FROM forum WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn forums_in_course(&self, course: i64) -> StoreResult<Vec<Forum>> {
        Ok(query_as::<_, Forum>("SELECT * FROM forum WHERE course = $1 ORDER BY id")
            .bind(course)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn discussion(&self, id: i64) -> StoreResult<Option<Discussion>> {
        Ok(query_as::<_, Discussion>("SELECT * FROM forum_discussion WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn discussions_in_forum(&self, forum: i64) -> StoreResult<Vec<Discussion>> {
        Ok(query_as::<_, Discussion>(
            "SELECT * FROM forum_discussion WHERE forum = $1 ORDER BY timemodified DESC, id DESC",
        )
        .bind(forum)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn posts_in_discussion(&self, discussion: i64) -> StoreResult<Vec<Post>> {
        Ok(query_as::<_, Post>(
            "SELECT * FROM forum_post WHERE discussion = $1 ORDER BY created DESC, id DESC",
        )
        .bind(discussion)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn user_has_posted(&self, discussion: i64, user: i64) -> StoreResult<bool> {
        Ok(query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM forum_post WHERE discussion = $1 AND userid = $2)",
        )
        .bind(discussion)
        .bind(user)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(query_as::<_, User>(
            "SELECT id, firstname, lastname, email, picture, imagealt, trackforums \
             FROM app_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn forum_untracked(&self, user: i64, forum: i64) -> StoreResult<bool> {
        Ok(query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM forum_track_pref WHERE userid = $1 AND forumid = $2)",
        )
        .bind(user)
        .bind(forum)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn unread_counts(
        &self,
        user: i64,
        forum: i64,
        cutoff: i64,
    ) -> StoreResult<HashMap<i64, i64>> {
        let rows = query_as::<_, (i64, i64)>(
            r#"
            SELECT p.discussion, COUNT(p.id)
            FROM forum_post p
            JOIN forum_discussion d ON d.id = p.discussion
            LEFT JOIN forum_read r ON r.postid = p.id AND r.userid = $1
            WHERE d.forum = $2 AND p.modified > $3 AND r.postid IS NULL
            GROUP BY p.discussion
            "#,
        )
        .bind(user)
        .bind(forum)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn grading_info(&self, query: &GradeQuery) -> StoreResult<GradingInfo> {
        let items = query_as::<_, GradeItemRow>(&format!(
            "SELECT {GRADE_ITEM_COLUMNS} FROM grade_item \
             WHERE courseid = $1 AND itemtype = $2 AND itemmodule = $3 AND iteminstance = $4 \
             ORDER BY itemnumber"
        ))
        .bind(query.courseid)
        .bind(&query.itemtype)
        .bind(&query.itemmodule)
        .bind(query.iteminstance)
        .fetch_all(&self.pool)
        .await?;

        let item_ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        let grades = if item_ids.is_empty() || query.userids.is_empty() {
            Vec::new()
        } else {
            query_as::<_, GradeGradeRow>(&format!(
                "SELECT {GRADE_COLUMNS} FROM grade_grade WHERE itemid = ANY($1) AND userid = ANY($2)"
            ))
            .bind(&item_ids)
            .bind(&query.userids)
            .fetch_all(&self.pool)
            .await?
        };

        let scale_ids: Vec<i64> = items.iter().filter_map(|i| i.scaleid).collect();
        let scales = if scale_ids.is_empty() {
            Vec::new()
        } else {
            query_as::<_, ScaleRow>("SELECT id, scale FROM scale WHERE id = ANY($1)")
                .bind(&scale_ids)
                .fetch_all(&self.pool)
                .await?
        };

        Ok(gradebook::grading_info(query, &items, &grades, &scales))
    }

    async fn update_grades(&self, update: &GradeUpdate) -> StoreResult<GradeUpdateStatus> {
        let mut tx = self.pool.begin().await?;
        let matching = query_as::<_, GradeItemRow>(&format!(
            "SELECT {GRADE_ITEM_COLUMNS} FROM grade_item \
             WHERE courseid = $1 AND itemtype = $2 AND itemmodule = $3 \
             AND iteminstance = $4 AND itemnumber = $5 FOR UPDATE"
        ))
        .bind(update.courseid)
        .bind(&update.itemtype)
        .bind(&update.itemmodule)
        .bind(update.iteminstance)
        .bind(update.itemnumber)
        .fetch_all(&mut *tx)
        .await?;

        let status = match gradebook::resolve_item(&matching, update) {
            ItemAction::Finish(status) => status,
            ItemAction::Delete(id) => {
                query("DELETE FROM grade_item WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                GradeUpdateStatus::Ok
            }
            ItemAction::Write(item) => write_item(&mut tx, item, update).await?,
        };

        if status == GradeUpdateStatus::Ok {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        tracing::debug!(source = %update.source, result = status.code(), "grades persisted");
        Ok(status)
    }
}

/// Upsert the item then merge every raw grade into it. Any status other than
/// `Ok` leaves the transaction to be rolled back by the caller.
async fn write_item(
    tx: &mut Transaction<'_, Postgres>,
    mut item: GradeItemRow,
    update: &GradeUpdate,
) -> StoreResult<GradeUpdateStatus> {
    if item.id == 0 {
        item.id = query_scalar::<_, i64>(
            r#"
            INSERT INTO grade_item (courseid, itemtype, itemmodule, iteminstance, itemnumber,
                itemname, idnumber, gradetype, grademax, grademin, gradepass, scaleid, outcomeid,
                multfactor, plusfactor, locked, hidden)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            RETURNING id
            "#,
        )
        .bind(item.courseid)
        .bind(&item.itemtype)
        .bind(&item.itemmodule)
        .bind(item.iteminstance)
        .bind(item.itemnumber)
        .bind(&item.itemname)
        .bind(item.idnumber)
        .bind(item.gradetype)
        .bind(item.grademax)
        .bind(item.grademin)
        .bind(item.gradepass)
        .bind(item.scaleid)
        .bind(item.outcomeid)
        .bind(item.multfactor)
        .bind(item.plusfactor)
        .bind(item.locked)
        .bind(item.hidden)
        .fetch_one(&mut **tx)
        .await?;
    } else {
        query(
            r#"
            UPDATE grade_item SET itemname = $2, idnumber = $3, gradetype = $4, grademax = $5,
                grademin = $6, scaleid = $7, multfactor = $8, plusfactor = $9, hidden = $10
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(&item.itemname)
        .bind(item.idnumber)
        .bind(item.gradetype)
        .bind(item.grademax)
        .bind(item.grademin)
        .bind(item.scaleid)
        .bind(item.multfactor)
        .bind(item.plusfactor)
        .bind(item.hidden)
        .execute(&mut **tx)
        .await?;
    }

    for raw in update.grades.iter().flatten() {
        let existing = query_as::<_, GradeGradeRow>(&format!(
            "SELECT {GRADE_COLUMNS} FROM grade_grade WHERE itemid = $1 AND userid = $2 FOR UPDATE"
        ))
        .bind(item.id)
        .bind(raw.userid)
        .fetch_optional(&mut **tx)
        .await?;

        let row = match gradebook::merge_grade(
            &item,
            existing.as_ref(),
            raw,
            update.usermodified,
            update.now,
        ) {
            Ok(row) => row,
            Err(status) => {
                tracing::warn!(item = item.id, user = raw.userid, "grade is locked");
                return Ok(status);
            }
        };

        query(
            r#"
            INSERT INTO grade_grade (itemid, userid, rawgrade, finalgrade, feedback, feedbackformat,
                locked, hidden, overridden, usermodified, timecreated, timemodified, source)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            ON CONFLICT (itemid, userid) DO UPDATE SET
                rawgrade = EXCLUDED.rawgrade,
                finalgrade = EXCLUDED.finalgrade,
                feedback = EXCLUDED.feedback,
                feedbackformat = EXCLUDED.feedbackformat,
                usermodified = EXCLUDED.usermodified,
                timemodified = EXCLUDED.timemodified,
                source = EXCLUDED.source
            "#,
        )
        .bind(row.itemid)
        .bind(row.userid)
        .bind(row.rawgrade)
        .bind(row.finalgrade)
        .bind(&row.feedback)
        .bind(row.feedbackformat)
        .bind(row.locked)
        .bind(row.hidden)
        .bind(row.overridden)
        .bind(row.usermodified)
        .bind(row.timecreated)
        .bind(row.timemodified)
        .bind(&update.source)
        .execute(&mut **tx)
        .await?;
    }
    Ok(GradeUpdateStatus::Ok)
}

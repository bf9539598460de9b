use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// The authenticated user a call executes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub fullname: String,
    pub shortname: String,
    pub showgrades: bool,
    pub visible: bool,
}

/// Structural placement of an activity instance inside a course.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct CourseModule {
    pub id: i64,
    pub course: i64,
    pub module: String, // e.g. "forum", "assign"
    pub instance: i64,
    pub visible: bool,
    pub section_visible: bool,
}

/// Minimal projection of any activity table row.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Activity {
    pub id: i64,
    pub course: i64,
    pub name: String,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Forum {
    pub id: i64,
    pub course: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub name: String,
    pub intro: String,
    pub introformat: i32,
    pub assessed: i32,
    pub assesstimestart: i64,
    pub assesstimefinish: i64,
    pub scale: i64,
    pub maxbytes: i64,
    pub maxattachments: i32,
    pub forcesubscribe: i32,
    pub trackingtype: i32,
    pub rsstype: i32,
    pub rssarticles: i32,
    pub timemodified: i64,
    pub warnafter: i32,
    pub blockafter: i32,
    pub blockperiod: i64,
    pub completiondiscussions: i32,
    pub completionreplies: i32,
    pub completionposts: i32,
}

impl Forum {
    pub const TYPE_QANDA: &'static str = "qanda";

    pub fn is_qanda(&self) -> bool {
        self.kind == Self::TYPE_QANDA
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingType {
    Off,
    Optional,
    Forced,
}

impl TrackingType {
    pub fn from_db(v: i32) -> Self {
        match v {
            0 => TrackingType::Off,
            2 => TrackingType::Forced,
            _ => TrackingType::Optional,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ForumSummary {
    #[serde(flatten)]
    pub forum: Forum,
    pub cmid: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Discussion {
    pub id: i64,
    pub course: i64,
    pub forum: i64,
    pub name: String,
    pub firstpost: i64,
    pub userid: i64,
    pub groupid: i64,
    pub assessed: i32,
    pub timemodified: i64,
    pub usermodified: i64,
    pub timestart: i64,
    pub timeend: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub discussion: i64,
    pub parent: i64, // 0 for the discussion's first post
    pub userid: i64,
    pub created: i64,
    pub modified: i64,
    pub mailed: i32,
    pub subject: String,
    pub message: String,
    pub messageformat: i32,
    pub messagetrust: i32,
    pub attachment: String,
    pub totalscore: i32,
    pub mailnow: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub picture: i64,
    pub imagealt: Option<String>,
    pub trackforums: bool,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DiscussionSummary {
    pub id: i64,
    pub course: i64,
    pub forum: i64,
    pub name: String,
    pub userid: i64,
    pub groupid: i64,
    pub assessed: i32,
    pub timemodified: i64,
    pub usermodified: i64,
    pub timestart: i64,
    pub timeend: i64,
    pub firstpost: i64,
    pub firstuserfullname: String,
    pub firstuserimagealt: Option<String>,
    pub firstuserpicture: i64,
    pub firstuseremail: String,
    pub subject: String,
    pub numreplies: i64,
    /// Only present when read tracking applies to this forum and caller.
    pub numunread: Option<i64>,
    pub lastpost: i64,
    pub lastuserid: i64,
    pub lastuserfullname: String,
    pub lastuserimagealt: Option<String>,
    pub lastuserpicture: i64,
    pub lastuseremail: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PostSummary {
    #[serde(flatten)]
    pub post: Post,
    pub userfullname: String,
}

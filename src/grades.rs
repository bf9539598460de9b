//! Grade reads and writes for a single activity.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    error::{Result, ServiceError},
    gradebook::{GradeInfo, GradingInfo, ItemDetails},
    models::{Activity, CourseModule},
    params::{ParamSpec, ParamType},
    store::Store,
};

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeRequest {
    pub courseid: i64,
    pub component: String,
    pub cmid: i64,
    pub userids: Option<Vec<i64>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GetGradesParams {
    pub grades: GradeRequest,
}

pub fn get_grades_spec() -> ParamSpec {
    ParamSpec::single([(
        "grades",
        ParamSpec::single([
            ("courseid", ParamSpec::value(ParamType::Int)),
            ("component", ParamSpec::value(ParamType::Component)),
            ("cmid", ParamSpec::value(ParamType::Int)),
            (
                "userids",
                ParamSpec::multiple(ParamSpec::value(ParamType::Int)).optional(),
            ),
        ]),
    )])
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentGrade {
    pub studentid: i64,
    pub grade: f64,
    pub feedback: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeWrite {
    pub source: String,
    pub courseid: i64,
    pub component: String,
    pub cmid: i64,
    pub itemnumber: i64,
    pub grades: Option<Vec<StudentGrade>>,
    pub itemdetails: Option<ItemDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateGradeParams {
    pub grade: GradeWrite,
}

pub fn update_grade_spec() -> ParamSpec {
    let optional = |ty| ParamSpec::value(ty).optional();
    ParamSpec::single([(
        "grade",
        ParamSpec::single([
            ("source", ParamSpec::value(ParamType::Text)),
            ("courseid", ParamSpec::value(ParamType::Int)),
            ("component", ParamSpec::value(ParamType::Component)),
            ("cmid", ParamSpec::value(ParamType::Int)),
            ("itemnumber", ParamSpec::value(ParamType::Int)),
            (
                "grades",
                ParamSpec::multiple(ParamSpec::single([
                    ("studentid", ParamSpec::value(ParamType::Int)),
                    ("grade", ParamSpec::value(ParamType::Float)),
                    ("feedback", optional(ParamType::Text)),
                ]))
                .optional(),
            ),
            (
                "itemdetails",
                ParamSpec::single([
                    ("itemname", optional(ParamType::AlphaNumExt)),
                    ("idnumber", optional(ParamType::Int)),
                    ("gradetype", optional(ParamType::Int)),
                    ("grademax", optional(ParamType::Float)),
                    ("grademin", optional(ParamType::Float)),
                    ("scaleid", optional(ParamType::Int)),
                    ("multfactor", optional(ParamType::Float)),
                    ("plusfactor", optional(ParamType::Float)),
                    ("deleted", optional(ParamType::Bool)),
                    ("hidden", optional(ParamType::Bool)),
                ])
                .optional(),
            ),
        ]),
    )])
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GradesResponse {
    pub items: Vec<GradeItemView>,
    pub outcomes: Vec<OutcomeView>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GradeItemView {
    pub itemnumber: i64,
    pub scaleid: i64,
    pub name: String,
    pub grademin: f64,
    pub grademax: f64,
    pub gradepass: f64,
    pub locked: bool,
    pub hidden: bool,
    pub grades: Vec<StudentGradeView>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StudentGradeView {
    pub userid: i64,
    pub grade: Option<f64>,
    pub locked: bool,
    pub hidden: bool,
    pub overridden: bool,
    pub feedback: Option<String>,
    pub feedbackformat: i32,
    pub usermodified: Option<i64>,
    pub datesubmitted: Option<i64>,
    pub dategraded: Option<i64>,
    pub str_grade: String,
    pub str_long_grade: String,
    pub str_feedback: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutcomeView {
    pub itemnumber: i64,
    pub scaleid: i64,
    pub name: String,
    pub locked: bool,
    pub hidden: bool,
    pub grades: Vec<OutcomeGradeView>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutcomeGradeView {
    pub userid: i64,
    pub grade: Option<f64>,
    pub locked: bool,
    pub hidden: bool,
    pub feedback: Option<String>,
    pub feedbackformat: i32,
    pub usermodified: Option<i64>,
    pub str_grade: String,
    pub str_feedback: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct UpdateGradeResponse {
    pub result: i32,
}

/// `mod_forum` -> (`mod`, `forum`); a bare name is a core subsystem.
pub fn split_component(component: &str) -> (String, String) {
    match component.split_once('_') {
        Some((kind, name)) => (kind.to_string(), name.to_string()),
        None => ("core".to_string(), component.to_string()),
    }
}

/// Find the course module `cmid` of type `module` and its activity record.
pub async fn resolve_activity(
    store: &dyn Store,
    module: &str,
    cmid: i64,
) -> Result<(CourseModule, Activity)> {
    let cm = store
        .course_module(cmid)
        .await?
        .filter(|cm| cm.module == module)
        .ok_or_else(|| ServiceError::invalid_module(cmid))?;
    let activity = store
        .activity(module, cm.instance)
        .await?
        .ok_or_else(|| ServiceError::invalid_activity(module, cm.instance))?;
    Ok((cm, activity))
}

/// Flatten keyed grades into per-item arrays. Items and outcomes are indexed
/// independently of each other.
pub fn flatten(info: GradingInfo) -> GradesResponse {
    let items = info
        .items
        .into_iter()
        .map(|item| GradeItemView {
            itemnumber: item.itemnumber,
            scaleid: item.scaleid,
            name: item.name,
            grademin: item.grademin,
            grademax: item.grademax,
            gradepass: item.gradepass,
            locked: item.locked,
            hidden: item.hidden,
            grades: item
                .grades
                .into_iter()
                .map(|(userid, g)| student_view(userid, g))
                .collect(),
        })
        .collect();

    let outcomes = info
        .outcomes
        .into_iter()
        .map(|outcome| OutcomeView {
            itemnumber: outcome.itemnumber,
            scaleid: outcome.scaleid,
            name: outcome.name,
            locked: outcome.locked,
            hidden: outcome.hidden,
            grades: outcome
                .grades
                .into_iter()
                .map(|(userid, g)| OutcomeGradeView {
                    userid,
                    grade: g.grade,
                    locked: g.locked,
                    hidden: g.hidden,
                    feedback: g.feedback,
                    feedbackformat: g.feedbackformat,
                    usermodified: g.usermodified,
                    str_grade: g.str_grade,
                    str_feedback: g.str_feedback,
                })
                .collect(),
        })
        .collect();

    GradesResponse { items, outcomes }
}

fn student_view(userid: i64, g: GradeInfo) -> StudentGradeView {
    StudentGradeView {
        userid,
        grade: g.grade,
        locked: g.locked,
        hidden: g.hidden,
        overridden: g.overridden,
        feedback: g.feedback,
        feedbackformat: g.feedbackformat,
        usermodified: g.usermodified,
        datesubmitted: g.datesubmitted,
        dategraded: g.dategraded,
        str_grade: g.str_grade,
        str_long_grade: g.str_long_grade,
        str_feedback: g.str_feedback,
    }
}

//! Gradebook records and the storage-side rules for reading and writing them.
//!
//! Both store backends load rows, hand them to the pure functions here, and
//! persist whatever comes back. That keeps the status-code semantics of a
//! grade write identical regardless of backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub const GRADE_TYPE_VALUE: i32 = 1;
pub const GRADE_TYPE_SCALE: i32 = 2;

pub const FORMAT_HTML: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeUpdateStatus {
    Ok,
    Failed,
    Multiple,
    ItemLocked,
}

impl GradeUpdateStatus {
    pub fn code(self) -> i32 {
        match self {
            GradeUpdateStatus::Ok => 0,
            GradeUpdateStatus::Failed => 1,
            GradeUpdateStatus::Multiple => 2,
            GradeUpdateStatus::ItemLocked => 4,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct GradeItemRow {
    pub id: i64,
    pub courseid: i64,
    pub itemtype: String,
    pub itemmodule: String,
    pub iteminstance: i64,
    pub itemnumber: i64,
    pub itemname: String,
    pub idnumber: Option<i64>,
    pub gradetype: i32,
    pub grademax: f64,
    pub grademin: f64,
    pub gradepass: f64,
    pub scaleid: Option<i64>,
    pub outcomeid: Option<i64>,
    pub multfactor: f64,
    pub plusfactor: f64,
    pub locked: bool,
    pub hidden: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct GradeGradeRow {
    pub id: i64,
    pub itemid: i64,
    pub userid: i64,
    pub rawgrade: Option<f64>,
    pub finalgrade: Option<f64>,
    pub feedback: Option<String>,
    pub feedbackformat: i32,
    pub locked: bool,
    pub hidden: bool,
    pub overridden: bool,
    pub usermodified: Option<i64>,
    pub timecreated: Option<i64>,
    pub timemodified: Option<i64>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct ScaleRow {
    pub id: i64,
    pub scale: String, // comma separated labels, lowest first
}

impl ScaleRow {
    fn labels(&self) -> Vec<&str> {
        self.scale.split(',').map(str::trim).collect()
    }
}

/// Which grade items to read, and for which users.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeQuery {
    pub courseid: i64,
    pub itemtype: String,
    pub itemmodule: String,
    pub iteminstance: i64,
    pub userids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradingInfo {
    pub items: Vec<GradeItemInfo>,
    pub outcomes: Vec<OutcomeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeItemInfo {
    pub itemnumber: i64,
    pub scaleid: i64,
    pub name: String,
    pub grademin: f64,
    pub grademax: f64,
    pub gradepass: f64,
    pub locked: bool,
    pub hidden: bool,
    pub grades: BTreeMap<i64, GradeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeInfo {
    pub itemnumber: i64,
    pub scaleid: i64,
    pub name: String,
    pub locked: bool,
    pub hidden: bool,
    pub grades: BTreeMap<i64, GradeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeInfo {
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

/// Assemble the nested grading view for `query.userids`. Users without a
/// grade row still get an (empty) entry; no users means item info only.
pub fn grading_info(
    query: &GradeQuery,
    items: &[GradeItemRow],
    grades: &[GradeGradeRow],
    scales: &[ScaleRow],
) -> GradingInfo {
    let mut info = GradingInfo::default();
    for item in items {
        let scale = item
            .scaleid
            .and_then(|id| scales.iter().find(|s| s.id == id));
        let user_grades: BTreeMap<i64, GradeInfo> = query
            .userids
            .iter()
            .map(|uid| {
                let row = grades
                    .iter()
                    .find(|g| g.itemid == item.id && g.userid == *uid);
                (*uid, render(item, row, scale))
            })
            .collect();

        if item.outcomeid.is_some() {
            info.outcomes.push(OutcomeInfo {
                itemnumber: item.itemnumber,
                scaleid: item.scaleid.unwrap_or(0),
                name: item.itemname.clone(),
                locked: item.locked,
                hidden: item.hidden,
                grades: user_grades,
            });
        } else {
            info.items.push(GradeItemInfo {
                itemnumber: item.itemnumber,
                scaleid: item.scaleid.unwrap_or(0),
                name: item.itemname.clone(),
                grademin: item.grademin,
                grademax: item.grademax,
                gradepass: item.gradepass,
                locked: item.locked,
                hidden: item.hidden,
                grades: user_grades,
            });
        }
    }
    info
}

fn render(item: &GradeItemRow, row: Option<&GradeGradeRow>, scale: Option<&ScaleRow>) -> GradeInfo {
    let grade = row.and_then(|r| r.finalgrade);
    let (str_grade, str_long_grade) = match grade {
        None => ("-".to_string(), "-".to_string()),
        Some(g) => match (item.gradetype, scale) {
            (GRADE_TYPE_SCALE, Some(scale)) => {
                let labels = scale.labels();
                let idx = (g.round() as usize).clamp(1, labels.len().max(1)) - 1;
                let label = labels.get(idx).copied().unwrap_or("-").to_string();
                let top = labels.last().copied().unwrap_or("-");
                (label.clone(), format!("{} / {}", label, top))
            }
            _ => (format!("{:.2}", g), format!("{:.2} / {:.2}", g, item.grademax)),
        },
    };
    GradeInfo {
        grade,
        locked: item.locked || row.is_some_and(|r| r.locked),
        hidden: item.hidden || row.is_some_and(|r| r.hidden),
        overridden: row.is_some_and(|r| r.overridden),
        feedback: row.and_then(|r| r.feedback.clone()),
        feedbackformat: row.map(|r| r.feedbackformat).unwrap_or(0),
        usermodified: row.and_then(|r| r.usermodified),
        datesubmitted: row.and_then(|r| r.timecreated),
        dategraded: row.and_then(|r| r.timemodified),
        str_grade,
        str_long_grade,
        str_feedback: row
            .and_then(|r| r.feedback.clone())
            .unwrap_or_default(),
    }
}

/// Grade item settings a caller may change. Absent fields stay untouched.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ItemDetails {
    pub itemname: Option<String>,
    pub idnumber: Option<i64>,
    pub gradetype: Option<i32>,
    pub grademax: Option<f64>,
    pub grademin: Option<f64>,
    pub scaleid: Option<i64>,
    pub multfactor: Option<f64>,
    pub plusfactor: Option<f64>,
    pub deleted: Option<bool>,
    pub hidden: Option<bool>,
}

impl ItemDetails {
    /// True when anything other than `hidden` is being changed, or when the
    /// details object is empty.
    pub fn edits_metadata(&self) -> bool {
        let only_hidden = ItemDetails {
            hidden: self.hidden,
            ..ItemDetails::default()
        };
        self.hidden.is_none() || *self != only_hidden
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawGradeUpdate {
    pub userid: i64,
    pub rawgrade: f64,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeUpdate {
    pub source: String,
    pub courseid: i64,
    pub itemtype: String,
    pub itemmodule: String,
    pub iteminstance: i64,
    pub itemnumber: i64,
    pub grades: Option<Vec<RawGradeUpdate>>,
    pub details: Option<ItemDetails>,
    pub usermodified: i64,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemAction {
    /// Nothing to persist; report this status.
    Finish(GradeUpdateStatus),
    Delete(i64),
    /// Upsert the item (id 0 means insert), then apply `grades` if any.
    Write(GradeItemRow),
}

pub fn resolve_item(matching: &[GradeItemRow], update: &GradeUpdate) -> ItemAction {
    let deleting = update
        .details
        .as_ref()
        .and_then(|d| d.deleted)
        .unwrap_or(false);

    let existing = match matching {
        [] => None,
        [one] => Some(one),
        _ => return ItemAction::Finish(GradeUpdateStatus::Multiple),
    };

    match (existing, &update.details) {
        (Some(item), _) if deleting => ItemAction::Delete(item.id),
        (None, _) if deleting => ItemAction::Finish(GradeUpdateStatus::Ok),
        (None, None) => ItemAction::Finish(GradeUpdateStatus::Failed),
        (None, Some(details)) => {
            let mut item = GradeItemRow {
                id: 0,
                courseid: update.courseid,
                itemtype: update.itemtype.clone(),
                itemmodule: update.itemmodule.clone(),
                iteminstance: update.iteminstance,
                itemnumber: update.itemnumber,
                itemname: String::new(),
                idnumber: None,
                gradetype: GRADE_TYPE_VALUE,
                grademax: 100.0,
                grademin: 0.0,
                gradepass: 0.0,
                scaleid: None,
                outcomeid: None,
                multfactor: 1.0,
                plusfactor: 0.0,
                locked: false,
                hidden: false,
            };
            apply_details(&mut item, details);
            ItemAction::Write(item)
        }
        (Some(item), details) => {
            if item.locked && update.grades.is_some() {
                return ItemAction::Finish(GradeUpdateStatus::ItemLocked);
            }
            let mut item = item.clone();
            if let Some(details) = details {
                apply_details(&mut item, details);
            }
            ItemAction::Write(item)
        }
    }
}

fn apply_details(item: &mut GradeItemRow, d: &ItemDetails) {
    if let Some(v) = &d.itemname {
        item.itemname = v.clone();
    }
    if let Some(v) = d.idnumber {
        item.idnumber = Some(v);
    }
    if let Some(v) = d.gradetype {
        item.gradetype = v;
    }
    if let Some(v) = d.grademax {
        item.grademax = v;
    }
    if let Some(v) = d.grademin {
        item.grademin = v;
    }
    if let Some(v) = d.scaleid {
        item.scaleid = Some(v);
    }
    if let Some(v) = d.multfactor {
        item.multfactor = v;
    }
    if let Some(v) = d.plusfactor {
        item.plusfactor = v;
    }
    if let Some(v) = d.hidden {
        item.hidden = v;
    }
}

/// Merge one raw grade into the user's grade row. A locked grade refuses the
/// write; an overridden one keeps its final grade.
pub fn merge_grade(
    item: &GradeItemRow,
    existing: Option<&GradeGradeRow>,
    upd: &RawGradeUpdate,
    usermodified: i64,
    now: i64,
) -> Result<GradeGradeRow, GradeUpdateStatus> {
    let mut row = match existing {
        Some(r) if r.locked => return Err(GradeUpdateStatus::Failed),
        Some(r) => r.clone(),
        None => GradeGradeRow {
            id: 0,
            itemid: item.id,
            userid: upd.userid,
            rawgrade: None,
            finalgrade: None,
            feedback: None,
            feedbackformat: 0,
            locked: false,
            hidden: false,
            overridden: false,
            usermodified: None,
            timecreated: Some(now),
            timemodified: None,
        },
    };

    row.rawgrade = Some(upd.rawgrade);
    if !row.overridden {
        row.finalgrade = Some(final_grade(item, upd.rawgrade));
    }
    if let Some(fb) = &upd.feedback {
        row.feedback = Some(fb.clone());
        row.feedbackformat = FORMAT_HTML;
    }
    row.usermodified = Some(usermodified);
    row.timemodified = Some(now);
    Ok(row)
}

fn final_grade(item: &GradeItemRow, raw: f64) -> f64 {
    let adjusted = raw * item.multfactor + item.plusfactor;
    if item.grademax >= item.grademin {
        adjusted.clamp(item.grademin, item.grademax)
    } else {
        adjusted
    }
}

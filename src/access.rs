//! Per-operation access decisions.
//!
//! Each operation has a small fixed decision tree; they are spelled out as
//! separate branches of [`Policy`] rather than driven by rule data.

use crate::{
    context::{Context, ContextLevel, ContextResolver},
    error::{Result, ServiceError},
    gradebook::ItemDetails,
    models::{Caller, Course, CourseModule},
    store::Store,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewAllGrades,
    ViewOwnGrades,
    ManageGrades,
    HideGrades,
    EditGrades,
    ViewDiscussion,
    ViewQandaWithoutPosting,
    ViewFullNames,
    ViewHiddenActivities,
    ViewCourse,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ViewAllGrades => "moodle/grade:viewall",
            Capability::ViewOwnGrades => "moodle/grade:view",
            Capability::ManageGrades => "moodle/grade:manage",
            Capability::HideGrades => "moodle/grade:hide",
            Capability::EditGrades => "moodle/grade:edit",
            Capability::ViewDiscussion => "mod/forum:viewdiscussion",
            Capability::ViewQandaWithoutPosting => "mod/forum:viewqandawithoutposting",
            Capability::ViewFullNames => "moodle/site:viewfullnames",
            Capability::ViewHiddenActivities => "moodle/course:viewhiddenactivities",
            Capability::ViewCourse => "moodle/course:view",
        }
    }
}

/// The optional parts of a grade write, each gated by its own check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteParts {
    pub item_metadata: bool,
    pub hiding: bool,
    pub grades: bool,
}

impl WriteParts {
    pub fn of<T>(grades: Option<&[T]>, details: Option<&ItemDetails>) -> Self {
        WriteParts {
            item_metadata: details.is_some_and(ItemDetails::edits_metadata),
            hiding: details.is_some_and(|d| d.hidden.is_some()),
            grades: grades.is_some(),
        }
    }
}

pub enum Policy<'a> {
    /// Reading grades of an activity in `course` for the requested users.
    ViewGrades {
        course: &'a Course,
        requested: Option<&'a [i64]>,
    },
    UpdateGrades(WriteParts),
    /// Reading anything inside a forum module. Evaluated in the module context.
    ReadForum { module: &'a CourseModule },
    /// Reading a Q&A discussion; `posted` is whether the caller has replied.
    ReadQandaDiscussion { posted: bool },
}

pub struct AccessEngine<'a> {
    store: &'a dyn Store,
    caller: &'a Caller,
}

impl<'a> AccessEngine<'a> {
    pub fn new(store: &'a dyn Store, caller: &'a Caller) -> Self {
        AccessEngine { store, caller }
    }

    pub async fn has(&self, capability: Capability, ctx: &Context) -> Result<bool> {
        Ok(self
            .store
            .has_capability(self.caller.user_id, capability, ctx)
            .await?)
    }

    async fn require(&self, capability: Capability, ctx: &Context) -> Result<()> {
        if self.has(capability, ctx).await? {
            Ok(())
        } else {
            Err(self.deny("nopermissions", capability.as_str()))
        }
    }

    fn deny(&self, errorcode: &'static str, what: &str) -> ServiceError {
        tracing::warn!(user = self.caller.user_id, errorcode, what, "access denied");
        ServiceError::denied(errorcode, what)
    }

    /// Allow or deny `policy` in `ctx`. Denial is always an error.
    pub async fn decide(&self, policy: Policy<'_>, ctx: &Context) -> Result<()> {
        match policy {
            Policy::ViewGrades { course, requested } => {
                if self.has(Capability::ViewAllGrades, ctx).await? {
                    return Ok(());
                }
                let target = match requested {
                    Some([only]) if course.showgrades => *only,
                    _ => return Err(self.deny("nopermissiontoviewgrades", "grades")),
                };
                if target == self.caller.user_id && self.has(Capability::ViewOwnGrades, ctx).await? {
                    return Ok(());
                }
                // Delegated access, e.g. a parent granted viewall on the child's user context.
                let resolver = ContextResolver::new(self.store);
                let user_ctx = match resolver
                    .resolve_valid(ContextLevel::User, target, self.caller)
                    .await
                {
                    Ok(ctx) => Some(ctx),
                    Err(ServiceError::Context { .. }) => None,
                    Err(e) => return Err(e),
                };
                if let Some(user_ctx) = user_ctx {
                    if self.has(Capability::ViewAllGrades, &user_ctx).await? {
                        return Ok(());
                    }
                }
                Err(self.deny("nopermissiontoviewgrades", "grades"))
            }
            Policy::UpdateGrades(parts) => {
                if parts.item_metadata && !self.has(Capability::ManageGrades, ctx).await? {
                    return Err(self.deny("nopermissiontoeditgrades", Capability::ManageGrades.as_str()));
                }
                if parts.hiding
                    && !self.has(Capability::HideGrades, ctx).await?
                    && !self.has(Capability::ManageGrades, ctx).await?
                {
                    return Err(self.deny("nopermissiontoeditgrades", Capability::HideGrades.as_str()));
                }
                if parts.grades && !self.has(Capability::EditGrades, ctx).await? {
                    return Err(self.deny("nopermissiontoeditgrades", Capability::EditGrades.as_str()));
                }
                Ok(())
            }
            Policy::ReadForum { module } => {
                let visible = (module.visible && module.section_visible)
                    || self.has(Capability::ViewHiddenActivities, ctx).await?;
                if !visible {
                    return Err(self.deny("nopermissiontoshow", "module is hidden"));
                }
                self.require(Capability::ViewDiscussion, ctx).await
            }
            Policy::ReadQandaDiscussion { posted } => {
                if posted {
                    Ok(())
                } else {
                    self.require(Capability::ViewQandaWithoutPosting, ctx).await
                }
            }
        }
    }
}

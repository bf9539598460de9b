use crate::{
    access::Capability,
    error::{Result, ServiceError},
    models::Caller,
    store::Store,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextLevel {
    User,
    Course,
    Module,
}

impl ContextLevel {
    pub fn code(self) -> i32 {
        match self {
            ContextLevel::User => 30,
            ContextLevel::Course => 50,
            ContextLevel::Module => 70,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContextLevel::User => "user",
            ContextLevel::Course => "course",
            ContextLevel::Module => "module",
        }
    }
}

/// A resolved scope for capability checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub id: i64,
    pub level: ContextLevel,
    pub instance_id: i64,
    /// `/1/3/17`: ids from the system context down to this one.
    pub path: String,
    pub deleted: bool,
}

impl Context {
    /// Context ids this one inherits capabilities from, itself included.
    pub fn lineage(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .path
            .split('/')
            .filter_map(|s| s.parse().ok())
            .collect();
        if !ids.contains(&self.id) {
            ids.push(self.id);
        }
        ids
    }
}

pub struct ContextResolver<'a> {
    store: &'a dyn Store,
}

impl<'a> ContextResolver<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        ContextResolver { store }
    }

    /// Look up the context for a scope instance.
    pub async fn resolve(&self, level: ContextLevel, instance: i64) -> Result<Context> {
        self.store
            .context(level, instance)
            .await?
            .ok_or_else(|| ServiceError::Context {
                scope: level.name(),
                id: instance,
                reason: "no such context".into(),
            })
    }

    /// Check that a resolved context is live and that the caller may operate
    /// in it. Course and module contexts require an enrolment or the
    /// course-view capability.
    pub async fn validate(&self, ctx: &Context, caller: &Caller) -> Result<()> {
        let invalid = |reason: &str| ServiceError::Context {
            scope: ctx.level.name(),
            id: ctx.instance_id,
            reason: reason.to_string(),
        };
        if ctx.deleted {
            return Err(invalid("context has been deleted"));
        }
        let course_id = match ctx.level {
            ContextLevel::Course => ctx.instance_id,
            ContextLevel::Module => {
                self.store
                    .course_module(ctx.instance_id)
                    .await?
                    .ok_or_else(|| invalid("course module no longer exists"))?
                    .course
            }
            ContextLevel::User => return Ok(()),
        };
        let course = self
            .store
            .course(course_id)
            .await?
            .ok_or_else(|| invalid("course no longer exists"))?;

        if course.visible && self.store.is_enrolled(caller.user_id, course.id).await? {
            return Ok(());
        }
        if self
            .store
            .has_capability(caller.user_id, Capability::ViewCourse, ctx)
            .await?
        {
            return Ok(());
        }
        Err(invalid("caller cannot access this course"))
    }

    /// `resolve` followed by `validate`.
    pub async fn resolve_valid(
        &self,
        level: ContextLevel,
        instance: i64,
        caller: &Caller,
    ) -> Result<Context> {
        let ctx = self.resolve(level, instance).await?;
        self.validate(&ctx, caller).await?;
        Ok(ctx)
    }
}

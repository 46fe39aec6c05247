//! Lifecycle hooks
//!
//! Hooks run around every write. A hook answers [`HookOutcome::Continue`]
//! or [`HookOutcome::Abort`]; an abort turns into a `BadRequest` naming the
//! hook that refused.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Verdict of a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Abort(String),
}

impl From<bool> for HookOutcome {
    fn from(proceed: bool) -> Self {
        if proceed {
            HookOutcome::Continue
        } else {
            HookOutcome::Abort("hook returned false".into())
        }
    }
}

impl From<()> for HookOutcome {
    fn from(_: ()) -> Self {
        HookOutcome::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    BeforeSave,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookStage {
    pub fn name(&self) -> &'static str {
        match self {
            HookStage::BeforeSave => "before_save",
            HookStage::AfterSave => "after_save",
            HookStage::BeforeUpdate => "before_update",
            HookStage::AfterUpdate => "after_update",
            HookStage::BeforeDelete => "before_delete",
            HookStage::AfterDelete => "after_delete",
        }
    }
}

/// What a hook gets to see
#[derive(Debug)]
pub struct HookContext<'a> {
    pub stage: HookStage,
    /// The caller's query object
    pub query: &'a Map<String, Value>,
    /// The record being written; absent for deletes
    pub data: Option<&'a Map<String, Value>>,
    /// `$`-keys of the query under snake_case names
    pub options: &'a Map<String, Value>,
    pub id: Option<&'a Value>,
}

pub type Hook = Arc<dyn Fn(&HookContext<'_>) -> HookOutcome + Send + Sync>;

/// Hooks attached to a schema
#[derive(Clone, Default)]
pub struct Hooks {
    before_save: Option<Hook>,
    after_save: Option<Hook>,
    before_update: Option<Hook>,
    after_update: Option<Hook>,
    before_delete: Option<Hook>,
    after_delete: Option<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached: Vec<&str> = [
            (HookStage::BeforeSave, &self.before_save),
            (HookStage::AfterSave, &self.after_save),
            (HookStage::BeforeUpdate, &self.before_update),
            (HookStage::AfterUpdate, &self.after_update),
            (HookStage::BeforeDelete, &self.before_delete),
            (HookStage::AfterDelete, &self.after_delete),
        ]
        .into_iter()
        .filter(|(_, hook)| hook.is_some())
        .map(|(stage, _)| stage.name())
        .collect();
        f.debug_tuple("Hooks").field(&attached).finish()
    }
}

impl Hooks {
    pub fn on<F, R>(mut self, stage: HookStage, hook: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> R + Send + Sync + 'static,
        R: Into<HookOutcome>,
    {
        let hook: Hook = Arc::new(move |ctx: &HookContext<'_>| -> HookOutcome { hook(ctx).into() });
        *self.slot(stage) = Some(hook);
        self
    }

    fn slot(&mut self, stage: HookStage) -> &mut Option<Hook> {
        match stage {
            HookStage::BeforeSave => &mut self.before_save,
            HookStage::AfterSave => &mut self.after_save,
            HookStage::BeforeUpdate => &mut self.before_update,
            HookStage::AfterUpdate => &mut self.after_update,
            HookStage::BeforeDelete => &mut self.before_delete,
            HookStage::AfterDelete => &mut self.after_delete,
        }
    }

    fn get(&self, stage: HookStage) -> Option<&Hook> {
        match stage {
            HookStage::BeforeSave => self.before_save.as_ref(),
            HookStage::AfterSave => self.after_save.as_ref(),
            HookStage::BeforeUpdate => self.before_update.as_ref(),
            HookStage::AfterUpdate => self.after_update.as_ref(),
            HookStage::BeforeDelete => self.before_delete.as_ref(),
            HookStage::AfterDelete => self.after_delete.as_ref(),
        }
    }

    /// Run the hook for `ctx.stage`, if any
    pub(crate) fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        let Some(hook) = self.get(ctx.stage) else {
            return Ok(());
        };

        match hook(ctx) {
            HookOutcome::Continue => Ok(()),
            HookOutcome::Abort(reason) => {
                tracing::debug!(hook = ctx.stage.name(), %reason, "lifecycle hook aborted");
                Err(Error::BadRequest(format!(
                    "Error in {} lifecycle function",
                    ctx.stage.name()
                )))
            }
        }
    }
}

/// Expose the `$`-keys of a query to hooks: `$ifNotExists` becomes
/// `if_not_exists`, `$ttl` becomes `ttl`.
pub fn hook_options(query: &Map<String, Value>) -> Map<String, Value> {
    query
        .iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(cqlq::OPERATOR_MARKER)?;
            let mut snake = String::with_capacity(name.len() + 4);
            for c in name.chars() {
                if c.is_ascii_uppercase() {
                    snake.push('_');
                    snake.push(c.to_ascii_lowercase());
                } else {
                    snake.push(c);
                }
            }
            Some((snake, value.clone()))
        })
        .collect()
}

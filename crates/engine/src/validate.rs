//! Workflow validation: run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. The workflow has a name and at least one action.
//! 2. Action IDs are unique across the whole workflow, nested actions included.
//! 3. Output bindings are unique and never use a reserved name.
//! 4. A `{{ ref }}` in params names `trigger`, a loop variable (inside a loop
//!    body), or a binding produced by an *earlier* action.
//! 5. A gate never reads a binding produced at or after the gated action.
//!    Bare gate fields fall back to the trigger payload only when no action
//!    declares that name; write `trigger.<field>` to read a payload field
//!    that shares its name with an output binding.
//! 6. Each kind carries what it needs: a target service, a loop sequence and
//!    body within the iteration limit, a conditional's gate.
//! 7. The trigger is well formed (cron expressions parse, paths/names non-empty).

use std::collections::HashSet;

use serde_json::Value;

use crate::bindings::{
    collect_refs, root_segment, template_refs, INDEX_BINDING, ITEM_BINDING, RESERVED_BINDINGS,
    TRIGGER_BINDING,
};
use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::models::{Action, ActionKind, Trigger, Workflow};
use crate::schedule::CronSchedule;

/// Validate the workflow definition.
///
/// # Errors
/// The first [`ValidationError`] found, in declaration order.
pub fn validate_workflow(workflow: &Workflow, config: &EngineConfig) -> Result<(), ValidationError> {
    if workflow.name.trim().is_empty() {
        return Err(ValidationError::Malformed("workflow name must not be empty".into()));
    }

    validate_trigger(&workflow.trigger)?;

    if workflow.actions.is_empty() {
        return Err(ValidationError::EmptyWorkflow);
    }

    let mut walker = Walker {
        config,
        ids: HashSet::new(),
        declared: HashSet::new(),
        all_bindings: declared_bindings(&workflow.actions),
    };
    let mut visible = HashSet::new();
    walker.validate_actions(&workflow.actions, &mut visible, false)
}

fn validate_trigger(trigger: &Trigger) -> Result<(), ValidationError> {
    match trigger {
        Trigger::Schedule { expression } => CronSchedule::parse(expression).map(|_| ()),
        Trigger::Webhook { path } if path.trim().trim_matches('/').is_empty() => Err(
            ValidationError::InvalidTrigger("webhook path must not be empty".into()),
        ),
        Trigger::Event { name } if name.trim().is_empty() => Err(
            ValidationError::InvalidTrigger("event name must not be empty".into()),
        ),
        _ => Ok(()),
    }
}

/// Every output binding declared anywhere in `actions`, nested ones included.
pub(crate) fn declared_bindings(actions: &[Action]) -> HashSet<&str> {
    let mut out = HashSet::new();
    collect_bindings(actions, &mut out);
    out
}

fn collect_bindings<'a>(actions: &'a [Action], out: &mut HashSet<&'a str>) {
    for action in actions {
        if let Some(name) = &action.output_binding {
            out.insert(name.as_str());
        }
        collect_bindings(&action.body, out);
        collect_bindings(&action.then, out);
        collect_bindings(&action.otherwise, out);
    }
}

/// The iteration ceiling for a loop: its own `max_iterations` param, or the
/// engine-wide limit.
pub(crate) fn loop_limit(action: &Action, config: &EngineConfig) -> Result<usize, ValidationError> {
    let Some(raw) = action.params.get("max_iterations") else {
        return Ok(config.max_loop_iterations);
    };

    let declared = raw.as_u64().filter(|n| *n > 0).ok_or_else(|| ValidationError::InvalidAction {
        action_id: action.id.clone(),
        message: "max_iterations must be a positive integer".into(),
    })? as usize;

    if declared > config.max_loop_iterations {
        return Err(ValidationError::LoopLimitExceeded {
            action_id: action.id.clone(),
            declared,
            limit: config.max_loop_iterations,
        });
    }
    Ok(declared)
}

/// Binding path named by a loop's `items` string, with or without braces.
pub(crate) fn loop_items_path(raw: &str) -> &str {
    match template_refs(raw).as_slice() {
        [only] if raw[..only.start].trim().is_empty() && raw[only.end..].trim().is_empty() => only.path,
        _ => raw.trim(),
    }
}

struct Walker<'a> {
    config: &'a EngineConfig,
    ids: HashSet<&'a str>,
    declared: HashSet<&'a str>,
    all_bindings: HashSet<&'a str>,
}

impl<'a> Walker<'a> {
    fn validate_actions(
        &mut self,
        actions: &'a [Action],
        visible: &mut HashSet<&'a str>,
        in_loop: bool,
    ) -> Result<(), ValidationError> {
        for action in actions {
            self.validate_action(action, visible, in_loop)?;
        }
        Ok(())
    }

    fn validate_action(
        &mut self,
        action: &'a Action,
        visible: &mut HashSet<&'a str>,
        in_loop: bool,
    ) -> Result<(), ValidationError> {
        let id = action.id.as_str();
        if id.trim().is_empty() {
            return Err(invalid(id, "action id must not be empty"));
        }
        if !self.ids.insert(id) {
            return Err(ValidationError::DuplicateActionId(id.to_owned()));
        }
        if action.timeout_ms == Some(0) {
            return Err(invalid(id, "timeout_ms must be greater than zero"));
        }

        if let Some(gate) = &action.gate {
            for field in gate.fields() {
                self.check_gate_root(id, root_segment(field), visible, in_loop)?;
            }
        }

        let mut refs = Vec::new();
        for value in action.params.values() {
            collect_refs(value, &mut refs);
        }
        for r in &refs {
            self.check_ref_root(id, r.root(), visible, in_loop)?;
        }

        match action.kind {
            ActionKind::Loop => self.validate_loop(action, visible)?,
            ActionKind::Conditional => self.validate_conditional(action, visible, in_loop)?,
            _ => {
                if action.target_service.as_deref().map_or(true, |s| s.trim().is_empty()) {
                    return Err(invalid(id, "target_service is required"));
                }
                if !action.body.is_empty() || !action.then.is_empty() || !action.otherwise.is_empty() {
                    return Err(invalid(id, "only loop and conditional actions may contain sub-actions"));
                }
            }
        }

        if let Some(name) = action.output_binding.as_deref() {
            if name.trim().is_empty() {
                return Err(invalid(id, "output_binding must not be empty"));
            }
            if RESERVED_BINDINGS.contains(&name) {
                return Err(ValidationError::ReservedBinding {
                    action_id: id.to_owned(),
                    binding: name.to_owned(),
                });
            }
            if !self.declared.insert(name) {
                return Err(ValidationError::DuplicateBinding(name.to_owned()));
            }
            visible.insert(name);
        }

        Ok(())
    }

    fn validate_loop(
        &mut self,
        action: &'a Action,
        visible: &HashSet<&'a str>,
    ) -> Result<(), ValidationError> {
        let id = action.id.as_str();
        if !action.then.is_empty() || !action.otherwise.is_empty() {
            return Err(invalid(id, "a loop uses 'body', not 'then'/'else'"));
        }
        if action.body.is_empty() {
            return Err(invalid(id, "a loop needs at least one body action"));
        }

        let limit = loop_limit(action, self.config)?;
        match action.params.get("items") {
            Some(Value::String(raw)) => {
                let refs = template_refs(raw);
                let path = loop_items_path(raw);
                if !refs.is_empty() && refs.iter().all(|r| r.path != path) {
                    return Err(invalid(
                        id,
                        "loop 'items' must be a single binding reference, not interpolated text",
                    ));
                }
                // Braced references were already checked with the other params.
                if refs.is_empty() {
                    self.check_ref_root(id, root_segment(path), visible, false)?;
                }
            }
            Some(Value::Array(items)) if items.len() > limit => {
                return Err(ValidationError::LoopLimitExceeded {
                    action_id: id.to_owned(),
                    declared: items.len(),
                    limit,
                });
            }
            Some(Value::Array(_)) => {}
            _ => {
                return Err(invalid(
                    id,
                    "a loop needs an 'items' param naming a sequence binding or holding a literal array",
                ))
            }
        }

        let mut scope = visible.clone();
        self.validate_actions(&action.body, &mut scope, true)
    }

    fn validate_conditional(
        &mut self,
        action: &'a Action,
        visible: &mut HashSet<&'a str>,
        in_loop: bool,
    ) -> Result<(), ValidationError> {
        let id = action.id.as_str();
        if action.gate.is_none() {
            return Err(invalid(id, "a conditional needs a gate"));
        }
        if !action.body.is_empty() {
            return Err(invalid(id, "a conditional uses 'then'/'else', not 'body'"));
        }

        let mut then_scope = visible.clone();
        self.validate_actions(&action.then, &mut then_scope, in_loop)?;
        let mut else_scope = visible.clone();
        self.validate_actions(&action.otherwise, &mut else_scope, in_loop)?;

        // Branch bindings stay visible afterwards; at run time the untaken
        // branch's bindings are simply undefined.
        visible.extend(then_scope);
        visible.extend(else_scope);
        Ok(())
    }

    fn check_ref_root(
        &self,
        action_id: &str,
        root: &str,
        visible: &HashSet<&'a str>,
        in_loop: bool,
    ) -> Result<(), ValidationError> {
        let ok = root == TRIGGER_BINDING
            || (in_loop && (root == ITEM_BINDING || root == INDEX_BINDING))
            || visible.contains(root);
        if ok {
            Ok(())
        } else {
            Err(undefined(action_id, root))
        }
    }

    /// Gates may read trigger payload fields directly, so only roots that name
    /// a binding (or loop variable) are checked. A root that any action binds
    /// always means that binding, never the payload field of the same name.
    fn check_gate_root(
        &self,
        action_id: &str,
        root: &str,
        visible: &HashSet<&'a str>,
        in_loop: bool,
    ) -> Result<(), ValidationError> {
        let loop_var = root == ITEM_BINDING || root == INDEX_BINDING;
        if (loop_var && !in_loop) || (self.all_bindings.contains(root) && !visible.contains(root)) {
            return Err(undefined(action_id, root));
        }
        Ok(())
    }
}

fn invalid(action_id: &str, message: &str) -> ValidationError {
    ValidationError::InvalidAction {
        action_id: action_id.to_owned(),
        message: message.to_owned(),
    }
}

fn undefined(action_id: &str, binding: &str) -> ValidationError {
    ValidationError::UndefinedBinding {
        action_id: action_id.to_owned(),
        binding: binding.to_owned(),
    }
}

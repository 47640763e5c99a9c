//! Fetch, plan, mutate, report.

use super::{plan, prune_nulls, Action, Delta, ResourceDefinition, UpdateMethod};
use crate::azure::{ArmClient, ArmClientExt, AzureError, PollSettings};
use crate::modules::common::poll_settings;
use crate::modules::{Diff, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::retry::{wait_until, RetryError};
use serde_json::Value;
use tracing::{debug, info};

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub action: Action,
    pub changed: bool,
    /// Normalized final state, `None` once deleted or when absent
    pub state: Option<Value>,
    pub delta: Delta,
    pub diff: Option<Diff>,
    /// `{kind} '{name}'`, for messages
    pub label: String,
    /// Nothing was sent; `state` is a prediction
    pub check_mode: bool,
}

impl Outcome {
    /// Module output with the state under `key`.
    pub fn into_output(self, key: &str) -> ModuleOutput {
        let object = lowercase_first(&self.label);
        let msg = match (self.action, self.check_mode) {
            (Action::NoOp, _) => format!("{} is in the desired state", self.label),
            (Action::Create, false) => format!("Created {}", object),
            (Action::Create, true) => format!("Would create {}", object),
            (Action::Update, check) => format!(
                "{} {} ({})",
                if check { "Would update" } else { "Updated" },
                object,
                self.delta.paths().join(", ")
            ),
            (Action::Delete, false) => format!("Deleted {}", object),
            (Action::Delete, true) => format!("Would delete {}", object),
        };

        let output = if self.changed {
            ModuleOutput::changed(msg)
        } else {
            ModuleOutput::ok(msg)
        };
        let output = output.with_data(key, self.state.unwrap_or(Value::Null));
        match self.diff {
            Some(diff) => output.with_diff(diff),
            None => output,
        }
    }
}

/// Drives one reconciliation cycle against a client.
pub struct Reconciler<'a> {
    client: &'a dyn ArmClient,
    check_mode: bool,
    diff_mode: bool,
    poll: PollSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a dyn ArmClient, context: &ModuleContext) -> Self {
        Self {
            client,
            check_mode: context.check_mode,
            diff_mode: context.diff_mode,
            poll: poll_settings(&context.config),
        }
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub async fn run<D: ResourceDefinition + ?Sized>(&self, definition: &D) -> ModuleResult<Outcome> {
        let id = definition
            .resource_id(&self.client.subscription_id())
            .to_string();
        let api_version = definition.api_version();
        let label = format!("{} '{}'", definition.kind(), definition.name());
        let resource = lowercase_first(&label);

        let current_raw = self
            .client
            .get_resource(&id, api_version)
            .await
            .map_err(|e| ModuleError::provider("read", &resource, e))?;
        let current = current_raw.as_ref().map(|raw| definition.normalize(raw));

        let plan = plan(definition, current.as_ref())?;
        debug!(resource = %id, action = %plan.action, changes = ?plan.delta.paths(), "Planned");

        let state = match plan.action {
            Action::NoOp => current.clone(),
            Action::Create | Action::Update => {
                if plan.action == Action::Create {
                    definition.validate_create()?;
                }
                let target = plan.target.clone().unwrap_or(Value::Null);
                let body = prune_nulls(&definition.to_body(&target, current_raw.as_ref()));
                let predicted = self.predict(definition, &id, &body, current_raw.as_ref());

                if self.check_mode {
                    Some(predicted)
                } else {
                    let response = self
                        .write(definition, &id, body, plan.action)
                        .await
                        .map_err(|e| ModuleError::provider(plan.action.to_string(), &resource, e))?;
                    info!(resource = %id, action = %plan.action, "Applied");
                    if response.is_null() {
                        Some(predicted)
                    } else {
                        Some(definition.normalize(&response))
                    }
                }
            }
            Action::Delete => {
                definition.before_delete(self.client, &id).await?;
                if !self.check_mode {
                    self.client
                        .delete(&id, api_version)
                        .await
                        .map_err(|e| ModuleError::provider("delete", &resource, e))?;
                    info!(resource = %id, "Deleted");
                    if definition.wait_for_absence() {
                        self.wait_for_absence(&id, api_version, &resource).await?;
                    }
                }
                None
            }
        };

        let diff = self
            .diff_mode
            .then(|| render_diff(current.as_ref(), state.as_ref()));

        Ok(Outcome {
            action: plan.action,
            changed: plan.action.changes_anything(),
            state,
            delta: plan.delta,
            diff,
            label,
            check_mode: self.check_mode,
        })
    }

    async fn write<D: ResourceDefinition + ?Sized>(
        &self,
        definition: &D,
        id: &str,
        body: Value,
        action: Action,
    ) -> Result<Value, AzureError> {
        let api_version = definition.api_version();
        match (action, definition.update_method()) {
            (Action::Update, UpdateMethod::Patch) => {
                self.client.patch(id, api_version, body).await
            }
            _ => self.client.put(id, api_version, body).await,
        }
    }

    /// What the resource should look like after the write, without asking ARM.
    fn predict<D: ResourceDefinition + ?Sized>(
        &self,
        definition: &D,
        id: &str,
        body: &Value,
        current_raw: Option<&Value>,
    ) -> Value {
        let base = current_raw.cloned().unwrap_or_else(|| serde_json::json!({}));
        let mut raw = super::overlay(&base, body);
        if let Value::Object(map) = &mut raw {
            map.entry("id").or_insert_with(|| Value::from(id));
            map.entry("name")
                .or_insert_with(|| Value::from(definition.name()));
            // Tags are replaced wholesale, not merged.
            if let Some(tags @ Value::Object(_)) = body.get("tags") {
                map.insert("tags".into(), tags.clone());
            }
        }
        prune_nulls(&definition.normalize(&raw))
    }

    async fn wait_for_absence(&self, id: &str, api_version: &str, resource: &str) -> ModuleResult<()> {
        debug!(resource = %id, "Waiting for deletion to propagate");
        wait_until(
            self.poll.interval,
            self.poll.timeout,
            || self.client.get_resource(id, api_version),
            Option::is_none,
        )
        .await
        .map(|_| ())
        .map_err(|e| match e {
            RetryError::Aborted(source) => ModuleError::provider("confirm deletion of", resource, source),
            other => ModuleError::ExecutionFailed(format!(
                "Timed out waiting for {} to disappear: {}",
                resource, other
            )),
        })
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_diff(before: Option<&Value>, after: Option<&Value>) -> Diff {
    let pretty = |v: Option<&Value>| match v {
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_default() + "\n",
        None => String::new(),
    };
    let before = pretty(before);
    let after = pretty(after);
    let details = similar::TextDiff::from_lines(&before, &after)
        .unified_diff()
        .header("before", "after")
        .to_string();
    Diff::new(before, after).with_details(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_diff_marks_changed_lines() {
        let diff = render_diff(Some(&json!({"quota": 100})), Some(&json!({"quota": 200})));
        let details = diff.details.unwrap();
        assert!(details.contains("-  \"quota\": 100"));
        assert!(details.contains("+  \"quota\": 200"));
    }

    #[test]
    fn test_render_diff_for_delete() {
        let diff = render_diff(Some(&json!({"name": "x"})), None);
        assert_eq!(diff.after, "");
        assert!(diff.before.contains("\"name\""));
    }

    #[test]
    fn test_outcome_messages() {
        let outcome = Outcome {
            action: Action::NoOp,
            changed: false,
            state: Some(json!({"name": "rg"})),
            delta: Delta::default(),
            diff: None,
            label: "Resource group 'rg'".into(),
            check_mode: false,
        };
        let output = outcome.into_output("state");
        assert!(!output.changed);
        assert_eq!(output.msg, "Resource group 'rg' is in the desired state");
        assert_eq!(output.data["state"], json!({"name": "rg"}));
    }

    #[test]
    fn test_check_mode_message() {
        let outcome = Outcome {
            action: Action::Create,
            changed: true,
            state: Some(json!({"name": "rg"})),
            delta: Delta::default(),
            diff: None,
            label: "Resource group 'rg'".into(),
            check_mode: true,
        };
        let output = outcome.into_output("state");
        assert!(output.changed);
        assert_eq!(output.msg, "Would create resource group 'rg'");
    }
}

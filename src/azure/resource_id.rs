//! Azure resource identifiers and URL templates.
//!
//! ARM addresses every resource by a path of the form
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{child_type}/{child_name}]...
//! ```
//!
//! [`ResourceId`] builds and parses these paths. [`expand_template`] fills the
//! `{{ placeholder }}` form used by URL templates handed to the generic REST module.

use super::error::{AzureError, AzureResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

/// One `{type}/{name}` pair below a provider namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Provider namespace that introduces this segment, when it switches namespace
    pub namespace: Option<String>,
    /// Resource type (e.g. `virtualNetworks`)
    pub kind: String,
    /// Resource name
    pub name: String,
}

/// A parsed ARM resource identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    subscription: String,
    resource_group: Option<String>,
    namespace: Option<String>,
    segments: Vec<Segment>,
}

impl ResourceId {
    /// Identifier of a subscription.
    pub fn subscription(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            resource_group: None,
            namespace: None,
            segments: Vec::new(),
        }
    }

    /// Identifier of a resource group.
    pub fn resource_group(subscription: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: Some(name.into()),
            ..Self::subscription(subscription)
        }
    }

    /// Identifier of a top-level resource inside a resource group.
    pub fn new(
        subscription: impl Into<String>,
        resource_group: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription: subscription.into(),
            resource_group: Some(resource_group.into()),
            namespace: Some(namespace.into()),
            segments: vec![Segment {
                namespace: None,
                kind: kind.into(),
                name: name.into(),
            }],
        }
    }

    /// Identifier of a child resource of this one.
    pub fn child(&self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let mut id = self.clone();
        id.segments.push(Segment {
            namespace: None,
            kind: kind.into(),
            name: name.into(),
        });
        id
    }

    /// Parse an identifier such as `/subscriptions/x/resourceGroups/y/providers/A.B/t/n`.
    pub fn parse(id: &str) -> AzureResult<Self> {
        let invalid = || AzureError::InvalidResourceId(id.to_string());
        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();

        let mut iter = parts.into_iter().peekable();
        match iter.next() {
            Some(p) if p.eq_ignore_ascii_case("subscriptions") => {}
            _ => return Err(invalid()),
        }
        let subscription = iter.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let mut result = Self::subscription(subscription);

        if let Some(p) = iter.peek() {
            if p.eq_ignore_ascii_case("resourcegroups") {
                iter.next();
                let rg = iter.next().ok_or_else(invalid)?;
                result.resource_group = Some(rg.to_string());
            }
        }

        let mut pending_namespace: Option<String> = None;
        while let Some(part) = iter.next() {
            if part.eq_ignore_ascii_case("providers") {
                let ns = iter.next().ok_or_else(invalid)?.to_string();
                if result.namespace.is_none() {
                    result.namespace = Some(ns);
                } else {
                    pending_namespace = Some(ns);
                }
                continue;
            }
            if result.namespace.is_none() {
                return Err(invalid());
            }
            let name = iter.next().ok_or_else(invalid)?;
            result.segments.push(Segment {
                namespace: pending_namespace.take(),
                kind: part.to_string(),
                name: name.to_string(),
            });
        }

        if result.namespace.is_some() && result.segments.is_empty() {
            return Err(invalid());
        }
        Ok(result)
    }

    /// Subscription this resource lives in.
    pub fn subscription_id(&self) -> &str {
        &self.subscription
    }

    /// Resource group name, if the identifier is scoped to one.
    pub fn resource_group_name(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    /// Provider namespace of the top-level resource.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Name of the innermost resource (or group / subscription).
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|s| s.name.as_str())
            .or(self.resource_group.as_deref())
            .unwrap_or(&self.subscription)
    }

    /// Type segments from outermost to innermost.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/subscriptions/{}", self.subscription)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{}", rg)?;
        }
        if let Some(ns) = &self.namespace {
            write!(f, "/providers/{}", ns)?;
        }
        for segment in &self.segments {
            if let Some(ns) = &segment.namespace {
                write!(f, "/providers/{}", ns)?;
            }
            write!(f, "/{}/{}", segment.kind, segment.name)?;
        }
        Ok(())
    }
}

/// Replace every `{{ name }}` placeholder in `template` with its value.
///
/// Unknown placeholders are an error so a typo never reaches ARM as a literal path.
pub fn expand_template(template: &str, vars: &HashMap<&str, String>) -> AzureResult<String> {
    let mut missing = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(AzureError::InvalidResourceId(format!(
            "{} (no value for placeholder '{}')",
            template, key
        ))),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_top_level() {
        let id = ResourceId::new("sub", "rg", "Microsoft.Network", "virtualNetworks", "vnet1");
        assert_eq!(
            id.to_string(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1"
        );
        assert_eq!(id.name(), "vnet1");
    }

    #[test]
    fn test_build_child() {
        let id = ResourceId::new("sub", "rg", "Microsoft.Storage", "storageAccounts", "acct")
            .child("fileServices", "default")
            .child("shares", "data");
        assert_eq!(
            id.to_string(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct/fileServices/default/shares/data"
        );
        assert_eq!(id.name(), "data");
    }

    #[test]
    fn test_resource_group_id() {
        let id = ResourceId::resource_group("sub", "my-rg");
        assert_eq!(id.to_string(), "/subscriptions/sub/resourceGroups/my-rg");
        assert_eq!(id.name(), "my-rg");
    }

    #[test]
    fn test_parse_roundtrip_with_nested_namespace() {
        let raw = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm/providers/Microsoft.Insights/diagnosticSettings/ds";
        let id = ResourceId::parse(raw).unwrap();
        assert_eq!(id.resource_group_name(), Some("rg"));
        assert_eq!(id.namespace(), Some("Microsoft.Compute"));
        assert_eq!(id.segments().len(), 2);
        assert_eq!(id.segments()[1].namespace.as_deref(), Some("Microsoft.Insights"));
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_parse_case_insensitive_group_keyword() {
        let id = ResourceId::parse("/subscriptions/sub/resourcegroups/rg").unwrap();
        assert_eq!(id.resource_group_name(), Some("rg"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ResourceId::parse("/foo/bar").is_err());
        assert!(ResourceId::parse("/subscriptions/").is_err());
        assert!(ResourceId::parse("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Web").is_err());
        assert!(ResourceId::parse("/subscriptions/s/resourceGroups/rg/sites/x").is_err());
    }

    #[test]
    fn test_expand_template() {
        let mut vars = HashMap::new();
        vars.insert("subscription_id", "sub".to_string());
        vars.insert("resource_group", "rg".to_string());
        let url = expand_template(
            "/subscriptions/{{ subscription_id }}/resourceGroups/{{resource_group}}/providers/Microsoft.Web/sites",
            &vars,
        )
        .unwrap();
        assert_eq!(
            url,
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Web/sites"
        );
    }

    #[test]
    fn test_expand_template_unknown_placeholder() {
        let vars = HashMap::new();
        let err = expand_template("/subscriptions/{{ subscription_id }}", &vars).unwrap_err();
        assert!(err.to_string().contains("subscription_id"));
    }
}

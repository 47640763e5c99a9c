//! Declarative argument specifications.
//!
//! Every module describes its parameters as an [`ArgumentSpec`]. Validation happens
//! once, before any network call, and produces a fresh parameter map with aliases
//! resolved, values coerced to their declared types and defaults filled in.
//!
//! ```rust,ignore
//! let spec = ArgumentSpec::new()
//!     .param(ParamSpec::new("name", ParamType::Str).required())
//!     .param(ParamSpec::new("state", ParamType::Str).choices(&["present", "absent"]).default_value(json!("present")))
//!     .mutually_exclusive(&["url", "provider"]);
//! let params = spec.validate(&raw)?;
//! ```

use super::{ModuleError, ModuleParams, ModuleResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

const MASK: &str = "********";

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Str,
    Bool,
    Int,
    Float,
    List,
    Dict,
    Raw,
}

/// One parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_log: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<ParamType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            choices: Vec::new(),
            aliases: Vec::new(),
            no_log: false,
            elements: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| Value::from(*c)).collect();
        self
    }

    pub fn int_choices(mut self, choices: &[i64]) -> Self {
        self.choices = choices.iter().map(|c| Value::from(*c)).collect();
        self
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn no_log(mut self) -> Self {
        self.no_log = true;
        self
    }

    pub fn elements(mut self, kind: ParamType) -> Self {
        self.elements = Some(kind);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.iter().any(|a| a == key)
    }
}

/// `required_if` rule: when `param` equals `value`, every name in `requirements` is needed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequiredIf {
    pub param: String,
    pub value: Value,
    pub requirements: Vec<String>,
}

/// Full argument specification of a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArgumentSpec {
    #[serde(serialize_with = "serialize_params")]
    pub params: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mutually_exclusive: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_together: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_one_of: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_if: Vec<RequiredIf>,
}

fn serialize_params<S: serde::Serializer>(params: &[ParamSpec], s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = s.serialize_map(Some(params.len()))?;
    for p in params {
        map.serialize_entry(&p.name, p)?;
    }
    map.end()
}

fn names(group: &[&str]) -> Vec<String> {
    group.iter().map(|s| s.to_string()).collect()
}

impl ArgumentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn params(mut self, specs: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.params.extend(specs);
        self
    }

    pub fn mutually_exclusive(mut self, group: &[&str]) -> Self {
        self.mutually_exclusive.push(names(group));
        self
    }

    pub fn required_together(mut self, group: &[&str]) -> Self {
        self.required_together.push(names(group));
        self
    }

    pub fn required_one_of(mut self, group: &[&str]) -> Self {
        self.required_one_of.push(names(group));
        self
    }

    pub fn required_if(mut self, param: &str, value: Value, requirements: &[&str]) -> Self {
        self.required_if.push(RequiredIf {
            param: param.to_string(),
            value,
            requirements: names(requirements),
        });
        self
    }

    /// Look up a parameter by its canonical name.
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate raw arguments and return the normalized parameter map.
    pub fn validate(&self, raw: &ModuleParams) -> ModuleResult<ModuleParams> {
        let mut resolved = ModuleParams::new();
        let mut unknown = Vec::new();

        let mut keys: Vec<&String> = raw.keys().collect();
        keys.sort();
        for key in keys {
            let value = &raw[key];
            if key.starts_with("_ansible_") {
                continue;
            }
            let spec = match self.params.iter().find(|p| p.answers_to(key)) {
                Some(spec) => spec,
                None => {
                    unknown.push(key.clone());
                    continue;
                }
            };
            if value.is_null() {
                continue;
            }
            if let Some(previous) = resolved.get(&spec.name) {
                if previous != value {
                    return Err(ModuleError::InvalidParameter(format!(
                        "parameters are mutually exclusive: {}|{}",
                        spec.name,
                        spec.aliases.join("|")
                    )));
                }
            }
            resolved.insert(spec.name.clone(), value.clone());
        }

        if !unknown.is_empty() {
            let mut supported: Vec<&str> = self
                .params
                .iter()
                .flat_map(|p| std::iter::once(p.name.as_str()).chain(p.aliases.iter().map(String::as_str)))
                .collect();
            supported.sort_unstable();
            return Err(ModuleError::InvalidParameter(format!(
                "Unsupported parameters: {}. Supported parameters include: {}",
                unknown.join(", "),
                supported.join(", ")
            )));
        }

        self.check_groups(&resolved)?;

        let missing: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required && !resolved.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ModuleError::MissingParameter(missing.join(", ")));
        }

        let mut validated = ModuleParams::new();
        for spec in &self.params {
            let value = match resolved.remove(&spec.name) {
                Some(v) => coerce(&spec.name, spec.kind, spec.elements, v)?,
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None => continue,
                },
            };
            check_choices(spec, &value)?;
            validated.insert(spec.name.clone(), value);
        }

        for rule in &self.required_if {
            if validated.get(&rule.param) == Some(&rule.value) {
                let missing: Vec<&str> = rule
                    .requirements
                    .iter()
                    .filter(|r| !validated.contains_key(r.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(ModuleError::MissingParameter(format!(
                        "{} is {} but all of the following are missing: {}",
                        rule.param,
                        display_value(&rule.value),
                        missing.join(", ")
                    )));
                }
            }
        }

        Ok(validated)
    }

    fn check_groups(&self, present: &ModuleParams) -> ModuleResult<()> {
        let count = |group: &[String]| group.iter().filter(|n| present.contains_key(n.as_str())).count();

        for group in &self.mutually_exclusive {
            if count(group) > 1 {
                return Err(ModuleError::InvalidParameter(format!(
                    "parameters are mutually exclusive: {}",
                    group.join("|")
                )));
            }
        }
        for group in &self.required_one_of {
            if count(group) == 0 {
                return Err(ModuleError::MissingParameter(format!(
                    "one of the following is required: {}",
                    group.join(", ")
                )));
            }
        }
        for group in &self.required_together {
            let n = count(group);
            if n > 0 && n < group.len() {
                return Err(ModuleError::MissingParameter(format!(
                    "parameters are required together: {}",
                    group.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Copy of `params` safe to echo back: `no_log` values replaced.
    pub fn mask(&self, params: &ModuleParams) -> Value {
        let secret: HashSet<&str> = self
            .params
            .iter()
            .filter(|p| p.no_log)
            .map(|p| p.name.as_str())
            .collect();

        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        let masked = keys
            .into_iter()
            .map(|k| {
                let v = if secret.contains(k.as_str()) {
                    Value::from(MASK)
                } else {
                    params[k].clone()
                };
                (k.clone(), v)
            })
            .collect();
        Value::Object(masked)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_error(name: &str, value: &Value, kind: &str) -> ModuleError {
    ModuleError::InvalidParameter(format!(
        "argument '{}' is of type {} and we were unable to convert to {}",
        name,
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "str",
            Value::Array(_) => "list",
            Value::Object(_) => "dict",
        },
        kind
    ))
}

fn coerce(name: &str, kind: ParamType, elements: Option<ParamType>, value: Value) -> ModuleResult<Value> {
    match kind {
        ParamType::Raw => Ok(value),
        ParamType::Str => match value {
            Value::String(_) => Ok(value),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(display_value(&value))),
            other => Err(type_error(name, &other, "str")),
        },
        ParamType::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.to_lowercase().as_str() {
                "yes" | "true" | "on" | "1" | "y" => Ok(Value::Bool(true)),
                "no" | "false" | "off" | "0" | "n" => Ok(Value::Bool(false)),
                _ => Err(type_error(name, &value, "bool")),
            },
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            _ => Err(type_error(name, &value, "bool")),
        },
        ParamType::Int => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(type_error(name, &value, "int")),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| type_error(name, &value, "int")),
            _ => Err(type_error(name, &value, "int")),
        },
        ParamType::Float => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| type_error(name, &value, "float")),
            _ => Err(type_error(name, &value, "float")),
        },
        ParamType::List => {
            let items = match value {
                Value::Array(items) => items,
                Value::String(s) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Value::from)
                    .collect(),
                Value::Object(_) => return Err(type_error(name, &value, "list")),
                scalar => vec![scalar],
            };
            match elements {
                Some(element_kind) => items
                    .into_iter()
                    .map(|item| coerce(name, element_kind, None, item))
                    .collect::<ModuleResult<Vec<_>>>()
                    .map(Value::Array),
                None => Ok(Value::Array(items)),
            }
        }
        ParamType::Dict => match value {
            Value::Object(_) => Ok(value),
            Value::String(s) => parse_dict_string(name, &s),
            other => Err(type_error(name, &other, "dict")),
        },
    }
}

/// Accept `{"a": 1}` JSON or `a=1, b=2` pairs.
fn parse_dict_string(name: &str, raw: &str) -> ModuleResult<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| type_error(name, &Value::from(raw), "dict"));
    }

    let mut map = serde_json::Map::new();
    for pair in trimmed.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| type_error(name, &Value::from(raw), "dict"))?;
        map.insert(k.trim().to_string(), Value::from(v.trim()));
    }
    Ok(Value::Object(map))
}

fn check_choices(spec: &ParamSpec, value: &Value) -> ModuleResult<()> {
    if spec.choices.is_empty() {
        return Ok(());
    }
    let candidates: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    for candidate in candidates {
        if !spec.choices.contains(candidate) {
            return Err(ModuleError::InvalidParameter(format!(
                "value of {} must be one of: {}, got: {}",
                spec.name,
                spec.choices
                    .iter()
                    .map(display_value)
                    .collect::<Vec<_>>()
                    .join(", "),
                display_value(candidate)
            )));
        }
    }
    Ok(())
}

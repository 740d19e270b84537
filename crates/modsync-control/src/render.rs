//! Template rendering.
//!
//! Rendering is a pure function of the module spec and the template
//! definition. The [`Renderer`] trait is the seam for plugging in a real
//! template engine; [`ValuesRenderer`] handles plain placeholder
//! substitution:
//!
//! - `{{ .Values.a.b }}` looks up `a.b` in the merged values
//! - `{{ .Module.name }}` and `{{ .Module.namespace }}` expand to the module's
//!   identity
//!
//! A string that is exactly one placeholder is replaced by the structured
//! value; placeholders embedded in longer strings must resolve to scalars.

use modsync_core::{ContentDigest, ModuleName};
use modsync_store::ModuleSpec;
use serde_json::{Map, Value};

use crate::error::{ControlError, Result};
use crate::templates::TemplateDefinition;

/// The module fields a render may read.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Module name.
    pub name: &'a ModuleName,
    /// Module namespace.
    pub namespace: &'a str,
    /// Spec being rendered; may differ from the stored one in previews.
    pub spec: &'a ModuleSpec,
}

/// Renders a template into an ordered list of manifests.
///
/// Implementations must be deterministic: identical inputs produce
/// byte-identical output.
pub trait Renderer: Send + Sync {
    /// Render `template` for the given module.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Template` if the template cannot be rendered
    /// with the supplied values.
    fn render(&self, ctx: &RenderContext<'_>, template: &TemplateDefinition) -> Result<Vec<Value>>;
}

/// Fingerprint a list of rendered manifests.
#[must_use]
pub fn digest(manifests: &[Value]) -> ContentDigest {
    let encoded: Vec<String> = manifests.iter().map(Value::to_string).collect();
    ContentDigest::of_chunks(encoded.iter().map(String::as_bytes))
}

/// Deep-merge `overlay` into `base`; objects merge, everything else replaces.
pub fn merge_values(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_values(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Placeholder-substitution renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuesRenderer;

impl ValuesRenderer {
    /// Create a new renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Renderer for ValuesRenderer {
    fn render(&self, ctx: &RenderContext<'_>, template: &TemplateDefinition) -> Result<Vec<Value>> {
        let mut values = template.defaults.clone();
        merge_values(&mut values, &ctx.spec.values);

        for required in template.required_values() {
            match lookup(&values, required) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(ControlError::Template(format!(
                        "missing required value {required:?}"
                    )));
                }
            }
        }

        let scope = Scope {
            values: &values,
            module_name: Value::String(ctx.name.to_string()),
            module_namespace: Value::String(ctx.namespace.to_string()),
        };
        template
            .manifests
            .iter()
            .map(|manifest| scope.expand(manifest))
            .collect()
    }
}

struct Scope<'a> {
    values: &'a Map<String, Value>,
    module_name: Value,
    module_namespace: Value,
}

impl Scope<'_> {
    fn expand(&self, node: &Value) -> Result<Value> {
        match node {
            Value::String(s) => self.expand_string(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.expand(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.expand(v)?)))
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn expand_string(&self, s: &str) -> Result<Value> {
        if !s.contains("{{") {
            return Ok(Value::String(s.to_string()));
        }

        // Whole-string placeholder keeps the value's type
        let trimmed = s.trim();
        if let Some(inner) = trimmed
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            if !inner.contains("{{") && !inner.contains("}}") {
                return self.resolve(inner.trim()).cloned();
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ControlError::Template(format!("unterminated placeholder in {s:?}")))?;

            let expr = after[..end].trim();
            match self.resolve(expr)? {
                Value::String(v) => out.push_str(v),
                Value::Number(n) => out.push_str(&n.to_string()),
                Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                Value::Null => {}
                Value::Array(_) | Value::Object(_) => {
                    return Err(ControlError::Template(format!(
                        "{expr} is not a scalar and cannot be embedded in {s:?}"
                    )));
                }
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(Value::String(out))
    }

    fn resolve(&self, expr: &str) -> Result<&Value> {
        if let Some(path) = expr.strip_prefix(".Values.") {
            return lookup(self.values, path)
                .ok_or_else(|| ControlError::Template(format!("missing value for {expr}")));
        }

        match expr {
            ".Module.name" => Ok(&self.module_name),
            ".Module.namespace" => Ok(&self.module_namespace),
            _ => Err(ControlError::Template(format!(
                "unsupported placeholder {{{{ {expr} }}}}"
            ))),
        }
    }
}

/// Look up a dotted path in a values map.
fn lookup<'v>(values: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let first = values.get(segments.next()?)?;
    segments.try_fold(first, |node, segment| node.get(segment))
}

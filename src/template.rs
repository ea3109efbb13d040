use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::paths;
use crate::Result;

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum TemplateErrKind {
    #[fail(display = "missing required options: {}", _0)]
    MissingRequiredOption(String),

    #[fail(display = "unsupported template format '{}'", _0)]
    UnsupportedTemplateFormat(String),
}

/// Template dialects a product can declare
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Debug)]
pub enum TemplateType {
    #[serde(rename = "json+jinja2")]
    JsonJinja2,
    #[serde(rename = "yaml+jinja2")]
    YamlJinja2,
}

impl TemplateType {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateType::JsonJinja2 => "json+jinja2",
            TemplateType::YamlJinja2 => "yaml+jinja2",
        }
    }

    /// Parse the stored `templatetype` attribute of a product
    pub fn parse(raw: &str) -> Result<TemplateType> {
        match raw {
            "json+jinja2" => Ok(TemplateType::JsonJinja2),
            "yaml+jinja2" => Ok(TemplateType::YamlJinja2),
            other => Err(TemplateErrKind::UnsupportedTemplateFormat(other.to_string()).into()),
        }
    }
}

impl Default for TemplateType {
    fn default() -> TemplateType {
        TemplateType::JsonJinja2
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Option schema stored in a product's `options` attribute
///
/// Each section maps option name to its default value. `required` defaults
/// are placeholders: callers must supply every key listed there.
/// `descriptions` is help text only and never merged into the bindings.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct OptionSchema {
    #[serde(default)]
    pub required: BTreeMap<String, Value>,
    #[serde(default)]
    pub optional: BTreeMap<String, Value>,
    #[serde(default)]
    pub advanced: BTreeMap<String, Value>,
    #[serde(default)]
    pub descriptions: BTreeMap<String, Value>,
}

impl OptionSchema {
    pub fn parse(text: &str) -> Result<OptionSchema> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check that every required option was supplied
    pub fn validate(&self, supplied: &BTreeMap<String, Value>) -> Result<()> {
        let missing: Vec<&str> = self.required.keys()
            .filter(|name| !supplied.contains_key(name.as_str()))
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(TemplateErrKind::MissingRequiredOption(missing.join(", ")).into());
        }
        Ok(())
    }

    /// Schema defaults overlaid with the supplied options
    ///
    /// Sections merge in the order required, optional, advanced; the caller's
    /// values win over every default.
    pub fn merge(&self, supplied: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for (name, value) in self.required.iter()
            .chain(&self.optional)
            .chain(&self.advanced)
            .chain(supplied)
        {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

/// Variable bindings a product template is rendered with
pub struct RenderContext<'a> {
    pub user: &'a str,
    pub product: &'a str,
    pub version: &'a str,
    /// DN of the cluster being materialised
    pub clusterdn: &'a str,
    /// Merged option values, exposed as `opts`
    pub options: &'a BTreeMap<String, Value>,
}

/// Render a product template with `tera`
///
/// Two generations of templates are in circulation; the older ones refer to
/// `servicename`/`instancedn`/`instancename`, so those names are bound as
/// aliases next to the current set.
pub fn render(template: &str, ctx: &RenderContext) -> Result<String> {
    let clusterid = paths::id_from_dn(ctx.clusterdn);
    let mut bindings = tera::Context::new();
    bindings.insert("opts", ctx.options);
    bindings.insert("user", ctx.user);
    bindings.insert("product", ctx.product);
    bindings.insert("version", ctx.version);
    bindings.insert("clusterdn", ctx.clusterdn);
    bindings.insert("clusterid", &clusterid);
    bindings.insert("servicename", ctx.product);
    bindings.insert("instancedn", ctx.clusterdn);
    bindings.insert("instancename", &clusterid);
    Ok(tera::Tera::one_off(template, &bindings, false)?)
}

/// Parse a rendered document according to the declared dialect
pub fn parse_rendered(dialect: TemplateType, text: &str) -> Result<Value> {
    let doc = match dialect {
        TemplateType::JsonJinja2 => serde_json::from_str(text)?,
        TemplateType::YamlJinja2 => serde_yaml::from_str(text)?,
    };
    Ok(doc)
}

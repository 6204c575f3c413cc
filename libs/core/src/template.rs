//! Frame templates
//!
//! A template names a [`RouteLayout`] for a known game-server framework.
//! The catalog starts with the built-in set and accepts custom templates,
//! validating each layout as it is registered.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::route::{RouteField, RouteLayout};

/// A named, ordered header layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTemplate {
    pub id: String,
    pub name: String,
    /// Project homepage; empty for custom templates
    #[serde(default)]
    pub github: String,
    pub fields: RouteLayout,
}

impl FrameTemplate {
    pub fn layout(&self) -> &RouteLayout {
        &self.fields
    }
}

/// Templates for the frameworks supported out of the box
pub fn builtin_templates() -> Vec<FrameTemplate> {
    let template = |id: &str, name: &str, github: &str, fields: Vec<RouteField>| {
        RouteLayout::new(fields).map(|fields| FrameTemplate {
            id: id.to_string(),
            name: name.to_string(),
            github: github.to_string(),
            fields,
        })
    };

    [
        template(
            "due",
            "Due",
            "https://github.com/dobyte/due",
            vec![
                RouteField::plain("size", 4),
                RouteField::plain("header", 1),
                RouteField::route("route", 2),
                RouteField::seq("seq", 2),
            ],
        ),
        template(
            "skynet",
            "Skynet",
            "https://github.com/cloudwu/skynet",
            vec![RouteField::plain("size", 2)],
        ),
        template(
            "tgf",
            "TGF",
            "https://github.com/thkhxm/tgf",
            vec![
                RouteField::plain("magic", 1),
                RouteField::plain("type", 1),
                RouteField::plain("methodSize", 2),
                RouteField::plain("dataSize", 2),
            ],
        ),
        template(
            "cherry",
            "Cherry",
            "https://github.com/cherry-game/cherry",
            vec![RouteField::plain("mid", 4), RouteField::plain("len", 4)],
        ),
        template(
            "antnet",
            "Antnet",
            "https://github.com/magiclvzs/antnet",
            vec![
                RouteField::plain("len", 4),
                RouteField::plain("error", 2),
                RouteField::route("cmd", 1),
                RouteField::route("act", 1),
                RouteField::seq("index", 2),
                RouteField::plain("flags", 2),
            ],
        ),
    ]
    .into_iter()
    // The built-in layouts are constants that always validate.
    .filter_map(Result::ok)
    .collect()
}

/// Built-in plus user-registered templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<FrameTemplate>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCatalog {
    /// Catalog holding only the built-in templates
    pub fn new() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }

    /// Catalog with previously saved custom templates appended
    ///
    /// `json` is an array of templates as produced by [`TemplateCatalog::custom_json`].
    pub fn with_custom_json(json: &str) -> Result<Self> {
        let custom: Vec<FrameTemplate> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for template in custom {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    pub fn templates(&self) -> &[FrameTemplate] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&FrameTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Validate `fields` and add them as a custom template.
    ///
    /// Fails fast on an invalid layout instead of storing something that
    /// would pack routes incorrectly later.
    pub fn register(&mut self, name: impl Into<String>, fields: Vec<RouteField>) -> Result<&FrameTemplate> {
        let fields = RouteLayout::new(fields)?;
        let template = FrameTemplate {
            id: custom_id(),
            name: name.into(),
            github: String::new(),
            fields,
        };
        self.insert(template)
    }

    /// Custom templates as a JSON array, for the caller to persist
    pub fn custom_json(&self) -> Result<String> {
        let custom: Vec<&FrameTemplate> = self
            .templates
            .iter()
            .filter(|t| t.id.starts_with(CUSTOM_PREFIX))
            .collect();
        Ok(serde_json::to_string(&custom)?)
    }

    fn insert(&mut self, template: FrameTemplate) -> Result<&FrameTemplate> {
        if self.get(&template.id).is_some() {
            return Err(Error::custom(format!(
                "Template id already registered: {}",
                template.id
            )));
        }
        self.templates.push(template);
        let last = self.templates.len() - 1;
        Ok(&self.templates[last])
    }
}

const CUSTOM_PREFIX: &str = "custom_";

fn custom_id() -> String {
    format!("{}{}", CUSTOM_PREFIX, Uuid::new_v4().simple())
}

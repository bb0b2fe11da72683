//! # Template Catalog
//!
//! Templates are read-only images named `<name>-template_<version>`. New
//! machines are cloned from the highest version of a template name unless a
//! specific version is pinned.
//!
//! ```text
//!   ListImages ──▶ parse names ──▶ group by name ──▶ sort by version
//!
//!   base-template_1 ┐
//!   base-template_2 ┼─▶ "base": [1, 2]      latest("base") = base-template_2
//!   web-template_7  ┘   "web":  [7]
//!   web-template_x      (ignored: version is not a number)
//!   db01.example        (ignored: not a template)
//! ```
//!
//! Single templates, version groups, and the full catalog all answer the same
//! two questions through [`TemplateSource`].

use crate::bus::ImageInfo;
use crate::constants::TEMPLATE_SEPARATOR;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

// =============================================================================
// Template
// =============================================================================

/// One immutable template image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Template {
    /// Template name, without the version suffix.
    pub name: String,
    /// Template version.
    pub version: u32,
}

impl Template {
    /// Creates a template reference.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Returns the name of the backing image.
    pub fn image_name(&self) -> String {
        format!("{}{}{}", self.name, TEMPLATE_SEPARATOR, self.version)
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.image_name())
    }
}

/// Parses an image name as a template.
///
/// Returns `None` for images that are not templates or whose version suffix
/// is not a non-negative integer.
pub fn parse_template_image(image: &str) -> Option<Template> {
    let (name, version) = image.split_once(TEMPLATE_SEPARATOR)?;
    let version = version.parse::<u32>().ok()?;
    Some(Template::new(name, version))
}

// =============================================================================
// TemplateSource
// =============================================================================

/// Something that can hand out templates.
pub trait TemplateSource {
    /// Returns the preferred template, if any.
    fn latest(&self) -> Option<&Template>;

    /// Returns the highest version of the named template, if any.
    fn named(&self, name: &str) -> Option<&Template>;
}

impl TemplateSource for Template {
    fn latest(&self) -> Option<&Template> {
        Some(self)
    }

    fn named(&self, name: &str) -> Option<&Template> {
        (self.name == name).then_some(self)
    }
}

// =============================================================================
// TemplateVersions
// =============================================================================

/// All versions of templates, kept sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVersions {
    templates: Vec<Template>,
}

impl TemplateVersions {
    /// Creates a sorted group from any templates.
    pub fn new(mut templates: Vec<Template>) -> Self {
        templates.sort();
        templates.dedup();
        Self { templates }
    }

    /// Adds a template, keeping the group sorted.
    pub fn insert(&mut self, template: Template) {
        if let Err(pos) = self.templates.binary_search(&template) {
            self.templates.insert(pos, template);
        }
    }

    /// Returns the templates in ascending order.
    pub fn as_slice(&self) -> &[Template] {
        &self.templates
    }

    /// Returns a specific version, if present.
    pub fn version(&self, version: u32) -> Option<&Template> {
        self.templates.iter().find(|t| t.version == version)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateSource for TemplateVersions {
    fn latest(&self) -> Option<&Template> {
        self.templates.last()
    }

    fn named(&self, name: &str) -> Option<&Template> {
        self.templates.iter().rev().find_map(|t| t.named(name))
    }
}

// =============================================================================
// TemplateCatalog
// =============================================================================

/// Every template on the host, grouped by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateCatalog {
    default_name: String,
    groups: BTreeMap<String, TemplateVersions>,
}

impl TemplateCatalog {
    /// Creates an empty catalog with the given default template name.
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            default_name: default_name.into(),
            groups: BTreeMap::new(),
        }
    }

    /// Builds a catalog from an image listing, skipping non-template images.
    pub fn from_images<'a>(
        default_name: impl Into<String>,
        images: impl IntoIterator<Item = &'a ImageInfo>,
    ) -> Self {
        let mut catalog = Self::new(default_name);
        for template in images
            .into_iter()
            .filter_map(|image| parse_template_image(&image.name))
        {
            catalog.insert(template);
        }
        catalog
    }

    /// Adds one template.
    pub fn insert(&mut self, template: Template) {
        self.groups
            .entry(template.name.clone())
            .or_default()
            .insert(template);
    }

    /// Returns the configured default template name.
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Returns every version group keyed by template name.
    pub fn groups(&self) -> &BTreeMap<String, TemplateVersions> {
        &self.groups
    }

    /// Resolves a template reference.
    ///
    /// An empty or absent `name` refers to the default template. With a
    /// `version`, exactly that version must exist; otherwise the highest
    /// version wins.
    pub fn resolve(&self, name: Option<&str>, version: Option<u32>) -> Option<&Template> {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => self.default_name.as_str(),
        };
        let group = self.groups.get(name)?;
        match version {
            Some(v) => group.version(v),
            None => group.named(name),
        }
    }

    /// Like [`resolve`](Self::resolve), failing with
    /// [`Error::MissingTemplate`] on behalf of `machine`.
    pub fn require(
        &self,
        name: Option<&str>,
        version: Option<u32>,
        machine: &str,
    ) -> Result<&Template> {
        self.resolve(name, version).ok_or_else(|| {
            let name = name.filter(|n| !n.is_empty()).unwrap_or(&self.default_name);
            Error::MissingTemplate {
                template: match version {
                    Some(v) => format!("{}@{}", name, v),
                    None => name.to_string(),
                },
                machine: machine.to_string(),
            }
        })
    }
}

impl TemplateSource for TemplateCatalog {
    fn latest(&self) -> Option<&Template> {
        self.groups.get(&self.default_name)?.latest()
    }

    fn named(&self, name: &str) -> Option<&Template> {
        let name = if name.is_empty() {
            self.default_name.as_str()
        } else {
            name
        };
        self.groups.get(name)?.named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageInfo {
        ImageInfo {
            name: name.to_string(),
            path: format!("/org/freedesktop/machine1/image/{}", name),
        }
    }

    #[test]
    fn test_parse_template_image() {
        assert_eq!(
            parse_template_image("base-template_12"),
            Some(Template::new("base", 12))
        );
        assert_eq!(parse_template_image("base-template_x"), None);
        assert_eq!(parse_template_image("base-template_-1"), None);
        assert_eq!(parse_template_image("db01.example.com"), None);
    }

    #[test]
    fn test_image_name_roundtrip() {
        let t = Template::new("web-server", 3);
        assert_eq!(t.image_name(), "web-server-template_3");
        assert_eq!(parse_template_image(&t.image_name()), Some(t));
    }

    #[test]
    fn test_versions_sorted_numerically() {
        let versions = TemplateVersions::new(vec![
            Template::new("base", 10),
            Template::new("base", 2),
            Template::new("base", 9),
        ]);
        assert_eq!(versions.latest(), Some(&Template::new("base", 10)));
    }

    #[test]
    fn test_single_template_source() {
        let t = Template::new("base", 1);
        assert_eq!(t.latest(), Some(&t));
        assert_eq!(t.named("base"), Some(&t));
        assert_eq!(t.named("other"), None);
    }

    #[test]
    fn test_catalog_skips_non_templates() {
        let images = vec![
            image("base-template_1"),
            image("base-template_oops"),
            image("db01.example.com"),
        ];
        let catalog = TemplateCatalog::from_images("base", &images);
        assert_eq!(catalog.groups().len(), 1);
        assert_eq!(catalog.groups()["base"].len(), 1);
    }

    #[test]
    fn test_catalog_pinned_version() {
        let images = vec![image("base-template_1"), image("base-template_2")];
        let catalog = TemplateCatalog::from_images("base", &images);
        assert_eq!(
            catalog.resolve(None, Some(1)),
            Some(&Template::new("base", 1))
        );
        assert_eq!(catalog.resolve(Some("base"), Some(5)), None);
    }

    #[test]
    fn test_require_reports_missing_template() {
        let catalog = TemplateCatalog::new("base");
        let err = catalog.require(None, None, "db01").unwrap_err();
        match err {
            Error::MissingTemplate { template, machine } => {
                assert_eq!(template, "base");
                assert_eq!(machine, "db01");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Template System - Label Profiles & Templates
//!
//! Profiles and templates are owned by an external store and fetched by id.
//! This module defines their shape and the async lookup contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::engines::EngineKind;
use crate::print::{Alignment, BarcodeFormat, FontWeight};

pub type TemplateId = String;
pub type ProfileId = String;

/// Named configuration selecting a template and a target engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelProfile {
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default)]
    pub media_width_in: f64,
    #[serde(default)]
    pub media_height_in: f64,
    /// Template used by this profile. Falls back to the profile id when absent.
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

impl LabelProfile {
    pub fn template_id(&self) -> &str {
        self.template_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelTemplate {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub width_mm: f64,
    pub height_mm: f64,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    /// Oldest engine version able to compile this template.
    #[serde(default)]
    pub engine_min_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Barcode,
    Qr,
    Image,
    Line,
    Rectangle,
}

/// One design-time field. Geometry is in millimeters; style attributes are
/// optional and defaulted at compile time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,

    #[serde(default)]
    pub font_size: Option<f64>,
    #[serde(default)]
    pub font_family: Option<String>,
    #[serde(default)]
    pub font_weight: Option<FontWeight>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub border_color: Option<String>,
    #[serde(default)]
    pub border_width: Option<f64>,
    #[serde(default)]
    pub alignment: Option<Alignment>,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub barcode_format: Option<BarcodeFormat>,
    #[serde(default)]
    pub show_text: Option<bool>,
    #[serde(default)]
    pub image_data: Option<String>,
}

impl TemplateField {
    /// Bare field with the given geometry (mm) and no content or styling.
    pub fn new(id: impl Into<String>, field_type: FieldType, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            field_type,
            content: None,
            data_source: None,
            x,
            y,
            width,
            height,
            font_size: None,
            font_family: None,
            font_weight: None,
            color: None,
            background_color: None,
            border_color: None,
            border_width: None,
            alignment: None,
            rotation: None,
            barcode_format: None,
            show_text: None,
            image_data: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_data_source(mut self, path: impl Into<String>) -> Self {
        self.data_source = Some(path.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Template store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only lookup of profiles and templates by id.
///
/// This is the only suspension point of the pipeline.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn profile(&self, id: &str) -> Result<Option<LabelProfile>, StoreError>;
    async fn template(&self, id: &str) -> Result<Option<LabelTemplate>, StoreError>;
}

/// Store backed by in-process maps, optionally loaded from a directory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateStore {
    profiles: HashMap<ProfileId, LabelProfile>,
    templates: HashMap<TemplateId, LabelTemplate>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `profiles/*.json` and `templates/*.json` under `dir`.
    ///
    /// Unparseable files are skipped with a warning; a missing directory
    /// yields an empty store.
    pub fn load_from_dir(dir: &Path) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for profile in read_json_dir::<LabelProfile>(&dir.join("profiles"))? {
            store.register_profile(profile);
        }
        for template in read_json_dir::<LabelTemplate>(&dir.join("templates"))? {
            store.register_template(template);
        }
        debug!(
            profiles = store.profiles.len(),
            templates = store.templates.len(),
            dir = %dir.display(),
            "Template store loaded"
        );
        Ok(store)
    }

    pub fn register_profile(&mut self, profile: LabelProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn register_template(&mut self, template: LabelTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn profiles(&self) -> Vec<&LabelProfile> {
        self.profiles.values().collect()
    }

    pub fn templates(&self) -> Vec<&LabelTemplate> {
        self.templates.values().collect()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn profile(&self, id: &str) -> Result<Option<LabelProfile>, StoreError> {
        Ok(self.profiles.get(id).cloned())
    }

    async fn template(&self, id: &str) -> Result<Option<LabelTemplate>, StoreError> {
        Ok(self.templates.get(id).cloned())
    }
}

fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut items = Vec::new();
    if !dir.exists() {
        return Ok(items);
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |e| e == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str::<T>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(item) => items.push(item),
            Err(reason) => warn!(path = %path.display(), %reason, "Skipping unreadable store file"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_deserialize_defaults() {
        let field: TemplateField = serde_json::from_str(
            r#"{"id":"sku","type":"barcode","dataSource":"product.sku","x":2,"y":3,"width":40,"height":10,"barcodeFormat":"UPC"}"#,
        )
        .unwrap();
        assert_eq!(field.field_type, FieldType::Barcode);
        assert_eq!(field.data_source.as_deref(), Some("product.sku"));
        assert_eq!(field.barcode_format, Some(BarcodeFormat::Upc));
        assert!(field.font_size.is_none());
    }

    #[test]
    fn test_profile_template_id_fallback() {
        let profile: LabelProfile =
            serde_json::from_str(r#"{"id":"p1","name":"Shelf","engine":"ZPL"}"#).unwrap();
        assert_eq!(profile.template_id(), "p1");
        assert_eq!(profile.engine, EngineKind::Zpl);
    }

    #[tokio::test]
    async fn test_load_from_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("profiles")).unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::write(
            dir.path().join("profiles/p1.json"),
            r#"{"id":"p1","name":"Shelf","engine":"PDF","templateId":"t1"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("profiles/broken.json"), "{not json").unwrap();
        fs::write(
            dir.path().join("templates/t1.json"),
            r#"{"id":"t1","widthMm":50.8,"heightMm":25.4,"fields":[]}"#,
        )
        .unwrap();

        let store = InMemoryTemplateStore::load_from_dir(dir.path()).unwrap();
        assert_eq!(store.profiles().len(), 1);
        let profile = store.profile("p1").await.unwrap().unwrap();
        let template = store.template(profile.template_id()).await.unwrap().unwrap();
        assert_eq!(template.width_mm, 50.8);
        assert!(store.template("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let store = InMemoryTemplateStore::load_from_dir(Path::new("/nonexistent/labelforge")).unwrap();
        assert!(store.profiles().is_empty());
        assert!(store.templates().is_empty());
    }
}

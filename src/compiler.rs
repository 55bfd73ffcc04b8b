//! Template Compiler - Label Resolution
//!
//! Turns an order into print jobs: resolve the profile for each line item,
//! fetch its template, bind order data into every field and check the
//! resulting geometry. Per-item failures are reported as data and never
//! abort the rest of the order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::context::{ContextOptions, DataContext};
use crate::hashing::element_fingerprint;
use crate::hierarchy::{ProfileResolution, ProfileResolver};
use crate::model::{Order, OrderLineItem};
use crate::print::{
    Alignment, BarcodeFormat, ElementType, FontWeight, JobMetadata, PrintElement, PrintJob,
    PrinterProfile,
};
use crate::templates::{FieldType, LabelTemplate, TemplateField, TemplateStore};
use crate::units::{mm_to_inches, GeometryError, PrintDimensions};
use crate::ENGINE_VERSION;

pub const DEFAULT_FONT_SIZE: f64 = 12.0;
pub const DEFAULT_FONT_FAMILY: &str = "helvetica";
pub const DEFAULT_COLOR: &str = "#000000";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    #[default]
    Product,
    Shipping,
    Both,
}

impl LabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Shipping => "shipping",
            Self::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LabelErrorKind {
    NoLineItems,
    NoProfileResolved,
    TemplateNotFound,
    EngineVersionMismatch,
    InvalidGeometry,
    ProcessingException,
}

/// A per-line-item failure. Recoverable: the item is skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelIssue {
    #[serde(default)]
    pub line_item_id: Option<String>,
    pub kind: LabelErrorKind,
    pub error: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl LabelIssue {
    fn new(
        line_item_id: Option<&str>,
        kind: LabelErrorKind,
        error: impl Into<String>,
        suggestion: &str,
    ) -> Self {
        Self {
            line_item_id: line_item_id.map(String::from),
            kind,
            error: error.into(),
            suggestion: Some(suggestion.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelWarning {
    #[serde(default)]
    pub line_item_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelResolutionRequest {
    pub order: Order,
    #[serde(default)]
    pub line_item_id: Option<String>,
    #[serde(default)]
    pub label_type: LabelType,
    #[serde(default)]
    pub printer_profile: Option<PrinterProfile>,
    #[serde(default)]
    pub options: ContextOptions,
}

impl LabelResolutionRequest {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            line_item_id: None,
            label_type: LabelType::default(),
            printer_profile: None,
            options: ContextOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelResolutionResult {
    pub success: bool,
    pub print_jobs: Vec<PrintJob>,
    pub errors: Vec<LabelIssue>,
    pub warnings: Vec<LabelWarning>,
    /// Resolution of the last item that reached a profile.
    pub resolution: Option<ProfileResolution>,
    pub template: Option<LabelTemplate>,
}

struct ItemOutcome {
    job: Option<PrintJob>,
    resolution: Option<ProfileResolution>,
    template: Option<LabelTemplate>,
    errors: Vec<LabelIssue>,
    warnings: Vec<LabelWarning>,
}

impl ItemOutcome {
    fn failed(resolution: Option<ProfileResolution>, error: LabelIssue) -> Self {
        Self {
            job: None,
            resolution,
            template: None,
            errors: vec![error],
            warnings: vec![],
        }
    }
}

/// Resolves orders to print jobs against a template store.
#[derive(Clone)]
pub struct LabelResolver {
    store: Arc<dyn TemplateStore>,
    profiles: ProfileResolver,
    default_dpi: u32,
}

impl LabelResolver {
    pub fn new(store: Arc<dyn TemplateStore>, profiles: ProfileResolver, default_dpi: u32) -> Self {
        Self {
            store,
            profiles,
            default_dpi,
        }
    }

    pub fn profile_resolver(&self) -> &ProfileResolver {
        &self.profiles
    }

    pub fn template_store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    #[instrument(skip_all, fields(order = %request.order.order_number))]
    pub async fn resolve_order_to_labels(
        &self,
        request: &LabelResolutionRequest,
    ) -> LabelResolutionResult {
        let order = &request.order;
        let targets: Vec<&OrderLineItem> = match &request.line_item_id {
            Some(id) => order.line_items.iter().filter(|item| &item.id == id).collect(),
            None => order.line_items.iter().collect(),
        };

        let mut result = LabelResolutionResult {
            success: false,
            print_jobs: vec![],
            errors: vec![],
            warnings: vec![],
            resolution: None,
            template: None,
        };

        if targets.is_empty() {
            result.errors.push(LabelIssue::new(
                request.line_item_id.as_deref(),
                LabelErrorKind::NoLineItems,
                "No line items found to process",
                "Verify the order contains valid line items",
            ));
            return result;
        }

        for item in targets {
            let outcome = self.resolve_line_item(request, item).await;
            if let Some(job) = outcome.job {
                result.print_jobs.push(job);
            }
            if outcome.resolution.is_some() {
                result.resolution = outcome.resolution;
                result.template = outcome.template;
            }
            for issue in &outcome.errors {
                warn!(line_item = %item.id, kind = ?issue.kind, error = %issue.error, "Line item skipped");
            }
            result.errors.extend(outcome.errors);
            result.warnings.extend(outcome.warnings);
        }

        result.success = !result.print_jobs.is_empty() && result.errors.is_empty();
        debug!(
            jobs = result.print_jobs.len(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Order resolved"
        );
        result
    }

    async fn resolve_line_item(
        &self,
        request: &LabelResolutionRequest,
        item: &OrderLineItem,
    ) -> ItemOutcome {
        let item_id = Some(item.id.as_str());
        let resolution = self.profiles.resolve_line_item(item);
        let Some(profile_id) = resolution.active_profile_id.clone() else {
            return ItemOutcome::failed(
                None,
                LabelIssue::new(
                    item_id,
                    LabelErrorKind::NoProfileResolved,
                    "No label profile could be resolved",
                    "Assign a label profile to the product, variant, or order",
                ),
            );
        };

        let processing = |e: &dyn std::fmt::Display| {
            LabelIssue::new(
                item_id,
                LabelErrorKind::ProcessingException,
                format!("Failed to process line item: {}", e),
                "Check line item data and label configuration",
            )
        };

        let profile = match self.store.profile(&profile_id).await {
            Ok(profile) => profile,
            Err(e) => return ItemOutcome::failed(Some(resolution), processing(&e)),
        };
        let template_id = profile
            .as_ref()
            .map(|p| p.template_id().to_string())
            .unwrap_or_else(|| profile_id.clone());
        let template = match self.store.template(&template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                return ItemOutcome::failed(
                    Some(resolution),
                    LabelIssue::new(
                        item_id,
                        LabelErrorKind::TemplateNotFound,
                        format!("Template not found for profile: {}", profile_id),
                        "Verify the label profile has a valid template assigned",
                    ),
                )
            }
            Err(e) => return ItemOutcome::failed(Some(resolution), processing(&e)),
        };

        if let Some(issue) = check_engine_version(&template, item_id) {
            return ItemOutcome {
                template: Some(template),
                ..ItemOutcome::failed(Some(resolution), issue)
            };
        }
        if !template.width_mm.is_finite() || !template.height_mm.is_finite() {
            return ItemOutcome {
                template: Some(template),
                ..ItemOutcome::failed(Some(resolution), processing(&GeometryError::NotFinite))
            };
        }
        let bad_field = template
            .fields
            .iter()
            .find(|f| !field_is_finite(f))
            .map(|f| f.id.clone());
        if let Some(field_id) = bad_field {
            let reason = format!("field {} has non-numeric geometry", field_id);
            return ItemOutcome {
                template: Some(template),
                ..ItemOutcome::failed(Some(resolution), processing(&reason))
            };
        }

        let context = DataContext::build(&request.order, item, &request.options);
        let elements = compile_fields(&template.fields, &context);
        let (errors, warnings) = validate_compiled_elements(&elements, &item.id);
        if !errors.is_empty() {
            return ItemOutcome {
                job: None,
                resolution: Some(resolution),
                template: Some(template),
                errors,
                warnings,
            };
        }

        let fingerprint = match element_fingerprint(&template.id, &elements) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return ItemOutcome::failed(Some(resolution), processing(&e)),
        };
        let dpi = request
            .printer_profile
            .as_ref()
            .map(|p| p.dpi)
            .unwrap_or(self.default_dpi);
        let order = &request.order;

        let job = PrintJob {
            id: format!("label-{}-{}-{}", order.id, item.id, &Uuid::new_v4().simple().to_string()[..8]),
            template_id: template.id.clone(),
            elements,
            dimensions: PrintDimensions::from_mm(template.width_mm, template.height_mm, dpi),
            copies: item.label_quantity.unwrap_or(item.quantity),
            metadata: JobMetadata {
                order_id: order.id.clone(),
                order_number: order.order_number.clone(),
                line_item_id: item.id.clone(),
                product_name: item.product_name.clone(),
                customer_name: request
                    .options
                    .include_customer
                    .then(|| order.customer.name.clone()),
                vendor_id: order.vendor.id.clone(),
                profile_id: profile_id.clone(),
                engine: profile.as_ref().map(|p| p.engine),
                label_type: request.label_type.as_str().to_string(),
                created_at: chrono::Utc::now(),
                fingerprint,
            },
        };
        debug!(job = %job.id, elements = job.elements.len(), copies = job.copies, "Print job compiled");

        ItemOutcome {
            job: Some(job),
            resolution: Some(resolution),
            template: Some(template),
            errors: vec![],
            warnings,
        }
    }
}

fn check_engine_version(template: &LabelTemplate, item_id: Option<&str>) -> Option<LabelIssue> {
    let min = template.engine_min_version.as_deref()?;
    let parsed = semver::Version::parse(ENGINE_VERSION)
        .and_then(|engine| semver::Version::parse(min).map(|min| (engine, min)));
    match parsed {
        Ok((engine, required)) if engine < required => Some(LabelIssue::new(
            item_id,
            LabelErrorKind::EngineVersionMismatch,
            format!(
                "Template {} requires engine >= {}, current is {}",
                template.id, min, ENGINE_VERSION
            ),
            "Upgrade the label engine or assign an older template",
        )),
        Ok(_) => None,
        Err(e) => Some(LabelIssue::new(
            item_id,
            LabelErrorKind::ProcessingException,
            format!("Invalid template engine version {:?}: {}", min, e),
            "Fix the template's engineMinVersion",
        )),
    }
}

fn field_is_finite(field: &TemplateField) -> bool {
    [field.x, field.y, field.width, field.height]
        .iter()
        .chain(field.font_size.iter())
        .chain(field.rotation.iter())
        .chain(field.border_width.iter())
        .all(|v| v.is_finite())
}

/// Compile template fields into elements against a data context.
///
/// Pure: the same fields and context always produce the same elements.
pub fn compile_fields(fields: &[TemplateField], context: &DataContext) -> Vec<PrintElement> {
    fields.iter().map(|field| compile_field(field, context)).collect()
}

fn compile_field(field: &TemplateField, context: &DataContext) -> PrintElement {
    let mut content = field
        .content
        .as_deref()
        .map(|template| context.interpolate(template))
        .unwrap_or_default();
    if let Some(value) = field
        .data_source
        .as_deref()
        .and_then(|path| context.resolve(path))
        .filter(|value| !value.is_empty())
    {
        content = value;
    }

    PrintElement {
        id: field.id.clone(),
        element_type: element_type(field.field_type),
        x: mm_to_inches(field.x),
        y: mm_to_inches(field.y),
        width: mm_to_inches(field.width),
        height: mm_to_inches(field.height),
        content,
        font_size: field.font_size.unwrap_or(DEFAULT_FONT_SIZE),
        font_family: field
            .font_family
            .clone()
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
        font_weight: field.font_weight.unwrap_or(FontWeight::Normal),
        color: field.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        background_color: field.background_color.clone(),
        border_color: field.border_color.clone(),
        border_width: field.border_width,
        alignment: field.alignment.unwrap_or(Alignment::Left),
        rotation: field.rotation.unwrap_or(0.0),
        show_text: field.show_text.unwrap_or(true),
        barcode_format: field.barcode_format.unwrap_or(BarcodeFormat::Code128),
        image_data: field.image_data.clone(),
    }
}

fn element_type(field_type: FieldType) -> ElementType {
    match field_type {
        FieldType::Text => ElementType::Text,
        FieldType::Barcode => ElementType::Barcode,
        FieldType::Qr => ElementType::Qr,
        FieldType::Image => ElementType::Image,
        FieldType::Line => ElementType::Line,
        FieldType::Rectangle => ElementType::Rectangle,
    }
}

/// Geometry errors are fatal for the item; missing content only warns.
pub fn validate_compiled_elements(
    elements: &[PrintElement],
    line_item_id: &str,
) -> (Vec<LabelIssue>, Vec<LabelWarning>) {
    let mut errors = vec![];
    let mut warnings = vec![];
    let item = Some(line_item_id);

    for element in elements {
        if element.element_type.needs_content() && !element.has_content() {
            warnings.push(LabelWarning {
                line_item_id: Some(line_item_id.to_string()),
                message: format!("Element {} has no content - will render as empty", element.id),
            });
        }
        if element.x < 0.0 || element.y < 0.0 {
            errors.push(LabelIssue::new(
                item,
                LabelErrorKind::InvalidGeometry,
                format!("Element {} has negative coordinates", element.id),
                "Check template design and data values",
            ));
        }
        if element.width <= 0.0 || element.height <= 0.0 {
            errors.push(LabelIssue::new(
                item,
                LabelErrorKind::InvalidGeometry,
                format!("Element {} has zero or negative dimensions", element.id),
                "Verify template element sizing",
            ));
        }
    }

    (errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(content: &str) -> TemplateField {
        TemplateField::new("name", FieldType::Text, 2.0, 2.0, 46.0, 6.0).with_content(content)
    }

    #[test]
    fn test_compile_converts_mm_and_defaults() {
        let ctx = DataContext::default();
        let elements = compile_fields(&[text_field("Hello")], &ctx);
        let el = &elements[0];
        assert!((el.x - 2.0 / 25.4).abs() < 1e-12);
        assert!((el.width - 46.0 / 25.4).abs() < 1e-12);
        assert_eq!(el.font_size, 12.0);
        assert_eq!(el.font_family, "helvetica");
        assert_eq!(el.color, "#000000");
        assert_eq!(el.alignment, Alignment::Left);
        assert_eq!(el.barcode_format, BarcodeFormat::Code128);
        assert!(el.show_text);
    }

    #[test]
    fn test_data_source_overrides_only_when_non_empty() {
        let mut ctx = DataContext::default();
        ctx.product.sku = "SKU-9".into();
        let field = TemplateField::new("bc", FieldType::Barcode, 0.0, 0.0, 10.0, 5.0)
            .with_content("fallback")
            .with_data_source("product.sku");
        assert_eq!(compile_fields(&[field.clone()], &ctx)[0].content, "SKU-9");

        ctx.product.sku.clear();
        assert_eq!(compile_fields(&[field], &ctx)[0].content, "fallback");
    }

    #[test]
    fn test_negative_and_zero_geometry_rejected() {
        let ctx = DataContext::default();
        let fields = vec![
            TemplateField::new("neg", FieldType::Rectangle, -1.0, 0.0, 5.0, 5.0),
            TemplateField::new("flat", FieldType::Line, 0.0, 0.0, 5.0, 0.0),
            text_field(""),
        ];
        let (errors, warnings) = validate_compiled_elements(&compile_fields(&fields, &ctx), "li");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == LabelErrorKind::InvalidGeometry));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_engine_version_gate() {
        let mut template = LabelTemplate {
            id: "t".into(),
            name: String::new(),
            description: String::new(),
            width_mm: 50.8,
            height_mm: 25.4,
            fields: vec![],
            engine_min_version: Some("99.0.0".into()),
        };
        let issue = check_engine_version(&template, Some("li")).unwrap();
        assert_eq!(issue.kind, LabelErrorKind::EngineVersionMismatch);

        template.engine_min_version = Some("0.1.0".into());
        assert!(check_engine_version(&template, Some("li")).is_none());

        template.engine_min_version = Some("not-a-version".into());
        assert_eq!(
            check_engine_version(&template, Some("li")).unwrap().kind,
            LabelErrorKind::ProcessingException
        );
    }

    #[test]
    fn test_non_finite_field_detected() {
        let mut field = text_field("x");
        assert!(field_is_finite(&field));
        field.font_size = Some(f64::NAN);
        assert!(!field_is_finite(&field));
    }
}

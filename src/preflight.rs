//! Preflight Validation
//!
//! Rules produce structured checks; the validator turns them into a verdict.
//! A failed critical check blocks printing, anything else only lowers the
//! score. Estimates in the report are heuristics, not measurements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::engines::{validate_against, EngineKind};
use crate::model::Order;
use crate::print::{BarcodeFormat, ElementType, PrintElement, PrintJob};
use crate::templates::LabelTemplate;
use crate::units::{mm_to_inches, MAX_LABEL_INCHES};

pub const MIN_READABLE_FONT_PT: f64 = 8.0;
pub const MIN_DOTS_PER_BARCODE_CHAR: f64 = 3.0;
pub const CODE128_MAX_LENGTH: usize = 48;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    Template,
    Data,
    Printer,
    Quality,
    Compliance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    /// Blocks printing.
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightCheck {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: CheckCategory,
    pub severity: CheckSeverity,
    pub passed: bool,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub affected_elements: Vec<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl PreflightCheck {
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_affected(mut self, elements: Vec<String>) -> Self {
        self.affected_elements = elements;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_failure(&self, severity: CheckSeverity) -> bool {
        !self.passed && self.severity == severity
    }
}

/// A named check over a compiled job.
pub trait PreflightRule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> CheckCategory;
    fn severity(&self) -> CheckSeverity;

    fn evaluate(&self, job: &PrintJob, template: &LabelTemplate, order: Option<&Order>) -> PreflightCheck;

    /// A check result carrying this rule's identity.
    fn outcome(&self, passed: bool, message: String) -> PreflightCheck {
        PreflightCheck {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            category: self.category(),
            severity: self.severity(),
            passed,
            message,
            suggestion: None,
            affected_elements: vec![],
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreflightStatus {
    Pass,
    Warning,
    Fail,
}

impl PreflightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Template,
    Data,
    Printer,
    Quality,
    Compliance,
    General,
}

impl From<CheckCategory> for RecommendationKind {
    fn from(category: CheckCategory) -> Self {
        match category {
            CheckCategory::Template => Self::Template,
            CheckCategory::Data => Self::Data,
            CheckCategory::Printer => Self::Printer,
            CheckCategory::Quality => Self::Quality,
            CheckCategory::Compliance => Self::Compliance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub title: String,
    pub description: String,
    pub action: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightScores {
    pub template_quality: u32,
    pub data_completeness: u32,
    pub printer_compatibility: u32,
    pub overall_score: u32,
}

/// Heuristic approximations, not guarantees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightEstimates {
    pub estimated_print_time: u64,
    pub estimated_file_size: u64,
    pub estimated_ink_usage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub job_id: String,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: PreflightStatus,
    pub can_print: bool,
    pub checks: Vec<PreflightCheck>,
    pub critical_issues: usize,
    pub warnings: usize,
    pub infos: usize,
    pub total_checks: usize,
    #[serde(flatten)]
    pub scores: PreflightScores,
    pub recommendations: Vec<Recommendation>,
    #[serde(flatten)]
    pub estimates: PreflightEstimates,
}

impl PreflightReport {
    pub fn check(&self, id: &str) -> Option<&PreflightCheck> {
        self.checks.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckInfo {
    pub id: String,
    pub name: String,
    pub category: CheckCategory,
}

/// Ordered registry of rules.
#[derive(Clone)]
pub struct PreflightValidator {
    rules: Vec<Arc<dyn PreflightRule>>,
}

impl PreflightValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Arc::new(TemplateDimensionsRule),
                Arc::new(ElementBoundsRule),
                Arc::new(RequiredContentRule),
                Arc::new(BarcodeContentRule),
                Arc::new(OrderReferenceRule),
                Arc::new(TextReadabilityRule),
                Arc::new(BarcodeDensityRule),
                Arc::new(PrinterCapabilitiesRule),
                Arc::new(ElementOverlapRule),
            ],
        }
    }

    /// A validator with no rules registered.
    pub fn empty() -> Self {
        Self { rules: vec![] }
    }

    /// Register a rule, replacing any rule with the same id in place.
    pub fn add_check(&mut self, rule: Arc<dyn PreflightRule>) {
        match self.rules.iter().position(|r| r.id() == rule.id()) {
            Some(index) => self.rules[index] = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove_check(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id() != id);
        self.rules.len() != before
    }

    pub fn available_checks(&self) -> Vec<CheckInfo> {
        self.rules
            .iter()
            .map(|r| CheckInfo {
                id: r.id().to_string(),
                name: r.name().to_string(),
                category: r.category(),
            })
            .collect()
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    pub fn validate_print_job(
        &self,
        job: &PrintJob,
        template: &LabelTemplate,
        order: Option<&Order>,
    ) -> PreflightReport {
        let checks: Vec<PreflightCheck> = self
            .rules
            .iter()
            .map(|rule| rule.evaluate(job, template, order))
            .collect();

        let count = |severity| checks.iter().filter(|c| c.is_failure(severity)).count();
        let critical_issues = count(CheckSeverity::Critical);
        let warnings = count(CheckSeverity::Warning);
        let infos = count(CheckSeverity::Info);

        let status = if critical_issues > 0 {
            PreflightStatus::Fail
        } else if warnings > 0 {
            PreflightStatus::Warning
        } else {
            PreflightStatus::Pass
        };

        let report = PreflightReport {
            job_id: job.id.clone(),
            order_number: Some(job.metadata.order_number.clone()).filter(|n| !n.is_empty()),
            product_name: Some(job.metadata.product_name.clone()).filter(|n| !n.is_empty()),
            timestamp: Utc::now(),
            status,
            can_print: critical_issues == 0,
            scores: scores(&checks),
            recommendations: recommendations(&checks, job),
            estimates: estimate(job),
            critical_issues,
            warnings,
            infos,
            total_checks: checks.len(),
            checks,
        };

        match report.status {
            PreflightStatus::Fail => warn!(
                status = report.status.as_str(),
                critical = report.critical_issues,
                warnings = report.warnings,
                score = report.scores.overall_score,
                "Preflight failed"
            ),
            _ => info!(
                status = report.status.as_str(),
                warnings = report.warnings,
                score = report.scores.overall_score,
                "Preflight completed"
            ),
        }
        report
    }
}

impl Default for PreflightValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn category_score(checks: &[PreflightCheck], category: CheckCategory) -> u32 {
    let in_category: Vec<&PreflightCheck> = checks.iter().filter(|c| c.category == category).collect();
    if in_category.is_empty() {
        return 100;
    }
    let passed = in_category.iter().filter(|c| c.passed).count();
    (100.0 * passed as f64 / in_category.len() as f64).round() as u32
}

fn scores(checks: &[PreflightCheck]) -> PreflightScores {
    let template_quality = category_score(checks, CheckCategory::Template);
    let data_completeness = category_score(checks, CheckCategory::Data);
    let printer_compatibility = category_score(checks, CheckCategory::Printer);
    let overall_score =
        ((template_quality + data_completeness + printer_compatibility) as f64 / 3.0).round() as u32;
    PreflightScores {
        template_quality,
        data_completeness,
        printer_compatibility,
        overall_score,
    }
}

fn recommendations(checks: &[PreflightCheck], job: &PrintJob) -> Vec<Recommendation> {
    let mut out = vec![];
    for check in checks.iter().filter(|c| c.is_failure(CheckSeverity::Critical)) {
        out.push(Recommendation {
            kind: check.category.into(),
            priority: RecommendationPriority::High,
            title: format!("Fix: {}", check.name),
            description: check.message.clone(),
            action: check
                .suggestion
                .clone()
                .unwrap_or_else(|| "Review and correct this issue before printing".into()),
        });
    }
    for check in checks.iter().filter(|c| c.is_failure(CheckSeverity::Warning)) {
        out.push(Recommendation {
            kind: check.category.into(),
            priority: RecommendationPriority::Medium,
            title: format!("Optimize: {}", check.name),
            description: check.message.clone(),
            action: check
                .suggestion
                .clone()
                .unwrap_or_else(|| "Consider addressing this for better print quality".into()),
        });
    }
    if job.elements.len() > 10 {
        out.push(Recommendation {
            kind: RecommendationKind::Template,
            priority: RecommendationPriority::Low,
            title: "Template Complexity".into(),
            description: "Template has many elements which may slow printing".into(),
            action: "Consider simplifying the design for faster printing".into(),
        });
    }
    if job.copies > 100 {
        out.push(Recommendation {
            kind: RecommendationKind::General,
            priority: RecommendationPriority::Medium,
            title: "Large Print Job".into(),
            description: format!("Printing {} labels", job.copies),
            action: "Consider processing in smaller batches for better performance".into(),
        });
    }
    out
}

/// Print time, output size and coverage heuristics.
pub fn estimate(job: &PrintJob) -> PreflightEstimates {
    let count = |pred: fn(&PrintElement) -> bool| job.elements.iter().filter(|el| pred(el)).count() as f64;
    let codes = count(|el| matches!(el.element_type, ElementType::Barcode | ElementType::Qr));
    let images = count(|el| el.element_type == ElementType::Image);
    let elements = job.elements.len() as f64;

    let per_label = 2.0 + 0.1 * elements + 0.3 * codes + 0.5 * images;
    let content_chars: usize = job.elements.iter().map(|el| el.content.chars().count()).sum();

    let label_area = job.dimensions.width_inches * job.dimensions.height_inches;
    let filled_area: f64 = job
        .elements
        .iter()
        .filter(|el| {
            el.background_color.is_some()
                || matches!(el.element_type, ElementType::Barcode | ElementType::Qr)
        })
        .map(|el| el.width * el.height)
        .sum();
    let ink = if label_area > 0.0 {
        (filled_area / label_area * 100.0).round().min(100.0) as u32
    } else {
        0
    };

    PreflightEstimates {
        estimated_print_time: (job.copies as f64 * per_label).round() as u64,
        estimated_file_size: 1024 + 200 * job.elements.len() as u64 + 2 * content_chars as u64,
        estimated_ink_usage: ink,
    }
}

/// Whether a barcode payload is encodable in its symbology.
pub fn barcode_content_is_valid(format: BarcodeFormat, content: &str) -> bool {
    let digits = |n: usize| content.len() == n && content.bytes().all(|b| b.is_ascii_digit());
    match format {
        BarcodeFormat::Code128 => (1..=CODE128_MAX_LENGTH).contains(&content.chars().count()),
        BarcodeFormat::Code39 => {
            !content.is_empty()
                && content
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "-. $/+%".contains(c))
        }
        BarcodeFormat::Upc => digits(12),
        BarcodeFormat::Ean13 => digits(13),
        BarcodeFormat::Ean8 => digits(8),
        BarcodeFormat::Code93 => !content.is_empty(),
    }
}

/// Every overlapping pair, by id. Shared edges do not count.
pub fn find_overlaps(elements: &[PrintElement]) -> Vec<(String, String)> {
    let mut overlaps = vec![];
    for (i, a) in elements.iter().enumerate() {
        for b in &elements[i + 1..] {
            if a.bounds().intersects(&b.bounds()) {
                overlaps.push((a.id.clone(), b.id.clone()));
            }
        }
    }
    overlaps
}

fn ids<'a>(elements: impl Iterator<Item = &'a PrintElement>) -> Vec<String> {
    elements.map(|el| el.id.clone()).collect()
}

// --- Built-in rules ---

pub struct TemplateDimensionsRule;

impl PreflightRule for TemplateDimensionsRule {
    fn id(&self) -> &str {
        "template-dimensions"
    }
    fn name(&self) -> &str {
        "Template Dimensions"
    }
    fn description(&self) -> &str {
        "Verify template has valid dimensions"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Template
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Critical
    }

    fn evaluate(&self, _job: &PrintJob, template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let width = mm_to_inches(template.width_mm);
        let height = mm_to_inches(template.height_mm);
        let positive = width > 0.0 && height > 0.0;
        let passed = positive && width <= MAX_LABEL_INCHES && height <= MAX_LABEL_INCHES;
        let message = if positive {
            format!("Template dimensions: {:.1}\" × {:.1}\"", width, height)
        } else {
            "Invalid template dimensions".to_string()
        };
        let check = self.outcome(passed, message);
        match (passed, positive) {
            (true, _) => check,
            (false, false) => check.with_suggestion("Set positive width and height values"),
            (false, true) => check.with_suggestion("Template exceeds maximum size (12\" × 12\")"),
        }
    }
}

pub struct ElementBoundsRule;

impl PreflightRule for ElementBoundsRule {
    fn id(&self) -> &str {
        "element-bounds"
    }
    fn name(&self) -> &str {
        "Element Boundaries"
    }
    fn description(&self) -> &str {
        "Check all elements are within label boundaries"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Template
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Critical
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let dims = &job.dimensions;
        let outside = ids(job
            .elements
            .iter()
            .filter(|el| !el.bounds().fits_within(dims.width_inches, dims.height_inches)));
        let message = if outside.is_empty() {
            "All elements within bounds".to_string()
        } else {
            format!("{} elements extend beyond label boundaries", outside.len())
        };
        self.outcome(outside.is_empty(), message)
            .with_affected(outside)
            .with_suggestion("Resize or reposition out-of-bounds elements")
    }
}

pub struct RequiredContentRule;

impl PreflightRule for RequiredContentRule {
    fn id(&self) -> &str {
        "required-content"
    }
    fn name(&self) -> &str {
        "Required Content"
    }
    fn description(&self) -> &str {
        "Check all elements have required content"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Data
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let empty = ids(job
            .elements
            .iter()
            .filter(|el| el.element_type.needs_content() && !el.has_content()));
        let message = if empty.is_empty() {
            "All elements have content".to_string()
        } else {
            format!("{} elements are missing content", empty.len())
        };
        self.outcome(empty.is_empty(), message)
            .with_affected(empty)
            .with_suggestion("Provide content for empty text, barcode, or QR elements")
    }
}

pub struct BarcodeContentRule;

impl PreflightRule for BarcodeContentRule {
    fn id(&self) -> &str {
        "barcode-validation"
    }
    fn name(&self) -> &str {
        "Barcode Validation"
    }
    fn description(&self) -> &str {
        "Validate barcode content and format"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Data
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Critical
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let barcodes: Vec<&PrintElement> = job
            .elements
            .iter()
            .filter(|el| el.element_type == ElementType::Barcode)
            .collect();
        let invalid = ids(barcodes
            .iter()
            .copied()
            .filter(|el| !barcode_content_is_valid(el.barcode_format, &el.content)));
        let message = if invalid.is_empty() {
            format!("{} barcodes validated", barcodes.len())
        } else {
            format!("{} barcodes have invalid content", invalid.len())
        };
        self.outcome(invalid.is_empty(), message)
            .with_affected(invalid)
            .with_suggestion("Verify barcode content matches the selected format requirements")
    }
}

/// The job must belong to the order it is printed for.
pub struct OrderReferenceRule;

impl PreflightRule for OrderReferenceRule {
    fn id(&self) -> &str {
        "order-reference"
    }
    fn name(&self) -> &str {
        "Order Reference"
    }
    fn description(&self) -> &str {
        "Check the job was compiled for the supplied order"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Data
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Info
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, order: Option<&Order>) -> PreflightCheck {
        let Some(order) = order else {
            return self.outcome(true, "No order supplied".to_string());
        };
        let matches = job.metadata.order_number == order.order_number
            && order.line_item(&job.metadata.line_item_id).is_some();
        if matches {
            self.outcome(true, format!("Job matches order {}", order.order_number))
        } else {
            self.outcome(
                false,
                format!(
                    "Job was compiled for order {} but is checked against {}",
                    job.metadata.order_number, order.order_number
                ),
            )
            .with_suggestion("Recompile the label for this order")
        }
    }
}

pub struct TextReadabilityRule;

impl PreflightRule for TextReadabilityRule {
    fn id(&self) -> &str {
        "text-readability"
    }
    fn name(&self) -> &str {
        "Text Readability"
    }
    fn description(&self) -> &str {
        "Check text size for readability"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Quality
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let small = ids(job
            .elements
            .iter()
            .filter(|el| el.element_type == ElementType::Text && el.font_size < MIN_READABLE_FONT_PT));
        let message = if small.is_empty() {
            "All text is readable size".to_string()
        } else {
            format!("{} text elements may be too small", small.len())
        };
        self.outcome(small.is_empty(), message)
            .with_affected(small)
            .with_suggestion("Consider increasing font size to 8pt or larger for better readability")
    }
}

pub struct BarcodeDensityRule;

impl PreflightRule for BarcodeDensityRule {
    fn id(&self) -> &str {
        "barcode-density"
    }
    fn name(&self) -> &str {
        "Barcode Print Density"
    }
    fn description(&self) -> &str {
        "Check barcode elements have sufficient print density"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Quality
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let dpi = job.dimensions.dpi as f64;
        let sparse = ids(job.elements.iter().filter(|el| {
            let chars = el.content.chars().count();
            el.element_type == ElementType::Barcode
                && chars > 0
                && el.width * dpi / (chars as f64) < MIN_DOTS_PER_BARCODE_CHAR
        }));
        let message = if sparse.is_empty() {
            "Barcode density acceptable".to_string()
        } else {
            format!("{} barcodes may print poorly", sparse.len())
        };
        self.outcome(sparse.is_empty(), message)
            .with_affected(sparse)
            .with_suggestion("Increase barcode width or reduce content length for better print quality")
    }
}

/// Runs the target engine's element validation.
pub struct PrinterCapabilitiesRule;

impl PreflightRule for PrinterCapabilitiesRule {
    fn id(&self) -> &str {
        "printer-capabilities"
    }
    fn name(&self) -> &str {
        "Printer Capabilities"
    }
    fn description(&self) -> &str {
        "Check elements are supported by target printer"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Printer
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let engine = job.metadata.engine.unwrap_or(EngineKind::Pdf);
        let result = validate_against(&engine.capabilities(), &job.elements, &job.dimensions);
        let element_types: BTreeSet<&str> = job.elements.iter().map(|el| el.element_type.as_str()).collect();
        let details = json!({
            "engine": engine.as_str(),
            "hasColor": job.elements.iter().any(|el| el.uses_color()),
            "hasImages": job.elements.iter().any(|el| el.element_type == ElementType::Image),
            "elementTypes": element_types,
            "errors": result.errors,
            "warnings": result.warnings,
        });
        let message = if result.is_valid {
            format!("Elements compatible with {}", engine)
        } else {
            format!("{} issues with {}: {}", result.errors.len(), engine, result.errors.join("; "))
        };
        self.outcome(result.is_valid, message)
            .with_details(details)
            .with_suggestion("Choose a printer that supports every element or simplify the template")
    }
}

pub struct ElementOverlapRule;

impl PreflightRule for ElementOverlapRule {
    fn id(&self) -> &str {
        "element-overlap"
    }
    fn name(&self) -> &str {
        "Element Overlap"
    }
    fn description(&self) -> &str {
        "Check for overlapping elements that may cause print issues"
    }
    fn category(&self) -> CheckCategory {
        CheckCategory::Quality
    }
    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, job: &PrintJob, _template: &LabelTemplate, _order: Option<&Order>) -> PreflightCheck {
        let overlaps = find_overlaps(&job.elements);
        let message = if overlaps.is_empty() {
            "No element overlaps detected".to_string()
        } else {
            format!("{} potential overlaps detected", overlaps.len())
        };
        let affected = overlaps.iter().flat_map(|(a, b)| [a.clone(), b.clone()]).collect();
        self.outcome(overlaps.is_empty(), message)
            .with_affected(affected)
            .with_suggestion("Adjust element positions to avoid overlaps")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{Alignment, FontWeight, JobMetadata};
    use crate::units::PrintDimensions;

    fn el(id: &str, element_type: ElementType, x: f64, y: f64, w: f64, h: f64) -> PrintElement {
        PrintElement {
            id: id.into(),
            element_type,
            x,
            y,
            width: w,
            height: h,
            content: "TEST-001".into(),
            font_size: 12.0,
            font_family: "helvetica".into(),
            font_weight: FontWeight::Normal,
            color: "#000000".into(),
            background_color: None,
            border_color: None,
            border_width: None,
            alignment: Alignment::Left,
            rotation: 0.0,
            show_text: true,
            barcode_format: BarcodeFormat::Code128,
            image_data: None,
        }
    }

    fn job(elements: Vec<PrintElement>) -> PrintJob {
        PrintJob {
            id: "job-1".into(),
            template_id: "t".into(),
            elements,
            dimensions: PrintDimensions::from_inches(2.0, 1.0, 203),
            copies: 1,
            metadata: JobMetadata {
                order_id: "o-1".into(),
                order_number: "1001".into(),
                line_item_id: "li-1".into(),
                product_name: "Soap".into(),
                customer_name: None,
                vendor_id: "v".into(),
                profile_id: "p".into(),
                engine: Some(EngineKind::Pdf),
                label_type: "product".into(),
                created_at: Utc::now(),
                fingerprint: String::new(),
            },
        }
    }

    fn template() -> LabelTemplate {
        LabelTemplate {
            id: "t".into(),
            name: "Product".into(),
            description: String::new(),
            width_mm: 50.8,
            height_mm: 25.4,
            fields: vec![],
            engine_min_version: None,
        }
    }

    #[test]
    fn test_clean_job_passes() {
        let report = PreflightValidator::new().validate_print_job(
            &job(vec![
                el("name", ElementType::Text, 0.1, 0.05, 1.8, 0.3),
                el("sku", ElementType::Barcode, 0.1, 0.4, 1.8, 0.5),
            ]),
            &template(),
            None,
        );
        assert_eq!(report.status, PreflightStatus::Pass);
        assert!(report.can_print);
        assert_eq!(report.total_checks, 9);
        assert_eq!(report.scores.overall_score, 100);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_barcode_rules() {
        assert!(barcode_content_is_valid(BarcodeFormat::Code128, &"A".repeat(48)));
        assert!(!barcode_content_is_valid(BarcodeFormat::Code128, &"A".repeat(49)));
        assert!(!barcode_content_is_valid(BarcodeFormat::Code128, ""));
        assert!(barcode_content_is_valid(BarcodeFormat::Upc, "123456789012"));
        assert!(!barcode_content_is_valid(BarcodeFormat::Upc, "12345"));
        assert!(barcode_content_is_valid(BarcodeFormat::Ean13, "1234567890123"));
        assert!(barcode_content_is_valid(BarcodeFormat::Code39, "ABC-12 $/+%."));
        assert!(!barcode_content_is_valid(BarcodeFormat::Code39, "abc"));
    }

    #[test]
    fn test_invalid_barcode_blocks_printing() {
        let mut upc = el("upc", ElementType::Barcode, 0.1, 0.1, 1.5, 0.5);
        upc.barcode_format = BarcodeFormat::Upc;
        upc.content = "12345".into();
        let report = PreflightValidator::new().validate_print_job(&job(vec![upc]), &template(), None);
        assert_eq!(report.status, PreflightStatus::Fail);
        assert!(!report.can_print);
        assert_eq!(report.critical_issues, 1);
        let check = report.check("barcode-validation").unwrap();
        assert_eq!(check.affected_elements, vec!["upc"]);
        assert_eq!(report.recommendations[0].priority, RecommendationPriority::High);
        assert_eq!(report.recommendations[0].title, "Fix: Barcode Validation");
        // two of the three data checks pass
        assert_eq!(report.scores.data_completeness, 67);
    }

    #[test]
    fn test_overlap_detection() {
        let a = el("a", ElementType::Rectangle, 0.0, 0.0, 10.0, 10.0);
        let b = el("b", ElementType::Rectangle, 5.0, 5.0, 10.0, 10.0);
        let c = el("c", ElementType::Rectangle, 10.0, 0.0, 10.0, 10.0);
        assert_eq!(find_overlaps(&[a.clone(), b]), vec![("a".to_string(), "b".to_string())]);
        assert!(find_overlaps(&[a, c]).is_empty());
    }

    #[test]
    fn test_warnings_do_not_block() {
        let mut tiny = el("tiny", ElementType::Text, 0.1, 0.1, 1.0, 0.2);
        tiny.font_size = 6.0;
        let report = PreflightValidator::new().validate_print_job(&job(vec![tiny]), &template(), None);
        assert_eq!(report.status, PreflightStatus::Warning);
        assert!(report.can_print);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.recommendations[0].title, "Optimize: Text Readability");
    }

    #[test]
    fn test_printer_capabilities_use_job_engine() {
        let image = el("logo", ElementType::Image, 0.1, 0.1, 0.5, 0.5);
        let mut zpl_job = job(vec![image]);
        zpl_job.metadata.engine = Some(EngineKind::Zpl);
        let report = PreflightValidator::new().validate_print_job(&zpl_job, &template(), None);
        let check = report.check("printer-capabilities").unwrap();
        assert!(!check.passed);
        assert_eq!(report.scores.printer_compatibility, 0);
        assert!(report.can_print);
    }

    #[test]
    fn test_estimates() {
        let mut copies = job(vec![
            el("t", ElementType::Text, 0.0, 0.0, 1.0, 0.5),
            el("b", ElementType::Barcode, 1.0, 0.0, 1.0, 0.5),
        ]);
        copies.copies = 10;
        let e = estimate(&copies);
        // 10 * (2 + 0.2 + 0.3)
        assert_eq!(e.estimated_print_time, 25);
        assert_eq!(e.estimated_file_size, 1024 + 400 + 32);
        assert_eq!(e.estimated_ink_usage, 25);
    }

    #[test]
    fn test_large_job_and_complexity_recommendations() {
        let elements = (0..11)
            .map(|i| el(&format!("e{}", i), ElementType::Line, 0.1 * i as f64, 0.0, 0.05, 0.5))
            .collect();
        let mut big = job(elements);
        big.copies = 150;
        let report = PreflightValidator::new().validate_print_job(&big, &template(), None);
        let titles: Vec<&str> = report.recommendations.iter().map(|r| r.title.as_str()).collect();
        assert!(titles.contains(&"Template Complexity"));
        assert!(titles.contains(&"Large Print Job"));
    }

    struct AlwaysFails;

    impl PreflightRule for AlwaysFails {
        fn id(&self) -> &str {
            "house-rule"
        }
        fn name(&self) -> &str {
            "House Rule"
        }
        fn description(&self) -> &str {
            "Rejects everything"
        }
        fn category(&self) -> CheckCategory {
            CheckCategory::Compliance
        }
        fn severity(&self) -> CheckSeverity {
            CheckSeverity::Critical
        }
        fn evaluate(&self, _job: &PrintJob, _t: &LabelTemplate, _o: Option<&Order>) -> PreflightCheck {
            self.outcome(false, "nope".into())
        }
    }

    #[test]
    fn test_registry_operations() {
        let mut validator = PreflightValidator::new();
        assert_eq!(validator.available_checks().len(), 9);
        validator.add_check(Arc::new(AlwaysFails));
        assert_eq!(validator.available_checks().len(), 10);
        let report = validator.validate_print_job(&job(vec![]), &template(), None);
        assert!(!report.can_print);

        assert!(validator.remove_check("house-rule"));
        assert!(!validator.remove_check("house-rule"));
        assert!(validator.remove_check("element-overlap"));
        let ids: Vec<String> = validator.available_checks().into_iter().map(|c| c.id).collect();
        assert!(!ids.contains(&"element-overlap".to_string()));
        assert!(PreflightValidator::empty().available_checks().is_empty());
    }
}

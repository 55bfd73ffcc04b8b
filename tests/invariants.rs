//! Contract Invariant Tests
//!
//! Properties every release must keep, exercised through the public API.

mod common;

use labelforge_core::{
    compiler::compile_fields,
    preflight::{barcode_content_is_valid, find_overlaps},
    print::BarcodeFormat,
    templates::FieldType,
    units::{inches_to_pixels, inches_to_points, pixels_to_inches, points_to_inches, Rect},
    ContextOptions, DataContext, EngineKind, LabelErrorKind, LabelResolutionRequest, PipelineConfig,
    PreflightStatus, ProductVariant, ProfileResolver, ProfileSource, TemplateField,
};

use common::*;

#[test]
fn invariant_hierarchy_picks_highest_configured_level() {
    for mask in 0u8..16 {
        let mut item = line_item("li", "SKU", "Soap", (mask & 4 != 0).then_some("product-p"));
        if mask & 1 != 0 {
            item.label_profile_id = Some("order-p".into());
        }
        if mask & 2 != 0 {
            item.variant = Some(ProductVariant {
                id: "var".into(),
                name: "Large".into(),
                label_profile_id: Some("variant-p".into()),
                ..Default::default()
            });
        }
        let resolver = ProfileResolver::new((mask & 8 != 0).then(|| "system-p".to_string()));
        let resolution = resolver.resolve_line_item(&item);

        let (expected_id, expected_source) = if mask & 1 != 0 {
            (Some("order-p"), ProfileSource::Order)
        } else if mask & 2 != 0 {
            (Some("variant-p"), ProfileSource::Variant)
        } else if mask & 4 != 0 {
            (Some("product-p"), ProfileSource::Product)
        } else if mask & 8 != 0 {
            (Some("system-p"), ProfileSource::System)
        } else {
            (None, ProfileSource::None)
        };
        assert_eq!(resolution.active_profile_id.as_deref(), expected_id, "mask {}", mask);
        assert_eq!(resolution.source, expected_source, "mask {}", mask);

        let active = resolution.hierarchy.iter().filter(|l| l.is_active).count();
        assert_eq!(active, usize::from(expected_id.is_some()), "mask {}", mask);
    }
}

#[test]
fn invariant_unit_round_trips() {
    for dpi in [72, 96, 203, 300, 600, 1200] {
        for x in [0.01, 0.25, 1.0, 2.0, 4.0, 11.99] {
            assert!((pixels_to_inches(inches_to_pixels(x, dpi), dpi) - x).abs() < 1e-9);
        }
    }
    for x in [0.01, 0.5, 1.0, 8.5, 12.0] {
        assert!((points_to_inches(inches_to_points(x)) - x).abs() < 1e-9);
    }
}

#[tokio::test]
async fn invariant_compilation_is_idempotent() {
    let pipeline = pipeline(PipelineConfig::default());
    let request = LabelResolutionRequest::new(test_order());

    let first = pipeline.resolve_order(&request).await;
    let second = pipeline.resolve_order(&request).await;
    assert!(first.success && second.success);

    let (a, b) = (&first.print_jobs[0], &second.print_jobs[0]);
    assert_eq!(a.elements, b.elements);
    assert_eq!(a.metadata.fingerprint, b.metadata.fingerprint);
    assert_eq!(
        serde_json::to_vec(&a.elements).unwrap(),
        serde_json::to_vec(&b.elements).unwrap()
    );
    // Job ids stay unique per compilation.
    assert_ne!(a.id, b.id);
}

#[test]
fn invariant_bad_geometry_is_rejected_not_dropped() {
    let order = test_order();
    let item = &order.line_items[0];
    let context = DataContext::build(&order, item, &ContextOptions::default());

    for (x, y, w, h) in [(-1.0, 0.0, 10.0, 10.0), (0.0, -1.0, 10.0, 10.0), (0.0, 0.0, 0.0, 10.0), (0.0, 0.0, 10.0, -2.0)] {
        let fields = vec![TemplateField::new("bad", FieldType::Text, x, y, w, h).with_content("x")];
        let elements = compile_fields(&fields, &context);
        assert_eq!(elements.len(), 1);
        let (errors, _) = labelforge_core::compiler::validate_compiled_elements(&elements, &item.id);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LabelErrorKind::InvalidGeometry);
        assert_eq!(errors[0].line_item_id.as_deref(), Some("li-1"));
        assert!(errors[0].suggestion.is_some());
    }
}

#[test]
fn invariant_barcode_payload_rules() {
    assert!(barcode_content_is_valid(BarcodeFormat::Code128, &"9".repeat(48)));
    assert!(!barcode_content_is_valid(BarcodeFormat::Code128, &"9".repeat(49)));
    assert!(barcode_content_is_valid(BarcodeFormat::Upc, "123456789012"));
    assert!(!barcode_content_is_valid(BarcodeFormat::Upc, "12345"));
}

#[test]
fn invariant_overlap_excludes_touching_edges() {
    assert!(Rect::new(0.0, 0.0, 10.0, 10.0).intersects(&Rect::new(5.0, 5.0, 10.0, 10.0)));
    assert!(!Rect::new(0.0, 0.0, 10.0, 10.0).intersects(&Rect::new(10.0, 0.0, 10.0, 10.0)));

    let order = test_order();
    let context = DataContext::build(&order, &order.line_items[0], &ContextOptions::default());
    let field = |id: &str, x: f64, y: f64| TemplateField::new(id, FieldType::Rectangle, x, y, 10.0, 10.0);
    let overlapping = compile_fields(&[field("a", 0.0, 0.0), field("b", 5.0, 5.0)], &context);
    let touching = compile_fields(&[field("a", 0.0, 0.0), field("c", 10.0, 0.0)], &context);
    assert_eq!(find_overlaps(&overlapping), vec![("a".to_string(), "b".to_string())]);
    assert!(find_overlaps(&touching).is_empty());
}

#[tokio::test]
async fn invariant_end_to_end_pdf_label() {
    let pipeline = pipeline(PipelineConfig::default());
    let result = pipeline
        .compile_single_order(test_order(), Some(EngineKind::Pdf), None)
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    let output = result.output.expect("output");
    assert_eq!(output.format, EngineKind::Pdf);
    assert_eq!(output.mime_type, "application/pdf");
    assert!(output.bytes().starts_with(b"%PDF-"));

    let pdf = String::from_utf8_lossy(output.bytes());
    assert!(pdf.contains("/MediaBox [0 0 144 72]"));
    assert!(pdf.contains("(Lavender Soap) Tj"));

    let preflight = result.preflight.expect("preflight");
    assert_eq!(preflight.status, PreflightStatus::Pass, "{:#?}", preflight.checks);
    assert!(preflight.can_print);
    assert_eq!(preflight.order_number.as_deref(), Some("1001"));

    let preview = result.preview.expect("preview");
    assert_eq!((preview.width, preview.height), (300, 150));
    assert!(preview.image_data.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn invariant_unresolvable_item_reports_suggestion() {
    let pipeline = pipeline(PipelineConfig::default());
    let order = order("ord-9", "1009", vec![line_item("li-9", "X-1", "Mystery", None)]);
    let result = pipeline.resolve_order(&LabelResolutionRequest::new(order)).await;

    assert!(!result.success);
    assert!(result.print_jobs.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, LabelErrorKind::NoProfileResolved);
    assert_eq!(result.errors[0].line_item_id.as_deref(), Some("li-9"));
}

#[tokio::test]
async fn invariant_system_default_fills_gaps() {
    let config = PipelineConfig {
        system_default_profile_id: Some(ZPL_PROFILE.into()),
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(config);
    let order = order("ord-9", "1009", vec![line_item("li-9", "X-1", "Mystery", None)]);
    let result = pipeline.resolve_order(&LabelResolutionRequest::new(order)).await;

    assert!(result.success);
    let resolution = result.resolution.expect("resolution");
    assert_eq!(resolution.source, ProfileSource::System);
    assert_eq!(result.print_jobs[0].metadata.engine, Some(EngineKind::Zpl));
}

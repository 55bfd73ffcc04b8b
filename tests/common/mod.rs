//! Shared fixtures: a 2in x 1in product label and a small catalog of orders.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use labelforge_core::{
    model::{Customer, Vendor},
    print::BarcodeFormat,
    templates::FieldType,
    EngineKind, InMemoryTemplateStore, LabelPipeline, LabelProfile, LabelTemplate, Order,
    OrderLineItem, PipelineConfig, Product, TemplateField, TemplateStore,
};

pub const PDF_PROFILE: &str = "product-2x1";
pub const ZPL_PROFILE: &str = "product-2x1-zpl";
pub const TEMPLATE_ID: &str = "tpl-2x1";

pub fn product_template() -> LabelTemplate {
    let mut barcode = TemplateField::new("sku", FieldType::Barcode, 2.54, 10.16, 45.72, 12.7)
        .with_data_source("product.sku");
    barcode.barcode_format = Some(BarcodeFormat::Code128);
    LabelTemplate {
        id: TEMPLATE_ID.into(),
        name: "Product 2x1".into(),
        description: "Name and SKU barcode".into(),
        width_mm: 50.8,
        height_mm: 25.4,
        fields: vec![
            TemplateField::new("name", FieldType::Text, 2.54, 1.27, 45.72, 7.62)
                .with_content("{{product.name}}"),
            barcode,
        ],
        engine_min_version: Some("1.0.0".into()),
    }
}

pub fn store() -> InMemoryTemplateStore {
    let mut store = InMemoryTemplateStore::new();
    store.register_template(product_template());
    for (id, engine) in [(PDF_PROFILE, EngineKind::Pdf), (ZPL_PROFILE, EngineKind::Zpl)] {
        store.register_profile(LabelProfile {
            id: id.into(),
            name: format!("Product label ({})", engine),
            engine,
            media_width_in: 2.0,
            media_height_in: 1.0,
            template_id: Some(TEMPLATE_ID.into()),
        });
    }
    store
}

pub fn pipeline(config: PipelineConfig) -> LabelPipeline {
    let store: Arc<dyn TemplateStore> = Arc::new(store());
    LabelPipeline::new(config, store).unwrap()
}

pub fn line_item(id: &str, sku: &str, name: &str, product_profile: Option<&str>) -> OrderLineItem {
    OrderLineItem {
        id: id.into(),
        product_id: format!("prod-{}", id),
        product_name: name.into(),
        quantity: 1,
        unit_price: 12.5,
        total_price: 12.5,
        sku: sku.into(),
        product: Some(Product {
            id: format!("prod-{}", id),
            name: name.into(),
            sku: Some(sku.into()),
            label_profile_id: product_profile.map(String::from),
        }),
        ..Default::default()
    }
}

pub fn order(id: &str, number: &str, items: Vec<OrderLineItem>) -> Order {
    Order {
        id: id.into(),
        order_number: number.into(),
        status: Default::default(),
        customer: Customer {
            id: "cust-1".into(),
            name: "Ada Lovelace".into(),
            ..Default::default()
        },
        vendor: Vendor {
            id: "vendor-1".into(),
            business_name: "Hollow Creek Soapworks".into(),
            ..Default::default()
        },
        line_items: items,
        created_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap(),
        expected_delivery: None,
        shipping_method: None,
        tracking_number: None,
        subtotal: 12.5,
        tax: 0.0,
        shipping: 0.0,
        total: 12.5,
        priority: None,
        special_instructions: None,
        custom_fields: Default::default(),
    }
}

/// One line item, SKU `TEST-001`, resolving to the PDF product profile.
pub fn test_order() -> Order {
    order(
        "ord-1",
        "1001",
        vec![line_item("li-1", "TEST-001", "Lavender Soap", Some(PDF_PROFILE))],
    )
}

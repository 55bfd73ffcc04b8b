//! Data Context & Interpolation
//!
//! A typed view of the order data a template may reference through
//! `{{scope.key}}` placeholders or a field's `dataSource` path. Scopes that
//! carry personal or commercial data are only populated when the matching
//! option flag is set.
//!
//! A path that resolves to nothing renders as the empty string. Templates are
//! allowed to reference optional data, so a missing value is never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{Order, OrderLineItem};

const DATE_FORMAT: &str = "%m/%d/%Y";

/// Flags gating which scopes are built, plus caller-supplied extra data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOptions {
    pub include_customer: bool,
    pub include_vendor: bool,
    pub include_pricing: bool,
    pub include_nutrition: bool,
    pub custom_data: BTreeMap<String, Value>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_customer: true,
            include_vendor: true,
            include_pricing: true,
            include_nutrition: false,
            custom_data: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderScope {
    pub id: String,
    pub number: String,
    pub status: String,
    pub date: String,
    pub priority: String,
    pub tracking_number: String,
    pub expected_delivery: String,
    pub shipping_method: String,
    pub special_instructions: String,
}

impl OrderScope {
    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "id" => &self.id,
            "number" => &self.number,
            "status" => &self.status,
            "date" => &self.date,
            "priority" => &self.priority,
            "trackingNumber" => &self.tracking_number,
            "expectedDelivery" => &self.expected_delivery,
            "shippingMethod" => &self.shipping_method,
            "specialInstructions" => &self.special_instructions,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductScope {
    pub id: String,
    pub name: String,
    pub sku: String,
    /// Only set when pricing is included.
    pub price: Option<String>,
    pub quantity: String,
    pub weight: String,
    pub dimensions: String,
    pub ingredients: String,
    pub allergens: String,
    pub expiration_date: String,
    pub lot_number: String,
}

impl ProductScope {
    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "id" => &self.id,
            "name" => &self.name,
            "sku" => &self.sku,
            "price" => return self.price.as_deref(),
            "quantity" => &self.quantity,
            "weight" => &self.weight,
            "dimensions" => &self.dimensions,
            "ingredients" => &self.ingredients,
            "allergens" => &self.allergens,
            "expirationDate" | "bestBy" => &self.expiration_date,
            "lotNumber" => &self.lot_number,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantScope {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub attributes: String,
}

impl VariantScope {
    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "id" => &self.id,
            "name" => &self.name,
            "sku" => &self.sku,
            "attributes" => &self.attributes,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerScope {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub full_address: String,
}

impl CustomerScope {
    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "name" => &self.name,
            "email" => &self.email,
            "phone" => &self.phone,
            "address" => &self.address,
            "city" => &self.city,
            "state" => &self.state,
            "zipCode" => &self.zip_code,
            "country" => &self.country,
            "fullAddress" => &self.full_address,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorScope {
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub website: String,
    pub contact_card: String,
}

impl VendorScope {
    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "businessName" => &self.business_name,
            "contactName" => &self.contact_name,
            "email" => &self.email,
            "phone" => &self.phone,
            "address" => &self.address,
            "city" => &self.city,
            "state" => &self.state,
            "zipCode" => &self.zip_code,
            "website" => &self.website,
            "contactCard" => &self.contact_card,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    pub order: OrderScope,
    pub product: ProductScope,
    pub variant: Option<VariantScope>,
    pub customer: Option<CustomerScope>,
    pub vendor: Option<VendorScope>,
    pub nutrition: Option<BTreeMap<String, Value>>,
    /// Barcode payload; the line item SKU.
    pub barcode: String,
    /// Compact JSON `{order, product, customer}`.
    pub qr_code: String,
    pub tracking_number: String,
    pub custom_data: BTreeMap<String, Value>,
}

impl DataContext {
    pub fn build(order: &Order, item: &OrderLineItem, options: &ContextOptions) -> Self {
        let order_scope = OrderScope {
            id: order.id.clone(),
            number: order.order_number.clone(),
            status: order.status.as_str().to_string(),
            date: order.created_at.format(DATE_FORMAT).to_string(),
            priority: order.priority.unwrap_or_default().as_str().to_string(),
            tracking_number: order.tracking_number.clone().unwrap_or_default(),
            expected_delivery: order
                .expected_delivery
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            shipping_method: order.shipping_method.clone().unwrap_or_default(),
            special_instructions: order.special_instructions.clone().unwrap_or_default(),
        };

        let product = ProductScope {
            id: item.product_id.clone(),
            name: item.product_name.clone(),
            sku: item.sku.clone(),
            price: options
                .include_pricing
                .then(|| format!("${:.2}", item.unit_price)),
            quantity: item.quantity.to_string(),
            weight: item.weight.map(|w| w.to_string()).unwrap_or_default(),
            dimensions: item.dimensions.clone().unwrap_or_default(),
            ingredients: item.ingredients.clone().unwrap_or_default(),
            allergens: item.allergens.join(", "),
            expiration_date: item.expiration_date.clone().unwrap_or_default(),
            lot_number: item.lot_number.clone().unwrap_or_default(),
        };

        let variant = item.variant.as_ref().map(|variant| VariantScope {
            id: item.variant_id.clone().unwrap_or_else(|| variant.id.clone()),
            name: item.variant_name.clone().unwrap_or_else(|| variant.name.clone()),
            sku: variant.sku.clone().unwrap_or_default(),
            attributes: variant
                .attributes
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
        });

        let customer = options.include_customer.then(|| {
            let c = &order.customer;
            CustomerScope {
                name: c.name.clone(),
                email: c.email.clone().unwrap_or_default(),
                phone: c.phone.clone().unwrap_or_default(),
                address: c.address.street.clone(),
                city: c.address.city.clone(),
                state: c.address.state.clone(),
                zip_code: c.address.zip_code.clone(),
                country: c.address.country.clone(),
                full_address: c.address.one_line(),
            }
        });

        let vendor = options.include_vendor.then(|| {
            let v = &order.vendor;
            VendorScope {
                business_name: v.business_name.clone(),
                contact_name: v.contact_name.clone().unwrap_or_default(),
                email: v.email.clone().unwrap_or_default(),
                phone: v.phone.clone().unwrap_or_default(),
                address: v.address.street.clone(),
                city: v.address.city.clone(),
                state: v.address.state.clone(),
                zip_code: v.address.zip_code.clone(),
                website: v.website.clone().unwrap_or_default(),
                contact_card: serde_json::json!({
                    "name": v.business_name,
                    "phone": v.phone,
                    "website": v.website,
                })
                .to_string(),
            }
        });

        Self {
            order: order_scope,
            product,
            variant,
            customer,
            vendor,
            nutrition: options.include_nutrition.then(|| item.nutrition_info.clone()),
            barcode: item.sku.clone(),
            qr_code: serde_json::json!({
                "order": order.order_number,
                "product": item.sku,
                "customer": order.customer.name,
            })
            .to_string(),
            tracking_number: order.tracking_number.clone().unwrap_or_default(),
            custom_data: options.custom_data.clone(),
        }
    }

    /// Look up a dot path. `None` means nothing is bound there.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let path = path.trim();
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let scoped = |value: Option<&str>| value.map(str::to_string);
        match (head, rest) {
            ("order", Some(key)) => scoped(self.order.get(key)),
            ("product", Some(key)) => scoped(self.product.get(key)),
            ("variant", Some(key)) => scoped(self.variant.as_ref()?.get(key)),
            ("customer", Some(key)) => scoped(self.customer.as_ref()?.get(key)),
            ("vendor", Some(key)) => scoped(self.vendor.as_ref()?.get(key)),
            ("nutrition", Some(key)) => {
                let nutrition = self.nutrition.as_ref()?;
                lookup_value(nutrition, key)
            }
            ("barcode", None) => Some(self.barcode.clone()),
            ("qrCode", None) => Some(self.qr_code.clone()),
            ("trackingNumber", None) => Some(self.tracking_number.clone()),
            _ => lookup_value(&self.custom_data, path),
        }
    }

    /// Replace every `{{path}}` with its resolved value.
    ///
    /// An opening `{{` with no matching `}}` is kept literally.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) if end > 0 && !after[..end].contains('}') => {
                    out.push_str(&self.resolve(&after[..end]).unwrap_or_default());
                    rest = &after[end + 2..];
                }
                _ => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn lookup_value(root: &BTreeMap<String, Value>, path: &str) -> Option<String> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    render_value(current)
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Customer, ProductVariant, Vendor};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn order() -> Order {
        Order {
            id: "o1".into(),
            order_number: "ORD-1001".into(),
            status: Default::default(),
            customer: Customer {
                id: "c1".into(),
                name: "Ada".into(),
                address: Address {
                    street: "1 Main St".into(),
                    city: "Springfield".into(),
                    state: "IL".into(),
                    zip_code: "62701".into(),
                    country: "US".into(),
                },
                ..Default::default()
            },
            vendor: Vendor {
                id: "v1".into(),
                business_name: "Acme Farm".into(),
                phone: Some("555-0100".into()),
                ..Default::default()
            },
            line_items: vec![],
            created_at: Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap(),
            expected_delivery: None,
            shipping_method: None,
            tracking_number: Some("1Z999".into()),
            subtotal: 0.0,
            tax: 0.0,
            shipping: 0.0,
            total: 0.0,
            priority: None,
            special_instructions: None,
            custom_fields: Default::default(),
        }
    }

    fn item() -> OrderLineItem {
        OrderLineItem {
            id: "li1".into(),
            product_id: "p1".into(),
            product_name: "Honey".into(),
            quantity: 3,
            unit_price: 4.5,
            sku: "HNY-01".into(),
            allergens: vec!["pollen".into(), "nuts".into()],
            nutrition_info: [("calories".to_string(), json!(60))].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_order_and_product_scopes() {
        let ctx = DataContext::build(&order(), &item(), &ContextOptions::default());
        assert_eq!(ctx.resolve("order.number").as_deref(), Some("ORD-1001"));
        assert_eq!(ctx.resolve("order.date").as_deref(), Some("03/07/2024"));
        assert_eq!(ctx.resolve("order.priority").as_deref(), Some("standard"));
        assert_eq!(ctx.resolve("product.price").as_deref(), Some("$4.50"));
        assert_eq!(ctx.resolve("product.allergens").as_deref(), Some("pollen, nuts"));
        assert_eq!(ctx.resolve("barcode").as_deref(), Some("HNY-01"));
        assert_eq!(ctx.resolve("trackingNumber").as_deref(), Some("1Z999"));
    }

    #[test]
    fn test_flags_gate_scopes() {
        let options = ContextOptions {
            include_customer: false,
            include_vendor: false,
            include_pricing: false,
            include_nutrition: false,
            custom_data: BTreeMap::new(),
        };
        let ctx = DataContext::build(&order(), &item(), &options);
        assert!(ctx.resolve("customer.name").is_none());
        assert!(ctx.resolve("vendor.businessName").is_none());
        assert!(ctx.resolve("product.price").is_none());
        assert!(ctx.resolve("nutrition.calories").is_none());
        assert_eq!(ctx.interpolate("Ship to {{customer.name}}!"), "Ship to !");

        let ctx = DataContext::build(
            &order(),
            &item(),
            &ContextOptions {
                include_nutrition: true,
                ..Default::default()
            },
        );
        assert_eq!(ctx.resolve("nutrition.calories").as_deref(), Some("60"));
        assert_eq!(ctx.resolve("customer.fullAddress").as_deref(), Some("1 Main St, Springfield, IL 62701"));
    }

    #[test]
    fn test_vendor_contact_card_is_json() {
        let ctx = DataContext::build(&order(), &item(), &ContextOptions::default());
        let card: Value = serde_json::from_str(&ctx.resolve("vendor.contactCard").unwrap()).unwrap();
        assert_eq!(card["name"], "Acme Farm");
        assert_eq!(card["phone"], "555-0100");
        assert!(card["website"].is_null());
    }

    #[test]
    fn test_variant_scope_only_with_variant() {
        let ctx = DataContext::build(&order(), &item(), &ContextOptions::default());
        assert!(ctx.resolve("variant.name").is_none());

        let mut with_variant = item();
        with_variant.variant = Some(ProductVariant {
            id: "var1".into(),
            name: "Large".into(),
            attributes: [("size".to_string(), "L".to_string()), ("color".to_string(), "amber".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        let ctx = DataContext::build(&order(), &with_variant, &ContextOptions::default());
        assert_eq!(ctx.resolve("variant.name").as_deref(), Some("Large"));
        assert_eq!(ctx.resolve("variant.attributes").as_deref(), Some("color: amber, size: L"));
    }

    #[test]
    fn test_custom_data_paths() {
        let options = ContextOptions {
            custom_data: [("batch".to_string(), json!({"code": "B-7", "lines": [1, 2]}))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let ctx = DataContext::build(&order(), &item(), &options);
        assert_eq!(ctx.resolve("batch.code").as_deref(), Some("B-7"));
        assert_eq!(ctx.resolve("batch.lines.1").as_deref(), Some("2"));
        assert!(ctx.resolve("batch.missing").is_none());
    }

    #[test]
    fn test_interpolation_edge_cases() {
        let ctx = DataContext::build(&order(), &item(), &ContextOptions::default());
        assert_eq!(ctx.interpolate("{{ product.name }} x{{product.quantity}}"), "Honey x3");
        assert_eq!(ctx.interpolate("{{unknown.path}}"), "");
        assert_eq!(ctx.interpolate("open {{product.name"), "open {{product.name");
        assert_eq!(ctx.interpolate("{{}}"), "{{}}");
        assert_eq!(ctx.interpolate("plain"), "plain");
    }

    #[test]
    fn test_interpolation_is_deterministic() {
        let ctx = DataContext::build(&order(), &item(), &ContextOptions::default());
        let template = "{{order.number}} {{qrCode}} {{vendor.contactCard}}";
        assert_eq!(ctx.interpolate(template), ctx.interpolate(template));
    }
}

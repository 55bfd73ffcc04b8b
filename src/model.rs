//! Order Records
//!
//! Read-only records supplied by the marketplace backend. The label pipeline
//! never mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub country: String,
}

impl Address {
    /// `street, city, state zip` as printed on shipping labels.
    pub fn one_line(&self) -> String {
        format!("{}, {}, {} {}", self.street, self.city, self.state, self.zip_code)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: String,
    pub business_name: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Product-level label override.
    #[serde(default)]
    pub label_profile_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    #[serde(default)]
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Variant-level label override.
    #[serde(default)]
    pub label_profile_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub id: String,
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub variant_name: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
    pub sku: String,

    /// Order-level label override; wins over variant and product.
    #[serde(default)]
    pub label_profile_id: Option<String>,
    /// Number of labels to print when it differs from `quantity`.
    #[serde(default)]
    pub label_quantity: Option<u32>,

    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub nutrition_info: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub lot_number: Option<String>,

    #[serde(default)]
    pub product: Option<Product>,
    #[serde(default)]
    pub variant: Option<ProductVariant>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderPriority {
    #[default]
    Standard,
    Expedited,
    Rush,
}

impl OrderPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Expedited => "expedited",
            Self::Rush => "rush",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    #[serde(default)]
    pub status: OrderStatus,
    pub customer: Customer,
    pub vendor: Vendor,
    pub line_items: Vec<OrderLineItem>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expected_delivery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,

    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    #[serde(default)]
    pub total: f64,

    #[serde(default)]
    pub priority: Option<OrderPriority>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

impl Order {
    pub fn line_item(&self, id: &str) -> Option<&OrderLineItem> {
        self.line_items.iter().find(|item| item.id == id)
    }
}

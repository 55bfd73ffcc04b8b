//! Profile Hierarchy Resolver
//!
//! Picks the active label profile by scanning order > variant > product >
//! system and taking the first configured id. Pure function over loaded
//! records; absence of every level is a valid `None` outcome, not an error.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::model::{OrderLineItem, Product, ProductVariant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileLevel {
    Order,
    Variant,
    Product,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    System,
    Product,
    Variant,
    Order,
    None,
}

impl From<ProfileLevel> for ProfileSource {
    fn from(level: ProfileLevel) -> Self {
        match level {
            ProfileLevel::Order => Self::Order,
            ProfileLevel::Variant => Self::Variant,
            ProfileLevel::Product => Self::Product,
            ProfileLevel::System => Self::System,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyLevel {
    pub level: ProfileLevel,
    pub profile_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResolution {
    pub active_profile_id: Option<String>,
    pub source: ProfileSource,
    /// Always four entries, highest priority first.
    pub hierarchy: Vec<HierarchyLevel>,
    /// Every configured id in priority order. Guidance only; never retried automatically.
    pub fallback_chain: Vec<String>,
}

impl ProfileResolution {
    pub fn is_resolved(&self) -> bool {
        self.active_profile_id.is_some()
    }

    pub fn active_level(&self) -> Option<&HierarchyLevel> {
        self.hierarchy.iter().find(|level| level.is_active)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileResolver {
    system_default_profile_id: Option<String>,
}

impl ProfileResolver {
    pub fn new(system_default_profile_id: Option<String>) -> Self {
        Self {
            system_default_profile_id: system_default_profile_id.filter(|id| !id.is_empty()),
        }
    }

    pub fn system_default(&self) -> Option<&str> {
        self.system_default_profile_id.as_deref()
    }

    #[instrument(level = "debug", skip_all, fields(line_item = line_item.map(|l| l.id.as_str())))]
    pub fn resolve(
        &self,
        product: Option<&Product>,
        variant: Option<&ProductVariant>,
        line_item: Option<&OrderLineItem>,
    ) -> ProfileResolution {
        let configured = |id: Option<&String>| id.filter(|id| !id.is_empty()).cloned();
        let candidates = [
            (ProfileLevel::Order, configured(line_item.and_then(|l| l.label_profile_id.as_ref()))),
            (ProfileLevel::Variant, configured(variant.and_then(|v| v.label_profile_id.as_ref()))),
            (ProfileLevel::Product, configured(product.and_then(|p| p.label_profile_id.as_ref()))),
            (ProfileLevel::System, self.system_default_profile_id.clone()),
        ];

        let active = candidates.iter().position(|(_, id)| id.is_some());
        let hierarchy = candidates
            .iter()
            .enumerate()
            .map(|(i, (level, id))| HierarchyLevel {
                level: *level,
                profile_id: id.clone(),
                is_active: Some(i) == active,
            })
            .collect();
        let fallback_chain = candidates.iter().filter_map(|(_, id)| id.clone()).collect();

        match active {
            Some(i) => ProfileResolution {
                active_profile_id: candidates[i].1.clone(),
                source: candidates[i].0.into(),
                hierarchy,
                fallback_chain,
            },
            None => ProfileResolution {
                active_profile_id: None,
                source: ProfileSource::None,
                hierarchy,
                fallback_chain,
            },
        }
    }

    /// Resolve using the product/variant records embedded in a line item.
    pub fn resolve_line_item(&self, item: &OrderLineItem) -> ProfileResolution {
        self.resolve(item.product.as_ref(), item.variant.as_ref(), Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(profile: Option<&str>) -> OrderLineItem {
        OrderLineItem {
            id: "li".into(),
            label_profile_id: profile.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_combinations() {
        for mask in 0u8..16 {
            let order = (mask & 1 != 0).then_some("order-p");
            let variant_id = (mask & 2 != 0).then_some("variant-p");
            let product_id = (mask & 4 != 0).then_some("product-p");
            let system = (mask & 8 != 0).then(|| "system-p".to_string());

            let line_item = item(order);
            let variant = ProductVariant {
                label_profile_id: variant_id.map(String::from),
                ..Default::default()
            };
            let product = Product {
                label_profile_id: product_id.map(String::from),
                ..Default::default()
            };
            let resolution = ProfileResolver::new(system)
                .resolve(Some(&product), Some(&variant), Some(&line_item));

            let expected = [
                (order, ProfileSource::Order),
                (variant_id, ProfileSource::Variant),
                (product_id, ProfileSource::Product),
                ((mask & 8 != 0).then_some("system-p"), ProfileSource::System),
            ]
            .into_iter()
            .find(|(id, _)| id.is_some());

            let active_count = resolution.hierarchy.iter().filter(|l| l.is_active).count();
            assert_eq!(resolution.hierarchy.len(), 4);
            match expected {
                Some((id, source)) => {
                    assert_eq!(resolution.active_profile_id.as_deref(), id, "mask {mask}");
                    assert_eq!(resolution.source, source, "mask {mask}");
                    assert_eq!(active_count, 1);
                }
                None => {
                    assert!(resolution.active_profile_id.is_none());
                    assert_eq!(resolution.source, ProfileSource::None);
                    assert_eq!(active_count, 0);
                }
            }
            assert_eq!(resolution.fallback_chain.len(), mask.count_ones() as usize);
        }
    }

    #[test]
    fn test_fallback_chain_priority_order() {
        let product = Product {
            label_profile_id: Some("product-p".into()),
            ..Default::default()
        };
        let resolution = ProfileResolver::new(Some("system-p".into()))
            .resolve(Some(&product), None, Some(&item(Some("order-p"))));
        assert_eq!(resolution.fallback_chain, vec!["order-p", "product-p", "system-p"]);
        assert_eq!(resolution.active_level().unwrap().level, ProfileLevel::Order);
    }

    #[test]
    fn test_empty_ids_are_unconfigured() {
        let resolution = ProfileResolver::new(Some(String::new())).resolve(None, None, Some(&item(Some(""))));
        assert_eq!(resolution.source, ProfileSource::None);
        assert!(resolution.fallback_chain.is_empty());
    }
}

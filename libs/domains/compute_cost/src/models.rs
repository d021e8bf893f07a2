use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumString};

use crate::error::{CostError, CostResult};

/// Billing category of a compute instance
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PricingTier {
    /// On-demand
    #[default]
    Regular,
    /// Legacy preemptible tier, superseded by Spot
    #[serde(alias = "low_priority")]
    #[strum(to_string = "lowpriority", serialize = "low_priority", serialize = "low priority")]
    LowPriority,
    Spot,
}

/// Identity of a priceable unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkuKey {
    pub sku_name: String,
    pub region: String,
    pub pricing_tier: PricingTier,
}

impl SkuKey {
    pub fn new(sku_name: impl Into<String>, region: impl Into<String>, tier: PricingTier) -> Self {
        Self {
            sku_name: sku_name.into(),
            region: region.into(),
            pricing_tier: tier,
        }
    }
}

/// One line of the public retail price catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailPriceEntry {
    pub sku_name: String,
    pub region: String,
    pub product_name: String,
    pub meter_name: String,
    pub meter_id: String,
    /// Catalog `serviceName`, e.g. "Virtual Machines"
    pub service_category: String,
    pub unit_price: Decimal,
    pub currency: String,
}

/// One row of a billed-cost query result.
///
/// Field order matches the positional row layout returned by the
/// cost-management query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostQueryRow {
    pub cost: Decimal,
    pub usage: Decimal,
    pub region: String,
    pub meter_id: String,
    pub meter_name: String,
    pub meter_category: String,
    pub meter_subcategory: String,
    pub resource_group: String,
    /// `key:value` strings, including cluster attribution
    pub tags: Vec<String>,
    pub currency: String,
}

const COST_ROW_COLUMNS: usize = 10;
const CLUSTER_TAG: &str = "clustername";

impl CostQueryRow {
    /// Parse a positional result row
    pub fn from_row(row: &[Value]) -> CostResult<Self> {
        if row.len() < COST_ROW_COLUMNS {
            return Err(CostError::Parse(format!(
                "cost row has {} columns, expected {}",
                row.len(),
                COST_ROW_COLUMNS
            )));
        }

        Ok(Self {
            cost: decimal_column(&row[0], "cost")?,
            usage: decimal_column(&row[1], "usage")?,
            region: text_column(&row[2]),
            meter_id: text_column(&row[3]),
            meter_name: text_column(&row[4]),
            meter_category: text_column(&row[5]),
            meter_subcategory: text_column(&row[6]),
            resource_group: text_column(&row[7]),
            tags: tag_column(&row[8]),
            currency: text_column(&row[9]),
        })
    }

    /// Values of every `clustername` tag on the row
    pub fn cluster_names(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter_map(|tag| {
                let (key, value) = tag.split_once(':')?;
                let key = key.trim().trim_matches('"');
                let value = value.trim().trim_matches('"');
                (key.eq_ignore_ascii_case(CLUSTER_TAG) && !value.is_empty())
                    .then(|| value.to_string())
            })
            .collect()
    }
}

/// Parse a JSON number or numeric string into an exact decimal
pub(crate) fn decimal_from_json(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn decimal_column(value: &Value, column: &str) -> CostResult<Decimal> {
    decimal_from_json(value)
        .ok_or_else(|| CostError::Parse(format!("column '{}' is not numeric: {}", column, value)))
}

fn text_column(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// Tags arrive either as a JSON array or as a stringified list.
fn tag_column(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(text_column).collect(),
        Value::String(s) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<Vec<String>>(s) {
                Ok(tags) => tags,
                Err(_) => split_tags(s.trim().trim_start_matches('[').trim_end_matches(']')),
            }
        }
        Value::String(s) => split_tags(s),
        _ => Vec::new(),
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// A rate attributed to one (region, sku) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterRate {
    pub sku_name: String,
    pub region: String,
    pub meter_name: String,
    pub meter_id: String,
    pub meter_category: String,
    pub meter_subcategory: Option<String>,
    pub resource_group: Option<String>,
    /// Price of one instance-hour
    pub rate: Decimal,
    pub currency: String,
}

impl From<RetailPriceEntry> for MeterRate {
    fn from(entry: RetailPriceEntry) -> Self {
        Self {
            sku_name: entry.sku_name,
            region: entry.region,
            meter_name: entry.meter_name,
            meter_id: entry.meter_id,
            meter_category: entry.service_category,
            meter_subcategory: None,
            resource_group: None,
            rate: entry.unit_price,
            currency: entry.currency,
        }
    }
}

/// region → sku_name → rate, first writer wins
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceTable {
    regions: BTreeMap<String, BTreeMap<String, MeterRate>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the (region, sku) pair is already claimed.
    ///
    /// Returns `true` when the rate was stored.
    pub fn insert_if_absent(&mut self, rate: MeterRate) -> bool {
        let skus = self.regions.entry(rate.region.clone()).or_default();
        if skus.contains_key(&rate.sku_name) {
            return false;
        }
        skus.insert(rate.sku_name.clone(), rate);
        true
    }

    pub fn get(&self, region: &str, sku_name: &str) -> Option<&MeterRate> {
        self.regions.get(region)?.get(sku_name)
    }

    pub fn len(&self) -> usize {
        self.regions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeterRate> {
        self.regions.values().flat_map(BTreeMap::values)
    }
}

/// One SKU's consumption within a node array for the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDetail {
    pub sku_name: String,
    pub region: String,
    pub pricing_tier: PricingTier,
    pub hours: Decimal,
    /// Must be at least 1
    pub core_count: u32,
}

impl UsageDetail {
    pub fn sku_key(&self) -> SkuKey {
        SkuKey::new(&self.sku_name, &self.region, self.pricing_tier)
    }
}

/// Usage of one node array in one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArrayUsage {
    pub cluster: String,
    pub node_array: String,
    pub details: Vec<UsageDetail>,
}

/// Fully priced usage of one SKU in one node array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostRecord {
    pub cluster: String,
    pub node_array: String,
    pub sku_name: String,
    pub region: String,
    pub pricing_tier: PricingTier,
    pub hours: Decimal,
    /// hours / core_count
    pub core_hours: Decimal,
    /// core_hours * rate
    pub cost: Decimal,
    pub rate: Decimal,
    pub meter_name: String,
    pub meter_id: String,
    pub meter_category: String,
    pub meter_subcategory: Option<String>,
    pub resource_group: Option<String>,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn rate(region: &str, sku: &str, meter_id: &str) -> MeterRate {
        MeterRate {
            sku_name: sku.to_string(),
            region: region.to_string(),
            meter_name: "F2s v2".to_string(),
            meter_id: meter_id.to_string(),
            meter_category: "Virtual Machines".to_string(),
            meter_subcategory: None,
            resource_group: None,
            rate: dec!(0.10),
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn test_pricing_tier_parsing() {
        assert_eq!("regular".parse::<PricingTier>().unwrap(), PricingTier::Regular);
        assert_eq!("Spot".parse::<PricingTier>().unwrap(), PricingTier::Spot);
        assert_eq!(
            "low_priority".parse::<PricingTier>().unwrap(),
            PricingTier::LowPriority
        );
        assert_eq!(
            "lowpriority".parse::<PricingTier>().unwrap(),
            PricingTier::LowPriority
        );
        assert!("reserved".parse::<PricingTier>().is_err());
        assert_eq!(PricingTier::LowPriority.to_string(), "lowpriority");
    }

    #[test]
    fn test_price_table_first_writer_wins() {
        let mut table = PriceTable::new();
        assert!(table.insert_if_absent(rate("eastus", "Standard_F2s_v2", "first")));
        assert!(!table.insert_if_absent(rate("eastus", "Standard_F2s_v2", "second")));
        assert!(table.insert_if_absent(rate("westus2", "Standard_F2s_v2", "third")));

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("eastus", "Standard_F2s_v2").unwrap().meter_id,
            "first"
        );
        assert!(table.get("northeurope", "Standard_F2s_v2").is_none());
    }

    #[test]
    fn test_cost_row_from_positional_values() {
        let row = vec![
            json!(12.5),
            json!(25),
            json!("eastus"),
            json!("meter-1"),
            json!("F2s v2"),
            json!("Virtual Machines"),
            json!("FSv2 Series"),
            json!("rg-hpc"),
            json!(["\"clustername\":\"hpc\"", "owner:ops"]),
            json!("USD"),
        ];

        let parsed = CostQueryRow::from_row(&row).unwrap();
        assert_eq!(parsed.cost, dec!(12.5));
        assert_eq!(parsed.usage, dec!(25));
        assert_eq!(parsed.resource_group, "rg-hpc");
        assert_eq!(parsed.cluster_names(), vec!["hpc".to_string()]);
    }

    #[test]
    fn test_cost_row_rejects_short_rows() {
        let row = vec![json!(1.0), json!(2.0)];
        assert!(matches!(
            CostQueryRow::from_row(&row),
            Err(CostError::Parse(_))
        ));
    }

    #[test]
    fn test_cluster_names_from_stringified_tags() {
        let row = vec![
            json!("1.0"),
            json!("1.0"),
            json!("eastus"),
            json!("m"),
            json!("m"),
            json!("Virtual Machines"),
            json!(""),
            json!(""),
            json!("[\"clustername:hpc\", \"clustername:htc\", \"team:bio\"]"),
            json!("USD"),
        ];

        let parsed = CostQueryRow::from_row(&row).unwrap();
        assert_eq!(parsed.cluster_names(), vec!["hpc", "htc"]);
    }

    #[test]
    fn test_decimal_from_scientific_notation() {
        assert_eq!(decimal_from_json(&json!(1e-7)), Some(dec!(0.0000001)));
        assert_eq!(decimal_from_json(&json!("0.085")), Some(dec!(0.085)));
        assert_eq!(decimal_from_json(&json!(null)), None);
    }
}

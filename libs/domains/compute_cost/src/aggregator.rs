use observability::CostMetrics;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::{CostError, CostResult};
use crate::models::{CostRecord, MeterRate, NodeArrayUsage, PriceTable, UsageDetail};
use crate::retail::RetailPriceResolver;

/// Where rates come from during aggregation
#[derive(Clone, Copy)]
pub enum PriceSource<'a> {
    /// Prebuilt table from the billed-cost query, no remote calls
    Table(&'a PriceTable),
    /// Live catalog lookup, one per usage detail
    Retail(&'a RetailPriceResolver),
}

impl PriceSource<'_> {
    fn label(&self) -> &'static str {
        match self {
            PriceSource::Table(_) => "billed",
            PriceSource::Retail(_) => "retail",
        }
    }

    async fn rate_for(&self, detail: &UsageDetail) -> CostResult<MeterRate> {
        match self {
            PriceSource::Table(table) => table
                .get(&detail.region, &detail.sku_name)
                .cloned()
                .ok_or_else(|| CostError::RateNotFound {
                    sku_name: detail.sku_name.clone(),
                    region: detail.region.clone(),
                    tier: detail.pricing_tier,
                }),
            PriceSource::Retail(resolver) => resolver
                .resolve(&detail.sku_name, &detail.region, detail.pricing_tier)
                .await
                .map(MeterRate::from),
        }
    }
}

/// Merges usage hours with resolved rates into cost records
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCostAggregator;

impl UsageCostAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Price every usage detail.
    ///
    /// All-or-nothing: the first detail without a rate aborts the batch
    /// with [`CostError::PricingUnavailable`]. Remote and cache failures
    /// from the lookup are returned as they are. A zero core count or
    /// negative hours anywhere in the input fails before any rate is
    /// looked up.
    #[instrument(skip(self, usage, source), fields(node_arrays = usage.len(), path = source.label()))]
    pub async fn aggregate(
        &self,
        usage: &[NodeArrayUsage],
        source: PriceSource<'_>,
    ) -> CostResult<Vec<CostRecord>> {
        validate(usage)?;

        let mut records = Vec::new();
        for node_array in usage {
            for detail in &node_array.details {
                let rate = source.rate_for(detail).await.map_err(|e| match e {
                    CostError::RateNotFound { .. } => {
                        warn!(
                            node_array = %node_array.node_array,
                            sku = %detail.sku_name,
                            region = %detail.region,
                            "No rate for usage detail"
                        );
                        CostError::PricingUnavailable {
                            node_array: node_array.node_array.clone(),
                            sku_name: detail.sku_name.clone(),
                            region: detail.region.clone(),
                            source: Box::new(e),
                        }
                    }
                    other => other,
                })?;
                records.push(price(node_array, detail, rate)?);
            }
        }

        CostMetrics::record_cost_records(source.label(), records.len());
        info!(records = records.len(), "Aggregated usage costs");
        Ok(records)
    }
}

fn validate(usage: &[NodeArrayUsage]) -> CostResult<()> {
    for node_array in usage {
        for detail in &node_array.details {
            if detail.core_count == 0 {
                return Err(CostError::InvalidUsage(format!(
                    "core_count is 0 for {} in node array {}",
                    detail.sku_name, node_array.node_array
                )));
            }
            if detail.hours.is_sign_negative() && !detail.hours.is_zero() {
                return Err(CostError::InvalidUsage(format!(
                    "negative hours ({}) for {} in node array {}",
                    detail.hours, detail.sku_name, node_array.node_array
                )));
            }
        }
    }
    Ok(())
}

fn price(
    node_array: &NodeArrayUsage,
    detail: &UsageDetail,
    rate: MeterRate,
) -> CostResult<CostRecord> {
    let overflow = || {
        CostError::InvalidUsage(format!(
            "cost of {} hours of {} at {} overflows",
            detail.hours, detail.sku_name, rate.rate
        ))
    };
    let core_hours = detail
        .hours
        .checked_div(Decimal::from(detail.core_count))
        .ok_or_else(overflow)?;
    let cost = core_hours.checked_mul(rate.rate).ok_or_else(overflow)?;

    Ok(CostRecord {
        cluster: node_array.cluster.clone(),
        node_array: node_array.node_array.clone(),
        sku_name: detail.sku_name.clone(),
        region: detail.region.clone(),
        pricing_tier: detail.pricing_tier,
        hours: detail.hours,
        core_hours,
        cost,
        rate: rate.rate,
        meter_name: rate.meter_name,
        meter_id: rate.meter_id,
        meter_category: rate.meter_category,
        meter_subcategory: rate.meter_subcategory,
        resource_group: rate.resource_group,
        currency: rate.currency,
    })
}

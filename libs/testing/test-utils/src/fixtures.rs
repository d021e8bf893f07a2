//! Upstream payload builders.

use serde_json::{Value, json};

/// A pay-as-you-go Linux catalog line
pub fn retail_item(sku: &str, region: &str, meter_name: &str, price: f64) -> Value {
    json!({
        "type": "Consumption",
        "productName": "Virtual Machines Series",
        "meterName": meter_name,
        "meterId": format!("meter-{}-{}", sku.to_lowercase(), region),
        "serviceName": "Virtual Machines",
        "armSkuName": sku,
        "armRegionName": region,
        "retailPrice": price,
        "currencyCode": "USD"
    })
}

/// A catalog page, with an optional link to the next one
pub fn retail_page(items: Vec<Value>, next_page_link: Option<&str>) -> Value {
    json!({ "Items": items, "NextPageLink": next_page_link })
}

/// A meter-id lookup result listing (sku, region) pairs
pub fn meter_page(pairs: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = pairs
        .iter()
        .map(|(sku, region)| json!({"armSkuName": sku, "armRegionName": region}))
        .collect();
    json!({ "Items": items })
}

/// One positional cost-query row for a compute meter tagged with `cluster`
pub fn cost_row(cost: f64, usage: f64, meter_id: &str, resource_group: &str, cluster: &str) -> Value {
    json!([
        cost,
        usage,
        "eastus",
        meter_id,
        "F2s v2",
        "Virtual Machines",
        "FSv2 Series",
        resource_group,
        [format!("clustername:{}", cluster)],
        "USD"
    ])
}

/// A cost-query response body
pub fn cost_query_response(rows: Vec<Value>) -> Value {
    json!({ "properties": { "rows": rows } })
}

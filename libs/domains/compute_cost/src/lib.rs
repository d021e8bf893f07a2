//! Compute Cost Domain
//!
//! Reconciles cluster compute usage with cloud pricing data to produce
//! per-SKU, per-region cost records.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────┐
//!                  │ PricingFacade  │  ← picks billed or retail strategy
//!                  └───────┬────────┘
//!              ┌───────────┴────────────┐
//!      ┌───────▼────────┐      ┌────────▼─────────┐
//!      │ BilledCost     │      │ UsageCost        │
//!      │ QueryClient    │      │ Aggregator       │
//!      └───────┬────────┘      └────────┬─────────┘
//!      ┌───────▼────────┐      ┌────────▼─────────┐
//!      │ MeterIdentity  │      │ RetailPrice      │
//!      │ Resolver       │      │ Resolver         │
//!      └───────┬────────┘      └────────┬─────────┘
//!              └───────────┬────────────┘
//!                  ┌───────▼────────┐
//!                  │ ResponseCache  │  ← memory / filesystem / redis
//!                  └────────────────┘
//! ```
//!
//! Remote services are reached through the [`HttpClient`] capability and
//! credentials through [`TokenProvider`], so every component can be driven
//! by mocks in tests.

pub mod aggregator;
pub mod auth;
pub mod billed;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod meter;
pub mod models;
pub mod retail;
pub mod service;
pub mod usage;

pub use aggregator::{PriceSource, UsageCostAggregator};
pub use auth::{AccessToken, ClientSecretTokenProvider, TokenProvider};
pub use billed::{
    AzureCostQueryRenderer, BilledCostQueryClient, CostDataAvailability, QueryTemplateRenderer,
};
pub use cache::{
    CachePolicy, CacheStore, Clock, FileCacheStore, MemoryCacheStore, ResponseCache, SystemClock,
};
#[cfg(feature = "redis")]
pub use cache::RedisCacheStore;
pub use config::{CostManagementConfig, RetailCatalogConfig, UsageReportConfig};
pub use error::{CostError, CostResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use meter::{MeterIdentity, MeterIdentityResolver};
pub use models::{
    CostQueryRow, CostRecord, MeterRate, NodeArrayUsage, PriceTable, PricingTier,
    RetailPriceEntry, SkuKey, UsageDetail,
};
pub use retail::RetailPriceResolver;
pub use service::{PricingFacade, PricingStrategy};
pub use usage::{UsageReportClient, UsageSource};

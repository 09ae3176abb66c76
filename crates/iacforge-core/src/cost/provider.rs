//! Read-only cloud provider seam.
//!
//! The traits only expose reads. Nothing here can start, stop, resize or
//! purchase anything, so a cost analysis cannot change the account it looks
//! at whatever credential it is given.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::credential::CloudCredentials;
use crate::error::ProviderError;

/// Who a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// A compute instance as listed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub instance_type: String,
    /// `running`, `stopped`, ...
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `on-demand`, `spot` or `reserved`.
    #[serde(default = "on_demand")]
    pub lifecycle: String,
}

fn on_demand() -> String {
    "on-demand".to_owned()
}

impl InstanceInfo {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    #[must_use]
    pub fn is_on_demand(&self) -> bool {
        self.lifecycle == "on-demand"
    }
}

/// Read operations against one account.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// The caller identity (STS `GetCallerIdentity`).
    async fn identity(&self) -> Result<Identity, ProviderError>;

    /// Instances in `region`.
    async fn list_instances(&self, region: &str) -> Result<Vec<InstanceInfo>, ProviderError>;

    /// Average CPU utilization over the last `window_days`; `None` when the
    /// provider has no datapoints.
    async fn cpu_utilization(
        &self,
        region: &str,
        instance_id: &str,
        window_days: u32,
    ) -> Result<Option<f64>, ProviderError>;

    /// Services with charges in `region` during the window.
    async fn billed_services(&self, region: &str, window_days: u32)
    -> Result<Vec<String>, ProviderError>;

    /// Spend for one service in `region` over the window, normalized to 30 days.
    async fn service_cost(
        &self,
        region: &str,
        service: &str,
        window_days: u32,
    ) -> Result<Decimal, ProviderError>;
}

/// Builds providers for credentials.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Provider name, as accepted in credential requests.
    fn name(&self) -> &'static str;

    /// Bind a provider to `credentials`. May or may not touch the network.
    async fn connect(
        &self,
        credentials: &CloudCredentials,
    ) -> Result<Arc<dyn CloudProvider>, ProviderError>;
}

//! AWS provider over the official SDK clients.
//!
//! Identity comes from STS, instances from EC2, utilization from CloudWatch
//! and spend from Cost Explorer. Clients are built from the static key pair
//! of the credential; no ambient environment or profile is consulted.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sts::error::{ProvideErrorMetadata, SdkError};
use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use crate::credential::CloudCredentials;
use crate::error::ProviderError;

use super::provider::{CloudProvider, Identity, InstanceInfo, ProviderFactory};

/// Cost Explorer is only served from us-east-1.
const COST_EXPLORER_REGION: &str = "us-east-1";

fn is_credential_code(code: &str) -> bool {
    matches!(
        code,
        "InvalidClientTokenId"
            | "SignatureDoesNotMatch"
            | "UnrecognizedClientException"
            | "AuthFailure"
            | "ExpiredToken"
            | "ExpiredTokenException"
            | "InvalidAccessKeyId"
    )
}

fn map_sdk_error<E, R>(operation: &str, err: &SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata,
{
    let operation = operation.to_owned();
    match err {
        SdkError::TimeoutError(_) => ProviderError::Timeout { operation, secs: 0 },
        SdkError::DispatchFailure(_) => ProviderError::Unreachable {
            operation,
            reason: "request could not be dispatched".to_owned(),
        },
        _ => {
            let code = err.code().unwrap_or_default();
            let reason = err.message().unwrap_or(code).to_owned();
            match code {
                c if is_credential_code(c) => ProviderError::InvalidCredential { reason },
                "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => {
                    ProviderError::AccessDenied { operation, reason }
                }
                "Throttling"
                | "ThrottlingException"
                | "RequestLimitExceeded"
                | "LimitExceededException" => ProviderError::RateLimited { operation },
                "DataUnavailableException" => ProviderError::NoData { operation, reason },
                "" => ProviderError::Unreachable {
                    operation,
                    reason: "no error code in response".to_owned(),
                },
                _ => ProviderError::Other { operation, reason },
            }
        }
    }
}

fn build_error(operation: &str, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Other {
        operation: operation.to_owned(),
        reason: err.to_string(),
    }
}

/// Connects credentials to real AWS accounts.
#[derive(Debug, Default, Clone, Copy)]
pub struct AwsFactory;

#[async_trait]
impl ProviderFactory for AwsFactory {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn connect(
        &self,
        credentials: &CloudCredentials,
    ) -> Result<Arc<dyn CloudProvider>, ProviderError> {
        let creds = SharedCredentialsProvider::new(Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.expose().to_owned(),
            credentials
                .session_token
                .as_ref()
                .map(|t| t.expose().to_owned()),
            None,
            "iacforge",
        ));
        let region = credentials.region.clone();

        let sts = aws_sdk_sts::Client::from_conf(
            aws_sdk_sts::Config::builder()
                .region(aws_sdk_sts::config::Region::new(region.clone()))
                .credentials_provider(creds.clone())
                .behavior_version_latest()
                .build(),
        );
        let cost_explorer = aws_sdk_costexplorer::Client::from_conf(
            aws_sdk_costexplorer::Config::builder()
                .region(aws_sdk_costexplorer::config::Region::new(COST_EXPLORER_REGION))
                .credentials_provider(creds.clone())
                .behavior_version_latest()
                .build(),
        );

        Ok(Arc::new(AwsProvider {
            creds,
            sts,
            cost_explorer,
            spend: Mutex::new(HashMap::new()),
        }))
    }
}

/// One account behind one key pair.
struct AwsProvider {
    creds: SharedCredentialsProvider,
    sts: aws_sdk_sts::Client,
    cost_explorer: aws_sdk_costexplorer::Client,
    /// Per-service spend by (region, window), fetched once per provider.
    spend: Mutex<HashMap<(String, u32), Vec<(String, Decimal)>>>,
}

impl AwsProvider {
    fn ec2(&self, region: &str) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::from_conf(
            aws_sdk_ec2::Config::builder()
                .region(aws_sdk_ec2::config::Region::new(region.to_owned()))
                .credentials_provider(self.creds.clone())
                .behavior_version_latest()
                .build(),
        )
    }

    fn cloudwatch(&self, region: &str) -> aws_sdk_cloudwatch::Client {
        aws_sdk_cloudwatch::Client::from_conf(
            aws_sdk_cloudwatch::Config::builder()
                .region(aws_sdk_cloudwatch::config::Region::new(region.to_owned()))
                .credentials_provider(self.creds.clone())
                .behavior_version_latest()
                .build(),
        )
    }

    /// Spend per service for the window, normalized to 30 days.
    async fn spend_by_service(
        &self,
        region: &str,
        window_days: u32,
    ) -> Result<Vec<(String, Decimal)>, ProviderError> {
        use aws_sdk_costexplorer::types::{
            DateInterval, Dimension, DimensionValues, Expression, Granularity, GroupDefinition,
            GroupDefinitionType,
        };
        const OP: &str = "ce:GetCostAndUsage";

        let key = (region.to_owned(), window_days);
        let mut cache = self.spend.lock().await;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }

        let end = Utc::now().date_naive();
        let start = end - TimeDelta::days(i64::from(window_days));
        let period = DateInterval::builder()
            .start(start.format("%Y-%m-%d").to_string())
            .end(end.format("%Y-%m-%d").to_string())
            .build()
            .map_err(|e| build_error(OP, e))?;
        let filter = Expression::builder()
            .dimensions(
                DimensionValues::builder()
                    .key(Dimension::Region)
                    .values(region)
                    .build(),
            )
            .build();
        let group = GroupDefinition::builder()
            .r#type(GroupDefinitionType::Dimension)
            .key("SERVICE")
            .build();

        let mut totals: Vec<(String, Decimal)> = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let out = self
                .cost_explorer
                .get_cost_and_usage()
                .time_period(period.clone())
                .granularity(Granularity::Daily)
                .metrics("UnblendedCost")
                .filter(filter.clone())
                .group_by(group.clone())
                .set_next_page_token(next.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(OP, &e))?;

            for day in out.results_by_time() {
                for g in day.groups() {
                    let Some(service) = g.keys().first() else {
                        continue;
                    };
                    let amount = g
                        .metrics()
                        .and_then(|m| m.get("UnblendedCost"))
                        .and_then(|m| m.amount())
                        .and_then(|a| Decimal::from_str(a).ok())
                        .unwrap_or_default();
                    match totals.iter_mut().find(|(s, _)| s == service) {
                        Some((_, sum)) => *sum += amount,
                        None => totals.push((service.clone(), amount)),
                    }
                }
            }

            match out.next_page_token() {
                Some(token) if !token.is_empty() => next = Some(token.to_owned()),
                _ => break,
            }
        }

        let scale = Decimal::from(30) / Decimal::from(window_days);
        let normalized: Vec<_> = totals
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(s, amount)| (s, (amount * scale).round_dp(2)))
            .collect();
        debug!(region, services = normalized.len(), "cost explorer spend fetched");
        cache.insert(key, normalized.clone());
        Ok(normalized)
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn identity(&self) -> Result<Identity, ProviderError> {
        const OP: &str = "sts:GetCallerIdentity";
        let out = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| map_sdk_error(OP, &e))?;
        Ok(Identity {
            account: out.account().unwrap_or_default().to_owned(),
            arn: out.arn().unwrap_or_default().to_owned(),
            user_id: out.user_id().unwrap_or_default().to_owned(),
        })
    }

    async fn list_instances(&self, region: &str) -> Result<Vec<InstanceInfo>, ProviderError> {
        const OP: &str = "ec2:DescribeInstances";
        let ec2 = self.ec2(region);
        let mut instances = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let out = ec2
                .describe_instances()
                .set_next_token(next.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(OP, &e))?;

            for i in out.reservations().iter().flat_map(|r| r.instances()) {
                let Some(id) = i.instance_id() else {
                    continue;
                };
                instances.push(InstanceInfo {
                    id: id.to_owned(),
                    instance_type: i
                        .instance_type()
                        .map(|t| t.as_str().to_owned())
                        .unwrap_or_default(),
                    state: i
                        .state()
                        .and_then(|s| s.name())
                        .map(|n| n.as_str().to_owned())
                        .unwrap_or_default(),
                    name: i
                        .tags()
                        .iter()
                        .find(|t| t.key() == Some("Name"))
                        .and_then(|t| t.value())
                        .map(str::to_owned),
                    lifecycle: i
                        .instance_lifecycle()
                        .map_or_else(|| "on-demand".to_owned(), |l| l.as_str().to_owned()),
                });
            }

            match out.next_token() {
                Some(token) if !token.is_empty() => next = Some(token.to_owned()),
                _ => break,
            }
        }
        Ok(instances)
    }

    async fn cpu_utilization(
        &self,
        region: &str,
        instance_id: &str,
        window_days: u32,
    ) -> Result<Option<f64>, ProviderError> {
        use aws_sdk_cloudwatch::primitives::DateTime;
        use aws_sdk_cloudwatch::types::{Dimension, Statistic};
        const OP: &str = "cloudwatch:GetMetricStatistics";

        let end = Utc::now().timestamp();
        let start = end - i64::from(window_days) * 86_400;
        let dimension = Dimension::builder()
            .name("InstanceId")
            .value(instance_id)
            .build();
        let out = self
            .cloudwatch(region)
            .get_metric_statistics()
            .namespace("AWS/EC2")
            .metric_name("CPUUtilization")
            .dimensions(dimension)
            .start_time(DateTime::from_secs(start))
            .end_time(DateTime::from_secs(end))
            .period(86_400)
            .statistics(Statistic::Average)
            .send()
            .await
            .map_err(|e| map_sdk_error(OP, &e))?;

        let samples: Vec<f64> = out.datapoints().iter().filter_map(|d| d.average()).collect();
        if samples.is_empty() {
            return Ok(None);
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok(Some(mean))
    }

    async fn billed_services(
        &self,
        region: &str,
        window_days: u32,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .spend_by_service(region, window_days)
            .await?
            .into_iter()
            .map(|(s, _)| s)
            .collect())
    }

    async fn service_cost(
        &self,
        region: &str,
        service: &str,
        window_days: u32,
    ) -> Result<Decimal, ProviderError> {
        self.spend_by_service(region, window_days)
            .await?
            .into_iter()
            .find(|(s, _)| s == service)
            .map(|(_, amount)| amount)
            .ok_or_else(|| ProviderError::NoData {
                operation: "ce:GetCostAndUsage".to_owned(),
                reason: format!("no charges for {service}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_codes() {
        assert!(is_credential_code("InvalidClientTokenId"));
        assert!(is_credential_code("SignatureDoesNotMatch"));
        assert!(!is_credential_code("AccessDenied"));
    }
}

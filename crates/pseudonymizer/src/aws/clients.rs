//! AWS SDK sessions shared by the KMS and Secrets Manager gateways.

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use tracing::info;

/// The two SDK configurations a gateway may use.
///
/// `primary` is the environment's default credential/region chain. `corrected`
/// falls back to an explicit region when the environment provides none; it
/// is the session a gateway switches to after a transient failure.
#[derive(Clone, Debug)]
pub struct AwsSessions {
    pub primary: SdkConfig,
    pub corrected: SdkConfig,
}

impl AwsSessions {
    /// Load both sessions. Credentials are resolved via the standard AWS
    /// chain; nothing is contacted until the first API call.
    pub async fn load(fallback_region: &str) -> Self {
        let primary = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let region = RegionProviderChain::default_provider()
            .or_else(Region::new(fallback_region.to_owned()));
        let corrected = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        info!(
            region = ?primary.region(),
            corrected_region = ?corrected.region(),
            "AWS sessions loaded"
        );
        Self { primary, corrected }
    }
}

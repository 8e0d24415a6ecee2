use crate::domain::result::DomainResult;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct GetOwningOrganizationInput {
    pub end_device_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountEndDevicesInput {
    pub organization_id: String,
}

/// Device registry lookups needed by the telemetry pipeline.
/// Registry CRUD lives elsewhere; this is the read side only.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EndDeviceRepository: Send + Sync {
    /// Organization owning the device, `None` if the device is unknown
    async fn get_owning_organization(
        &self,
        input: GetOwningOrganizationInput,
    ) -> DomainResult<Option<String>>;

    async fn count_end_devices(&self, input: CountEndDevicesInput) -> DomainResult<u32>;
}

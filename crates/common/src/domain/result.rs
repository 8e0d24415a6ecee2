use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("End device not found: {0}")]
    EndDeviceNotFound(String),

    #[error(
        "Organization mismatch: end device {end_device_id} belongs to {device_organization_id}, but data sent for {organization_id}"
    )]
    TenancyMismatch {
        end_device_id: String,
        device_organization_id: String,
        organization_id: String,
    },

    #[error("Broker error: {0:#}")]
    BrokerError(anyhow::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Store error: {0:#}")]
    StoreError(anyhow::Error),

    #[error("Repository error: {0:#}")]
    RepositoryError(#[from] anyhow::Error),
}

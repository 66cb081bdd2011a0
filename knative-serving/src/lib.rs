pub mod apis;

pub use apis::serving::v1::service::{Service, ServiceCondition, ServiceSpec, ServiceStatus};

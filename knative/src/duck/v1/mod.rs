pub mod addressable_type;
pub mod event_source_types;
pub mod knative_reference;
pub mod resolver;
pub mod source_types;
pub mod status_types;

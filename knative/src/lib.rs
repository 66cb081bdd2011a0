mod duck;
pub mod error;

// expose only v1 types
pub use duck::v1::*;

pub mod conditions {
    pub use knative_conditions::{
        Condition, ConditionAccessor, ConditionManager, ConditionSet, ConditionStatus,
        ConditionType, Conditions,
    };
}

pub mod derive {
    pub use knative_derive::ConditionType;
}

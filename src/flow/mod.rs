//! Flow coordination: composite values with independently resolving fields
//!
//! `FlowCoordinator` replaces a multi-field value wholesale while
//! guaranteeing that only the most recently started set of computations
//! can ever touch the observed state.

pub mod aggregate;
pub mod coordinator;
pub mod events;
pub mod fields;

pub use aggregate::*;
pub use coordinator::*;
pub use events::*;
pub use fields::*;

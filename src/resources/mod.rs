pub mod common;
pub mod quantity;
pub mod secret;
pub mod service;
pub mod statefulset;

pub use common::{
    API_VERSION, FIELD_MANAGER, KIND, label_selector, owner_reference, selector_labels,
    standard_labels,
};

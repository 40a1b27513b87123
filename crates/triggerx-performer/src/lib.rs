pub mod health;
pub mod selector;

pub use health::HealthProber;
pub use selector::{PerformerSelector, SelectorWeights};

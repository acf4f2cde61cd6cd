pub mod fixed;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixed::FixedModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;

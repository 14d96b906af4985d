pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::ScriptedEstimator;
pub use stub::{lunge_pose, StubEstimator};

#[cfg(feature = "backend-tract")]
pub use tract::TractEstimator;

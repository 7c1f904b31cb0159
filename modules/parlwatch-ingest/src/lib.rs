pub mod classify;
pub mod fetch;
pub mod normalize;
pub mod observe;
pub mod orchestrator;
pub mod resolve;
pub mod roster;
pub mod sources;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod validate;

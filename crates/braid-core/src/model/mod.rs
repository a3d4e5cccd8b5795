//! Domain enums shared by the reducers and the projection.

pub mod item;

pub use item::{BountyState, InvalidTransition, LifecycleState, ParseValueError, RootFamily};

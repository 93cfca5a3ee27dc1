//! Helpers built on the public handle API.

mod handle_map;
pub mod object_utils;

pub use handle_map::HandleMap;

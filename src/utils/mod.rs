//! Small helpers that don't belong to any particular module

/// Maps that hand out their own keys
pub mod id_map;
pub(crate) mod unwrap_or;

pub use id_map::IdMap;

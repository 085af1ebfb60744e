//! The ESS script registry.
//!
//! Operations are free functions taking the injected [`Store`] by
//! reference, grouped by component:
//!
//! - [`systems`], [`scripts`], [`locks`], [`libs`]: the content store
//! - [`sandbox`]: version lifecycle (create, promote, sync, delete, versions)
//! - [`scaffold`]: protocol and system creation with provenance
//! - [`manifest`]: checksum manifests and incremental sync (read-only)
//!
//! [`Store`]: crate::core::store::Store

pub mod libs;
pub mod locks;
pub mod manifest;
pub mod model;
pub mod sandbox;
pub mod scaffold;
pub mod scripts;
pub mod skeleton;
pub mod systems;

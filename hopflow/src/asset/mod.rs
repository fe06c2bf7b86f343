//! Asset store and scope resolver.
//!
//! Assets are the typed artifacts flowing through a mission. Each one is
//! bound to exactly one scope (mission, hop or tool step); promotion rewrites
//! that binding while the id stays stable, which is how a hop's product
//! becomes visible to the rest of the mission.

pub mod scope;
pub mod store;
pub mod types;

pub use scope::ScopeView;
pub use store::{create_asset, create_placeholder, promote_asset, reset_for_recovery};
pub use types::{
    hash_value, Asset, AssetDefinition, AssetRole, AssetSchema, AssetScope, AssetStatus,
    SchemaType, ScopeType,
};

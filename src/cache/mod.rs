//! # Refreshable Cache
//!
//! Generic keyed store kept warm by a pluggable [`RefreshSource`].
//!
//! ## Policies
//!
//! | Policy | Capacity | Staleness on read | Sweep |
//! |---|---|---|---|
//! | [`EvictionPolicy::Background`] | unbounded | none | `age > 10 x TTL` |
//! | [`EvictionPolicy::Lru`] | fixed | `age >= TTL` is a miss | `age > TTL` |
//!
//! ## Refresh model
//!
//! [`Cache::start`] runs one full refresh synchronously and launches the
//! background loop only if it succeeded. The loop ticks every TTL; each tick
//! runs a full refresh (background policy only), then the sweep, then
//! republishes the size gauge. Full and incremental refreshes share a single
//! update lock so they never interleave. Reads go straight to the store,
//! which has its own lock, and never wait on a refresh.
//!
//! A failed refresh leaves the previously cached data in place.

mod background;
mod component;
mod errors;
mod lru;
mod options;
mod store;

pub use background::BackgroundStore;
pub use component::{Cache, RefreshSource};
pub use errors::{CacheError, CacheResult};
pub use lru::LruStore;
pub use options::{CacheOptions, EvictionPolicy};
pub use store::SetGetter;

//! Vehicle catalog with created-by fallback and memoized lookups.
//!
//! Older vehicle records on some accounts never had the creator property
//! set, so an owner-filtered listing that comes back empty is retried without
//! the filter.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::contract::{Vehicle, VehicleFilter, VehicleSource};
use crate::error::RemoteError;

/// Default lifetime of memoized catalog lookups.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

pub struct VehicleCatalog<'a, S> {
    source: &'a S,
    vehicles: TtlCache<Option<i64>, Vec<Vehicle>>,
    users: TtlCache<String, Option<i64>>,
}

impl<'a, S: VehicleSource> VehicleCatalog<'a, S> {
    pub fn new(source: &'a S, ttl: Duration) -> Self {
        Self {
            source,
            vehicles: TtlCache::new(ttl),
            users: TtlCache::new(ttl),
        }
    }

    /// Vehicles created by `owner`, or every visible vehicle when there is no
    /// owner or the owner filter matches nothing.
    pub async fn list_vehicles(&self, owner: Option<i64>) -> Result<Vec<Vehicle>, RemoteError> {
        if let Some(cached) = self.vehicles.get(&owner) {
            debug!(?owner, count = cached.len(), "Vehicle list served from cache");
            return Ok(cached);
        }

        let vehicles = match owner {
            Some(user_id) => {
                let own = self
                    .source
                    .search_vehicles(VehicleFilter::CreatedBy(user_id))
                    .await?;
                if own.is_empty() {
                    warn!(user_id, "No vehicles carry this creator, falling back to full catalog");
                    self.source.search_vehicles(VehicleFilter::All).await?
                } else {
                    own
                }
            }
            None => self.source.search_vehicles(VehicleFilter::All).await?,
        };

        info!(?owner, count = vehicles.len(), "Listed vehicles");
        self.vehicles.insert(owner, vehicles.clone());
        Ok(vehicles)
    }

    /// Look up a single vehicle by id within the owner's view.
    pub async fn find_vehicle(
        &self,
        owner: Option<i64>,
        vehicle_id: i64,
    ) -> Result<Option<Vehicle>, RemoteError> {
        let vehicles = self.list_vehicles(owner).await?;
        Ok(vehicles.into_iter().find(|v| v.id == vehicle_id))
    }

    /// Operator search over registration and name.
    pub async fn search(&self, owner: Option<i64>, needle: &str) -> Result<Vec<Vehicle>, RemoteError> {
        let vehicles = self.list_vehicles(owner).await?;
        Ok(vehicles
            .into_iter()
            .filter(|v| v.matches_search(needle))
            .collect())
    }

    pub async fn resolve_user(&self, user_name: &str) -> Result<Option<i64>, RemoteError> {
        let key = user_name.to_string();
        if let Some(cached) = self.users.get(&key) {
            return Ok(cached);
        }
        let id = self.source.find_user_id(user_name).await?;
        info!(user = user_name, ?id, "Resolved user id");
        self.users.insert(key, id);
        Ok(id)
    }
}

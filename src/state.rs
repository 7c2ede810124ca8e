use std::sync::Arc;

use crate::admin::AdminService;
use crate::cache::{MagicCacheData, MagicCacheResponse, MagicEngine, SharedCache};
use crate::config::Config;
use crate::invalidation::{InvalidationGraph, Invalidator};
use crate::permission::{IsAuthenticated, PermissionResolver};
use crate::store::SharedStore;
use crate::sysconfig::{SysConfig, UserConfig};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub cache: SharedCache,
    /// Memoized permission lookups
    pub magic: MagicCacheData,
    /// Memoized handler responses
    pub responses: MagicCacheResponse,
    pub resolver: PermissionResolver,
    pub guard: IsAuthenticated,
    pub sys_config: SysConfig,
    pub user_config: UserConfig,
    pub invalidator: Invalidator,
    pub admin: AdminService,
}

impl AppState {
    /// Wire every service over one store and one cache backend
    pub fn new(config: Config, store: SharedStore, cache: SharedCache) -> Self {
        // Readers and the invalidator share one engine
        let engine = MagicEngine::new(cache.clone());
        let magic = MagicCacheData::with_engine(engine.clone());
        let responses = MagicCacheResponse::with_engine(engine.clone());
        let resolver = PermissionResolver::new(store.clone(), magic.clone());
        let sys_config = SysConfig::new(store.clone(), cache.clone());
        let user_config = UserConfig::new(store.clone(), cache.clone(), sys_config.clone());
        let guard = IsAuthenticated::new(
            resolver.clone(),
            sys_config.clone(),
            &config.permission.white_urls,
        );
        let invalidator = Invalidator::new(InvalidationGraph::standard(), store.clone(), engine);
        let admin = AdminService::new(store.clone(), invalidator.clone());

        Self {
            config: Arc::new(config),
            store,
            cache,
            magic,
            responses,
            resolver,
            guard,
            sys_config,
            user_config,
            invalidator,
            admin,
        }
    }
}

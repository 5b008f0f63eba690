//! Shared service fixtures: a fake connection pool, a user service with an
//! exposed method set, and an order service that calls the user service
//! through whatever binding the topology chose for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lokstra::prelude::*;
use serde_json::{json, Value};

pub struct DbPool {
    pub dsn: String,
}

pub struct UserService {
    #[allow(dead_code)]
    pub db: Arc<DbPool>,
    pub get_hits: Arc<AtomicUsize>,
}

impl UserService {
    pub fn lookup(&self, id: &str) -> Value {
        self.get_hits.fetch_add(1, Ordering::SeqCst);
        json!({ "id": id, "name": format!("user-{id}") })
    }
}

impl ExposedService for UserService {
    fn methods(&self) -> Vec<ServiceMethod> {
        let get_hits = self.get_hits.clone();
        vec![
            ServiceMethod::new(
                "list",
                arc_handler(|_ctx: Context| async { format::json(json!([])) }),
            ),
            ServiceMethod::new(
                "get_by_id",
                arc_handler(move |ctx: Context| {
                    let get_hits = get_hits.clone();
                    async move {
                        let id = ctx.require_param("id")?.to_string();
                        get_hits.fetch_add(1, Ordering::SeqCst);
                        format::json(json!({ "id": id, "name": format!("user-{id}") }))
                    }
                }),
            ),
        ]
    }
}

pub struct OrderService {
    registry: Arc<Registry>,
    users: ServiceHandle,
}

impl OrderService {
    /// Fetch a user through the dependency, local instance or remote client
    /// alike.
    pub async fn fetch_user(&self, id: &str) -> Result<Value> {
        if let Some(local) = self.users.downcast::<UserService>() {
            return Ok(local.lookup(id));
        }
        if let Some(remote) = self.users.downcast::<RemoteClient>() {
            return remote
                .call(&self.registry, "get_by_id", CallArgs::new().param("id", id))
                .await;
        }
        Err(Error::Message("user dependency has an unexpected type".to_string()))
    }
}

impl ExposedService for OrderService {
    fn methods(&self) -> Vec<ServiceMethod> {
        let registry = self.registry.clone();
        let users = self.users.clone();
        vec![ServiceMethod::new(
            "create",
            arc_handler(move |ctx: Context| {
                let registry = registry.clone();
                let users = users.clone();
                async move {
                    let body: Value = ctx.parse_json()?;
                    let user_id = body
                        .get("userId")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::BadRequest("userId is required".to_string()))?;
                    let svc = OrderService { registry, users };
                    let user = svc.fetch_user(user_id).await?;
                    format::json(json!({ "order": { "id": "o1" }, "user": user }))
                }
            }),
        )]
    }
}

pub fn user_metadata() -> RoutingMetadata {
    RoutingMetadata::new(ConversionRule::rest("user", "users"))
}

pub fn order_metadata() -> RoutingMetadata {
    RoutingMetadata::new(ConversionRule::rest("order", "orders"))
}

/// Register the `db-pool` service type (local only) and return its
/// factory-invocation counter.
pub fn register_db_pool_type(registry: &Arc<Registry>) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_factory = calls.clone();
    registry
        .register_service_type(ServiceType::new("db-pool").local(ServiceFactory::from_config(
            move |config| {
                calls_in_factory.fetch_add(1, Ordering::SeqCst);
                let dsn = config
                    .get("dsn")
                    .and_then(Value::as_str)
                    .unwrap_or("postgresql://localhost/db")
                    .to_string();
                Ok(ServiceHandle::new(DbPool { dsn }))
            },
        )))
        .expect("register db-pool type");
    calls
}

/// Register the `user-svc` type (local + remote) and return the counter of
/// `get_by_id` hits served by local instances built from this type.
pub fn register_user_type(registry: &Arc<Registry>) -> Arc<AtomicUsize> {
    let get_hits = Arc::new(AtomicUsize::new(0));
    let hits_in_factory = get_hits.clone();
    registry
        .register_service_type(
            ServiceType::new("user-svc")
                .local(ServiceFactory::full(move |deps, _config| {
                    let db = deps
                        .get("db")
                        .and_then(ServiceHandle::downcast::<DbPool>)
                        .ok_or_else(|| Error::Message("db dependency missing".to_string()))?;
                    Ok(ServiceHandle::with_exposed(UserService {
                        db,
                        get_hits: hits_in_factory.clone(),
                    }))
                }))
                .remote(lokstra::client_router::remote_client_factory(user_metadata()))
                .routing(user_metadata()),
        )
        .expect("register user-svc type");
    get_hits
}

/// Register the `order-svc` type (local + remote).
pub fn register_order_type(registry: &Arc<Registry>) {
    let registry_for_factory = registry.clone();
    registry
        .register_service_type(
            ServiceType::new("order-svc")
                .local(ServiceFactory::full(move |deps, _config| {
                    let users = deps
                        .get("users")
                        .cloned()
                        .ok_or_else(|| Error::Message("users dependency missing".to_string()))?;
                    Ok(ServiceHandle::with_exposed(OrderService {
                        registry: registry_for_factory.clone(),
                        users,
                    }))
                }))
                .remote(lokstra::client_router::remote_client_factory(order_metadata()))
                .routing(order_metadata()),
        )
        .expect("register order-svc type");
}

/// Factory and handler counters observed by the end-to-end scenarios.
pub struct ServiceCounters {
    pub db_calls: Arc<AtomicUsize>,
    pub user_get_hits: Arc<AtomicUsize>,
}

/// A registry with all three service types registered and the standard
/// service instances declared, plus the counters to observe them.
pub fn full_registry(with_orders: bool) -> (Arc<Registry>, ServiceCounters) {
    let registry = Arc::new(Registry::new());
    let db_calls = register_db_pool_type(&registry);
    let user_get_hits = register_user_type(&registry);
    register_order_type(&registry);
    declare_services(&registry, with_orders);
    (
        registry,
        ServiceCounters {
            db_calls,
            user_get_hits,
        },
    )
}

/// Declare the standard service instances: `db-pool`, `user-svc` (depends
/// on the pool) and optionally `order-svc` (depends on the user service).
pub fn declare_services(registry: &Arc<Registry>, with_orders: bool) {
    registry.declare_service(ServiceDef {
        name: "db-pool".to_string(),
        type_name: "db-pool".to_string(),
        config: json!({ "dsn": "postgresql://localhost/db" }),
        depends_on: std::collections::HashMap::new(),
    });
    registry.declare_service(ServiceDef {
        name: "user-svc".to_string(),
        type_name: "user-svc".to_string(),
        config: Value::Null,
        depends_on: std::collections::HashMap::from([("db".to_string(), "db-pool".to_string())]),
    });
    if with_orders {
        registry.declare_service(ServiceDef {
            name: "order-svc".to_string(),
            type_name: "order-svc".to_string(),
            config: Value::Null,
            depends_on: std::collections::HashMap::from([(
                "users".to_string(),
                "user-svc".to_string(),
            )]),
        });
    }
}

// Shared fixtures for dispatch integration tests
#![allow(dead_code)]

use chrono::Utc;
use courier_dispatch::dispatch::GeoPoint;
use courier_dispatch::{
    Agent, AssignmentEngine, DispatchConfig, InMemoryStore, LoggingNotifier, Notifier,
    OrderRequest,
};
use std::sync::Arc;

/// Downtown Dubai
pub const PICKUP: (f64, f64) = (25.2048, 55.2708);

pub fn pickup() -> GeoPoint {
    GeoPoint::new(PICKUP.0, PICKUP.1).expect("valid pickup")
}

pub fn engine() -> Arc<AssignmentEngine> {
    engine_with(DispatchConfig::default(), Arc::new(LoggingNotifier))
}

pub fn engine_with(config: DispatchConfig, notifier: Arc<dyn Notifier>) -> Arc<AssignmentEngine> {
    Arc::new(AssignmentEngine::new(
        &config,
        Arc::new(InMemoryStore::new()),
        notifier,
    ))
}

/// Agent with a fresh fix `north_km` due north of the pickup
pub fn agent_north(id: &str, north_km: f64) -> Agent {
    Agent::new(id, 20.0).with_location(pickup().offset_km(north_km, 0.0), Utc::now())
}

pub fn order_request(id: &str, order_type: &str, mode: &str) -> OrderRequest {
    OrderRequest {
        id: Some(id.to_string()),
        pickup_lat: Some(PICKUP.0),
        pickup_lng: Some(PICKUP.1),
        weight_kg: 1.0,
        order_type: order_type.to_string(),
        radius_km: Some(5.0),
        mode: Some(mode.to_string()),
        ..OrderRequest::default()
    }
}

// Concurrent claim tests: a broadcast order is claimed by exactly one agent

mod common;

use chrono::Utc;
use common::{agent_north, engine, order_request, pickup};
use courier_dispatch::{
    Agent, AgentId, AssignmentOutcome, DeliveryStatus, DispatchError, OrderId, RejectionReason,
};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dubai_broadcast_scenario() {
    let engine = engine();
    engine.register_agent(agent_north("one-km", 1.0));
    engine.register_agent(agent_north("four-km", 4.0));
    engine.register_agent(agent_north("eight-km", 8.0));

    let outcome = engine
        .submit_order(order_request("fast-1", "fast", "broadcast"))
        .await
        .unwrap();

    let offered: Vec<AgentId> = match outcome {
        AssignmentOutcome::Offered { agents, .. } => {
            agents.into_iter().map(|c| c.agent_id).collect()
        }
        other => panic!("expected a broadcast offer, got {other:?}"),
    };
    assert_eq!(
        offered,
        vec![AgentId::from("one-km"), AgentId::from("four-km")]
    );

    let order_id = OrderId::from("fast-1");
    let handles = offered.into_iter().map(|agent_id| {
        let engine = engine.clone();
        let order_id = order_id.clone();
        tokio::spawn(async move { engine.claim(&order_id, &agent_id).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<&AssignmentOutcome> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(DispatchError::ClaimConflict { .. }))));

    let delivery = engine.delivery(&order_id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Assigned);
    assert_eq!(delivery.assigned_agent.as_ref(), winners[0].assigned_agent());

    // late claims lose, even from agents that were never offered the order
    let err = engine
        .claim(&order_id, &AgentId::from("eight-km"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ClaimConflict { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_concurrent_claims_have_one_winner() {
    let engine = engine();
    let agents: Vec<AgentId> = (0..16)
        .map(|i| {
            let id = format!("agent-{i:02}");
            engine.register_agent(agent_north(&id, 0.2 * i as f64));
            AgentId::from(id)
        })
        .collect();

    engine
        .submit_order(order_request("hot", "regular", "broadcast"))
        .await
        .unwrap();

    let order_id = OrderId::from("hot");
    let handles = agents.iter().cloned().map(|agent_id| {
        let engine = engine.clone();
        let order_id = order_id.clone();
        tokio::spawn(async move { engine.claim(&order_id, &agent_id).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::ClaimConflict { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, agents.len() - 1);

    let stats = engine.metrics().get_stats();
    assert_eq!(stats.assignments, 1);
    assert_eq!(stats.claim_conflicts as usize, agents.len() - 1);

    // exactly one agent carries the order
    let holders = agents
        .iter()
        .filter(|id| engine.registry().get(id).unwrap().holds(&order_id))
        .count();
    assert_eq!(holders, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_agent_claiming_many_fast_orders_stops_at_cap() {
    let engine = engine();
    engine.register_agent(agent_north("rider", 1.0));

    let order_ids: Vec<OrderId> = (0..6).map(|i| OrderId(format!("fast-{i}"))).collect();
    for id in &order_ids {
        engine
            .submit_order(order_request(id.as_str(), "fast", "broadcast"))
            .await
            .unwrap();
    }

    let rider = AgentId::from("rider");
    let handles = order_ids.iter().cloned().map(|order_id| {
        let engine = engine.clone();
        let rider = rider.clone();
        tokio::spawn(async move { engine.claim(&order_id, &rider).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            DispatchError::NotEligible {
                reason: RejectionReason::RestrictedTypeCapacity { held: 2, cap: 2 },
                ..
            }
        ));
    }
    assert_eq!(engine.registry().get(&rider).unwrap().active.len(), 2);
}

#[tokio::test]
async fn test_nearest_mode_makes_a_single_claim() {
    let engine = engine();
    let fix_at = Utc::now();
    let spot = pickup().offset_km(0.5, 0.0);
    engine.register_agent(Agent::new("b", 20.0).with_location(spot, fix_at));
    engine.register_agent(Agent::new("a", 20.0).with_location(spot, fix_at));

    let outcome = engine
        .submit_order(order_request("o-1", "food", "nearest"))
        .await
        .unwrap();
    // equal distance and equal freshness fall back to the lower id
    assert_eq!(outcome.assigned_agent(), Some(&AgentId::from("a")));
    assert!(engine.registry().get(&AgentId::from("b")).unwrap().active.is_empty());

    let order = engine.order(&OrderId::from("o-1")).await.unwrap();
    assert!(matches!(
        engine.assign(&order).await,
        Err(DispatchError::NotPending {
            status: DeliveryStatus::Assigned,
            ..
        })
    ));
}

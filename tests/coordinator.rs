mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::FakePlanet;
use planet_acquire::coordinator::{CoordinatorOptions, OrderCoordinator};
use planet_acquire::error::{OrderError, ProviderError};
use planet_acquire::order::{OrderHandle, OrderState};
use planet_acquire::order_plan::{build, OrderRequest};

fn requests(orders: usize) -> Vec<OrderRequest> {
    let ids: Vec<String> = (0..orders * 10).map(|i| format!("scene_{i:04}")).collect();
    build(&ids, "PSScene", &["analytic_udm2".to_string()], 10, "test").unwrap()
}

fn options() -> CoordinatorOptions {
    CoordinatorOptions {
        poll_interval: Duration::from_secs(30),
        timeout: Duration::from_secs(600),
        ..CoordinatorOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_orders_reach_success() {
    let planet = FakePlanet::default();
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(3)).await;

    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert!(report.error.is_none());
        let handle = report.handle.as_ref().unwrap();
        assert_eq!(handle.state, OrderState::Success);
        assert_eq!(
            handle.history(),
            &[OrderState::Queued, OrderState::Running, OrderState::Success]
        );
        assert_eq!(handle.result_urls.len(), 1);
    }
    assert_eq!(planet.create_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reports_follow_request_order() {
    let mut planet = FakePlanet::default();
    // First order takes much longer than the rest.
    planet.scripts.insert(
        1,
        vec![
            OrderState::Running,
            OrderState::Running,
            OrderState::Running,
            OrderState::Success,
        ],
    );
    let requests = requests(4);
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests.clone()).await;

    let reported: Vec<OrderRequest> = reports.into_iter().map(|r| r.request).collect();
    assert_eq!(reported, requests);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_returns_queued_handle() {
    let planet = FakePlanet::default();
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            timeout: Duration::ZERO,
            ..options()
        },
    );

    let (handle, error) = coordinator.wait(OrderHandle::new("order-1")).await;

    assert_eq!(handle.state, OrderState::Queued);
    assert!(matches!(
        error,
        Some(OrderError::Timeout {
            last_state: OrderState::Queued,
            ..
        })
    ));
    assert_eq!(planet.poll_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_last_observed_state() {
    let planet = FakePlanet {
        script: vec![OrderState::Running],
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            timeout: Duration::from_secs(90),
            ..options()
        },
    );

    let reports = coordinator.submit_and_wait(requests(1)).await;

    let handle = reports[0].handle.as_ref().unwrap();
    assert_eq!(handle.state, OrderState::Running);
    assert!(matches!(
        reports[0].error,
        Some(OrderError::Timeout {
            last_state: OrderState::Running,
            ..
        })
    ));
    assert_eq!(planet.poll_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_state_regression_is_ignored() {
    let planet = FakePlanet {
        script: vec![OrderState::Running, OrderState::Queued, OrderState::Success],
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    let handle = reports[0].handle.as_ref().unwrap();
    assert_eq!(
        handle.history(),
        &[OrderState::Queued, OrderState::Running, OrderState::Success]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_order_is_reported() {
    let planet = FakePlanet {
        script: vec![OrderState::Running, OrderState::Failed],
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    assert!(!reports[0].is_downloadable());
    assert!(matches!(
        reports[0].error,
        Some(OrderError::Failed {
            state: OrderState::Failed,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_partial_order_is_downloadable() {
    let planet = FakePlanet {
        script: vec![OrderState::Partial],
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    assert!(reports[0].error.is_none());
    assert!(reports[0].is_downloadable());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_submission_is_not_retried() {
    let planet = FakePlanet::default();
    planet
        .create_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Rejected {
            status: 400,
            message: "Unable to accept order".to_string(),
        });
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            concurrency: 1,
            ..options()
        },
    );

    let reports = coordinator.submit_and_wait(requests(2)).await;

    assert!(reports[0].handle.is_none());
    assert!(matches!(
        reports[0].error,
        Some(OrderError::Submission(ProviderError::Rejected { status: 400, .. }))
    ));
    // The second request is unaffected.
    assert!(reports[1].error.is_none());
    assert_eq!(planet.create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_submission_is_retried() {
    let planet = FakePlanet::default();
    planet
        .create_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Server {
            status: 503,
            message: "Service Unavailable".to_string(),
        });
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    assert!(reports[0].error.is_none());
    assert_eq!(planet.create_calls.load(Ordering::SeqCst), 2);
    assert_eq!(planet.submitted.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failure_is_tolerated() {
    let planet = FakePlanet::default();
    planet
        .poll_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::RateLimited { retry_after: None });
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    assert!(reports[0].error.is_none());
    assert_eq!(
        reports[0].handle.as_ref().unwrap().state,
        OrderState::Success
    );
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_poll_gives_up() {
    let planet = FakePlanet::default();
    planet
        .poll_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Unauthorized("invalid API key".to_string()));
    let coordinator = OrderCoordinator::new(&planet, options());

    let reports = coordinator.submit_and_wait(requests(1)).await;

    assert_eq!(
        reports[0].handle.as_ref().unwrap().state,
        OrderState::Queued
    );
    assert!(matches!(
        reports[0].error,
        Some(OrderError::Status {
            source: ProviderError::Unauthorized(_),
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hung_status_request_is_bounded_by_timeout() {
    let planet = FakePlanet {
        hang_polls: true,
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            concurrency: 1,
            ..options()
        },
    );

    let reports = tokio::time::timeout(
        Duration::from_secs(3600),
        coordinator.submit_and_wait(requests(2)),
    )
    .await
    .expect("every order should finish within its own timeout");

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.handle.as_ref().unwrap().state, OrderState::Queued);
        assert!(matches!(
            report.error,
            Some(OrderError::Timeout {
                last_state: OrderState::Queued,
                ..
            })
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_reports_every_order() {
    let mut planet = FakePlanet::default();
    // The second order is already complete when it is created.
    planet.created.insert(2, OrderState::Success);
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            timeout: Duration::ZERO,
            concurrency: 1,
            ..options()
        },
    );

    let reports = coordinator.submit_and_wait(requests(3)).await;

    assert_eq!(reports.len(), 3);
    assert!(reports[1].error.is_none());
    assert!(reports[1].is_downloadable());
    for index in [0, 2] {
        assert_eq!(
            reports[index].handle.as_ref().unwrap().state,
            OrderState::Queued
        );
        assert!(matches!(
            reports[index].error,
            Some(OrderError::Timeout { .. })
        ));
    }
    assert_eq!(planet.poll_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_orders_in_flight_are_bounded() {
    let planet = FakePlanet {
        latency: Duration::from_secs(1),
        ..FakePlanet::default()
    };
    let coordinator = OrderCoordinator::new(
        &planet,
        CoordinatorOptions {
            concurrency: 2,
            ..options()
        },
    );

    let reports = coordinator.submit_and_wait(requests(6)).await;

    assert!(reports.iter().all(|r| r.error.is_none()));
    assert_eq!(planet.polls_in_flight.peak(), 2);
}

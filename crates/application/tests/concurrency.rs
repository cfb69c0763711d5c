use std::sync::Arc;
use std::time::Duration;

use application::{ConnectionHandle, Hub, RateLimiter, RealtimeHub};
use domain::{DeviceLabel, RealtimeEvent, UserId};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_exceed_capacity() {
    // 每 3 秒恢复一个令牌，测试期间不会补充
    let limiter = Arc::new(RateLimiter::new(20, Duration::from_secs(60), Duration::from_secs(180)));

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move { limiter.allow("10.0.0.9") }));
    }

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 20);
    assert!(limiter.allow("10.0.0.10"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hub_counts_stay_consistent_under_churn() {
    let (hub, _loop) = Hub::start(16);
    let users: Vec<UserId> = (0..8).map(|_| UserId::generate()).collect();

    // 每个用户两台设备并发上线，随后各自下线一台
    let mut tasks = Vec::new();
    for &user in &users {
        for device in ["Android", "Web"] {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (conn, rx) = ConnectionHandle::new(user, DeviceLabel::new(device), 8);
                hub.register(conn.clone()).await.unwrap();
                (conn, rx)
            }));
        }
    }
    let mut conns = Vec::new();
    for task in tasks {
        conns.push(task.await.unwrap());
    }
    assert_eq!(hub.online_user_count().await, users.len());
    assert_eq!(hub.total_connection_count().await, users.len() * 2);

    let web: Vec<_> = conns
        .iter()
        .filter(|(conn, _)| conn.device().as_str() == "Web")
        .map(|(conn, _)| (conn.id(), conn.user_id()))
        .collect();
    let mut tasks = Vec::new();
    for (conn_id, user_id) in web {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move { hub.unregister(conn_id, user_id).await.unwrap() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(hub.online_user_count().await, users.len());
    assert_eq!(hub.total_connection_count().await, users.len());
    let distribution = hub.device_distribution().await;
    assert_eq!(distribution.get("Android"), Some(&users.len()));
    assert_eq!(distribution.get("Web"), None);

    let accepted = hub
        .broadcast_to_all(&RealtimeEvent::GroupCreated(serde_json::json!({"group_id": 1})))
        .await
        .unwrap();
    assert_eq!(accepted, users.len());
}

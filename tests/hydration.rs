use leptos::prelude::*;
use leptos_flow::{
    hydration::HydrationRegistry, use_async_flow, use_flow, AsyncFlowState, FlowError,
    FlowStatus, Interrupt,
};
use serde::{Deserialize, Serialize};
use tokio::task::LocalSet;

mod common;
use common::{hydrating_root, init_renderer, server_root, tick, TestAsyncFlow, TestFlow};

#[cfg(feature = "ssr")]
mod ssr {
    pub use futures::StreamExt;
    pub use std::time::Duration;
}
#[cfg(feature = "ssr")]
use ssr::*;

#[tokio::test]
async fn hydration_reads_server_value_then_live_value() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestFlow::new("server".to_string());

            let server = HydrationRegistry::new();
            server.provide();
            let value = use_flow(flow.source());
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("server"));
            assert_eq!(server.queued(), 1);
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register a value"))?;
            assert_eq!(script, r#"<script>self.__flow_merge({"0":"server"})</script>"#);

            // the client has moved on by the time it hydrates
            flow.emit("client".to_string());
            let _client = hydrating_root();
            let client = HydrationRegistry::from_scripts([script.as_str()])?;
            client.provide();
            let value = use_flow(flow.source());
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("server"));

            tick().await;
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("client"));
            // handed over once hydration committed
            assert_eq!(client.hydrate("0"), None);
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn discarded_hydrating_pass_keeps_the_server_value() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestFlow::new("server".to_string());
            let server = HydrationRegistry::new();
            server.provide();
            let _ = use_flow(flow.source()).get_untracked();
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register a value"))?;

            flow.emit("client".to_string());
            let client = HydrationRegistry::from_scripts([script.as_str()])?;

            // the first hydrating pass is thrown away before it commits
            let attempt = hydrating_root();
            client.provide();
            let value = use_flow(flow.source());
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("server"));
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("server"));
            attempt.cleanup();
            tick().await;

            let _retry = hydrating_root();
            client.provide();
            let value = use_flow(flow.source());
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("server"));

            tick().await;
            assert_eq!(value.get_untracked().as_deref().map(String::as_str), Some("client"));
            assert_eq!(client.hydrate("0"), None);
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn identical_values_are_sent_once() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let first = TestFlow::new(7u32);
            let second = TestFlow::new(7u32);

            let server = HydrationRegistry::new();
            server.provide();
            let _ = use_flow(first.source()).get_untracked();
            let _ = use_flow(second.source()).get_untracked();
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register values"))?;
            assert!(script.contains(r#"self.__flow_merge({"0":7})"#));
            assert!(script.contains(r#"self.__flow_deref({"1":"0"})"#));

            first.emit(8);
            second.emit(9);
            let _client = hydrating_root();
            HydrationRegistry::from_scripts([script.as_str()])?.provide();
            let first = use_flow(first.source());
            let second = use_flow(second.source());
            assert_eq!(first.get_untracked().as_deref(), Some(&7));
            assert_eq!(second.get_untracked().as_deref(), Some(&7));
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn hydrated_success_is_retained_while_refetching() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestAsyncFlow::success(42);

            let server = HydrationRegistry::new();
            server.provide();
            let (accessor, _) = use_async_flow(flow.source());
            assert!(matches!(accessor.get_untracked().map(|accessor| accessor.get()), Some(Ok(42))));
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register a value"))?;
            assert!(script.contains(r#""status":"success""#));

            flow.set(AsyncFlowState::pending());
            let _client = hydrating_root();
            HydrationRegistry::from_scripts([script.as_str()])?.provide();
            let (accessor, state) = use_async_flow(flow.source());
            assert_eq!(state.get_untracked().status(), FlowStatus::Success);
            assert!(matches!(accessor.get_untracked().map(|accessor| accessor.get()), Some(Ok(42))));

            tick().await;
            assert_eq!(state.get_untracked().status(), FlowStatus::Updating);
            assert!(matches!(accessor.get_untracked().map(|accessor| accessor.get()), Some(Ok(42))));
            assert_eq!(flow.future_count(), 0);
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn pending_without_data_while_hydrating_is_fatal() {
    let _client = hydrating_root();
    LocalSet::new()
        .run_until(async {
            HydrationRegistry::new().provide();
            let flow = TestAsyncFlow::<i32>::pending();
            let (accessor, state) = use_async_flow(flow.source());

            match accessor.get_untracked().map(|accessor| accessor.get()) {
                Some(Err(Interrupt::Fatal(error))) => assert_eq!(
                    error,
                    FlowError::PendingDuringHydration {
                        id: "0".to_string()
                    }
                ),
                other => panic!("expected a hydration error, got {other:?}"),
            }
            assert_eq!(state.get_untracked().status(), FlowStatus::Updating);
            assert_eq!(flow.future_count(), 0);
        })
        .await
}

#[tokio::test]
async fn server_retry_registers_settled_value() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestAsyncFlow::<i32>::pending();

            let server = HydrationRegistry::new();
            server.provide();
            let (accessor, _) = use_async_flow(flow.source());
            let accessor = accessor
                .get_untracked()
                .ok_or_else(|| anyhow::anyhow!("source is not skipped"))?;
            let suspension = match accessor.get() {
                Err(Interrupt::Suspend(suspension)) => suspension,
                other => anyhow::bail!("expected a suspension, got {other:?}"),
            };

            flow.set(AsyncFlowState::success(5));
            suspension.await;
            assert!(matches!(accessor.get(), Ok(5)));

            assert_eq!(server.queued(), 1);
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register a value"))?;
            assert!(script.contains(r#""data":5"#));
            assert!(script.contains(r#""status":"success""#));
            assert!(!script.contains("pending"));
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn without_registry_hydration_reads_live_values() {
    let _client = hydrating_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestFlow::new(3u32);
            let value = use_flow(flow.source());
            assert_eq!(value.get_untracked().as_deref(), Some(&3));
        })
        .await
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    id: u64,
    name: String,
}

#[tokio::test]
async fn payload_without_default_round_trips() -> anyhow::Result<()> {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let record = Record {
                id: 9,
                name: "nine".to_string(),
            };
            let flow = TestAsyncFlow::success(record.clone());

            let server = HydrationRegistry::new();
            server.provide();
            let (accessor, _) = use_async_flow(flow.source());
            assert_eq!(
                accessor.get_untracked().and_then(|accessor| accessor.get().ok()),
                Some(record.clone())
            );
            let script = server
                .get_script(None)
                .ok_or_else(|| anyhow::anyhow!("server render should register a value"))?;

            flow.set(AsyncFlowState::pending());
            let _client = hydrating_root();
            HydrationRegistry::from_scripts([script.as_str()])?.provide();
            let (accessor, state) = use_async_flow(flow.source());
            assert_eq!(state.get_untracked().current_data(), Some(&record));
            assert_eq!(
                accessor.get_untracked().and_then(|accessor| accessor.get().ok()),
                Some(record)
            );
            anyhow::Ok(())
        })
        .await
}

#[tokio::test]
async fn client_render_after_hydration_registers_nothing() {
    let _owner = init_renderer();
    LocalSet::new()
        .run_until(async {
            let registry = HydrationRegistry::new();
            registry.provide();
            let flow = TestFlow::new(1u32);
            let _ = use_flow(flow.source()).get_untracked();
            tick().await;
            assert_eq!(registry.queued(), 0);
        })
        .await
}

#[cfg(feature = "ssr")]
#[tokio::test]
async fn server_read_gives_up() {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let flow = TestAsyncFlow::<i32>::pending();
            let (accessor, _) = use_async_flow(flow.source());
            let accessor = accessor.get_untracked().expect("source is not skipped");

            let result = accessor.read_timeout(Duration::from_millis(50)).await;
            assert!(matches!(result, Err(Interrupt::Fatal(FlowError::Timeout))));
        })
        .await
}

#[cfg(feature = "ssr")]
#[tokio::test]
async fn render_waits_for_the_flow() {
    let _server = server_root();
    LocalSet::new()
        .run_until(async {
            let registry = HydrationRegistry::new();
            registry.provide();
            let flow = TestAsyncFlow::<i32>::pending();
            let (accessor, _) = use_async_flow(flow.source());

            let app = view! {
                <Suspense>
                {move || {
                    let accessor = accessor.get();
                    Suspend::new(async move {
                        let value = match accessor {
                            Some(accessor) => accessor.read().await.ok(),
                            None => None,
                        };
                        format!("value: {}", value.unwrap_or_default())
                    })
                }}
                </Suspense>
            };
            let (html, ()) = futures::join!(app.to_html_stream_in_order().collect::<String>(), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flow.set(AsyncFlowState::success(5));
            });
            assert!(html.contains("value: 5"), "{html}");

            let script = registry.get_script(None).expect("the render registered its value");
            assert!(script.contains(r#""data":5"#));
        })
        .await
}

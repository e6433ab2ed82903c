//! Messaging through the Core and the autosubscribe extension.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{settle, Log, RecorderSpec};
use serde_json::json;
use spakit::extensions::ModuleAutoSubscribe;
use spakit::{Core, Extension, Message, StartOptions};

fn core_with_autosubscribe() -> Core {
    let core = Core::new();
    core.use_extensions([Arc::new(ModuleAutoSubscribe::new()) as Arc<dyn Extension>])
        .unwrap();
    core.init().unwrap();
    core
}

#[tokio::test]
async fn core_delivers_after_the_current_task_yields() {
    let core = Core::new();
    core.init().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    core.on_message("ping", move |message: &Message| {
        assert_eq!(message.payload["n"], 1);
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    core.publish_async(Message::new("ping").with_payload(json!({ "n": 1 })))
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn throwing_handler_does_not_starve_the_other() {
    let core = Core::new();
    core.init().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    core.on_message("t", |_: &Message| -> anyhow::Result<()> {
        anyhow::bail!("first handler fails")
    })
    .unwrap();
    core.on_message("t", move |_: &Message| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    core.publish_async(Message::new("t")).unwrap();
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_message_type_is_rejected_through_the_core() {
    let core = Core::new();
    core.init().unwrap();
    let err = core.publish_async(Message::new("")).unwrap_err();
    assert_eq!(err.code(), "bus.empty_type");
}

#[tokio::test]
async fn autosubscribed_module_receives_until_stopped() {
    let core = core_with_autosubscribe();
    let log = Log::default();
    core.add_module(
        "listener",
        RecorderSpec::new()
            .subscribing(&["tick", "tock"])
            .receiving()
            .factory(&log),
    )
    .unwrap();
    core.start_module("listener", StartOptions::new()).unwrap();
    assert_eq!(core.bus().subscriber_count("tick"), 1);

    core.publish_async(Message::new("tick")).unwrap();
    core.publish_async(Message::new("tock")).unwrap();
    core.publish_async(Message::new("other")).unwrap();
    settle().await;
    assert_eq!(log.count("msg:listener:"), 2);

    core.stop_module("listener", None);
    assert_eq!(core.bus().subscriber_count("tick"), 0);
    assert_eq!(core.bus().subscriber_count("tock"), 0);

    core.publish_async(Message::new("tick")).unwrap();
    settle().await;
    assert_eq!(log.count("msg:listener:"), 2);
}

#[tokio::test]
async fn each_instance_gets_its_own_subscriptions() {
    let core = core_with_autosubscribe();
    let log = Log::default();
    core.add_module(
        "listener",
        RecorderSpec::new().subscribing(&["tick"]).receiving().factory(&log),
    )
    .unwrap();
    core.start_module("listener", StartOptions::new()).unwrap();
    core.start_module("listener", StartOptions::new().with_instance_id("second"))
        .unwrap();
    assert_eq!(core.bus().subscriber_count("tick"), 2);

    core.publish_async(Message::new("tick")).unwrap();
    settle().await;
    assert_eq!(log.count("msg:listener:tick"), 1);
    assert_eq!(log.count("msg:second:tick"), 1);

    core.stop_module("listener", Some("second"));
    assert_eq!(core.bus().subscriber_count("tick"), 1);
}

#[tokio::test]
async fn subscriber_without_receiver_fails_to_start() {
    let core = core_with_autosubscribe();
    let log = Log::default();
    core.add_module(
        "deaf",
        RecorderSpec::new().subscribing(&["tick"]).factory(&log),
    )
    .unwrap();

    core.start_module("deaf", StartOptions::new()).unwrap();
    assert!(core.running_modules().is_empty());
    assert_eq!(log.count("init:deaf"), 1, "real init runs before the check");
    assert_eq!(core.bus().subscriber_count("tick"), 0);
}

#[tokio::test]
async fn empty_subscription_list_needs_no_receiver() {
    let core = core_with_autosubscribe();
    let log = Log::default();
    core.add_module("quiet", RecorderSpec::new().subscribing(&[]).factory(&log))
        .unwrap();

    core.start_module("quiet", StartOptions::new()).unwrap();
    assert_eq!(core.running_modules()["quiet"], vec!["quiet"]);
}

#[tokio::test]
async fn failed_init_does_not_subscribe() {
    let core = core_with_autosubscribe();
    let log = Log::default();
    core.add_module(
        "fragile",
        RecorderSpec::new()
            .subscribing(&["tick"])
            .receiving()
            .failing_init()
            .factory(&log),
    )
    .unwrap();

    core.start_module("fragile", StartOptions::new()).unwrap();
    assert_eq!(core.bus().subscriber_count("tick"), 0);
    assert!(core.running_modules().is_empty());
}

#[tokio::test]
async fn without_the_extension_nothing_is_subscribed() {
    let core = Core::new();
    core.init().unwrap();
    let log = Log::default();
    core.add_module(
        "listener",
        RecorderSpec::new().subscribing(&["tick"]).receiving().factory(&log),
    )
    .unwrap();
    core.start_module("listener", StartOptions::new()).unwrap();
    assert_eq!(core.bus().subscriber_count("tick"), 0);
}

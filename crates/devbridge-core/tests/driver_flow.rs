mod common;

use common::{entries, manual_config, new_log, settle, AnnouncingModel, FakeDevice, FakeModel};
use devbridge_core::{
    AdmissionError, Control, DeviceHandle, Driver, MemoryBroker, Transport, EVENT_QUEUE_LEN,
};
use devbridge_proto::{Message, QoS};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn driver_with(broker: &MemoryBroker, model: FakeModel, accepts_external: bool) -> Driver {
    let mut driver = Driver::with_config(
        model,
        Arc::new(broker.client("driver")),
        manual_config(accepts_external),
    );
    driver.start().unwrap();
    driver
}

fn external_client(broker: &MemoryBroker) -> impl Transport {
    let client = broker.client("ext");
    client.start().unwrap();
    client
}

#[test]
fn read_only_control_is_announced_in_order() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("therm", "Thermometer", &log)));
    handle.on_new_control(
        "therm",
        Control::new("temp", "temperature", "21.5").read_only(),
    );
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec![
            "driver -> /devices/therm/meta/name: [Thermometer] (QoS 1, retained)",
            "driver -> /devices/therm/controls/temp/meta/type: [temperature] (QoS 1, retained)",
            "driver -> /devices/therm/controls/temp/meta/order: [1] (QoS 1, retained)",
            "driver -> /devices/therm/controls/temp: [21.5] (QoS 1, retained)",
        ]
    );
    driver.stop();
}

#[test]
fn writable_control_with_range_subscribes_for_commands() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("dimmer", "Dimmer", &log)));
    handle.on_new_control("dimmer", Control::new("level", "range", "0").with_max(255.0));
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec![
            "driver -> /devices/dimmer/meta/name: [Dimmer] (QoS 1, retained)",
            "driver -> /devices/dimmer/controls/level/meta/type: [range] (QoS 1, retained)",
            "driver -> /devices/dimmer/controls/level/meta/order: [1] (QoS 1, retained)",
            "driver -> /devices/dimmer/controls/level/meta/max: [255] (QoS 1, retained)",
            "driver -> /devices/dimmer/controls/level: [0] (QoS 1, retained)",
            "Subscribe -- driver: /devices/dimmer/controls/level/on",
        ]
    );
    driver.stop();
}

#[test]
fn negative_max_means_no_range() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("dev", "Dev", &log)));
    handle.on_new_control("dev", Control::new("x", "value", "1").read_only().with_max(-1.0));
    settle(&handle);

    assert!(broker
        .published()
        .iter()
        .all(|message| !message.topic.ends_with("/meta/max")));
    driver.stop();
}

#[test]
fn controls_are_numbered_in_first_seen_order() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("dev", "Dev", &log)));
    for name in ["a", "b", "c"] {
        handle.on_new_control("dev", Control::new(name, "value", "0").read_only());
    }
    handle.on_new_control("dev", Control::new("b", "value", "7").read_only());
    handle.on_new_control("dev", Control::new("d", "value", "0").read_only());
    settle(&handle);

    let orders: Vec<(String, String)> = broker
        .published()
        .into_iter()
        .filter(|message| message.topic.ends_with("/meta/order"))
        .map(|message| (message.topic, message.payload))
        .collect();
    assert_eq!(
        orders,
        vec![
            ("/devices/dev/controls/a/meta/order".to_string(), "1".to_string()),
            ("/devices/dev/controls/b/meta/order".to_string(), "2".to_string()),
            ("/devices/dev/controls/c/meta/order".to_string(), "3".to_string()),
            ("/devices/dev/controls/d/meta/order".to_string(), "4".to_string()),
        ]
    );

    let order_of_b = handle
        .call_and_wait(|core| core.registry().control_order("dev", "b"))
        .unwrap();
    assert_eq!(order_of_b, Some(2));
    driver.stop();
}

#[test]
fn echoed_command_is_published_as_value() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();
    let ext = external_client(&broker);

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("relay", "Relay", &log)));
    handle.on_new_control("relay", Control::new("switch", "switch", "0"));
    settle(&handle);
    broker.take_log();

    ext.publish(Message::new("/devices/relay/controls/switch/on", "1", QoS::AtLeastOnce, false))
        .unwrap();
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec![
            "ext -> /devices/relay/controls/switch/on: [1] (QoS 1)",
            "driver -> /devices/relay/controls/switch: [1] (QoS 1, retained)",
        ]
    );
    assert!(entries(&log).contains(&"local relay: send_value(switch, 1)".to_string()));
    driver.stop();
}

#[test]
fn unechoed_command_is_not_published() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();
    let ext = external_client(&broker);

    handle.on_new_device(DeviceHandle::local(
        FakeDevice::new("relay", "Relay", &log).without_echo(),
    ));
    handle.on_new_control("relay", Control::new("switch", "switch", "0"));
    settle(&handle);
    broker.take_log();

    ext.publish(Message::new("/devices/relay/controls/switch/on", "1", QoS::AtLeastOnce, false))
        .unwrap();
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec!["ext -> /devices/relay/controls/switch/on: [1] (QoS 1)"]
    );
    assert!(entries(&log).contains(&"local relay: send_value(switch, 1)".to_string()));
    driver.stop();
}

#[test]
fn local_value_change_is_published_retained() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("therm", "Thermometer", &log)));
    handle.on_new_control("therm", Control::new("temp", "temperature", "21.5").read_only());
    settle(&handle);
    broker.take_log();

    handle.on_value("therm", "temp", "22");
    handle.on_value("nobody", "temp", "1");
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec!["driver -> /devices/therm/controls/temp: [22] (QoS 1, retained)"]
    );
    driver.stop();
}

#[test]
fn unknown_device_value_is_dropped_when_external_devices_are_rejected() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), false);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/foo/controls/bar", "5")).unwrap();
    settle(&handle);

    let admitted = handle
        .call_and_wait(|core| match core.ensure_external_device("foo") {
            Err(AdmissionError::UnknownDevice(name)) => Some(name),
            _ => None,
        })
        .unwrap();
    assert_eq!(admitted.as_deref(), Some("foo"));

    let known = handle
        .call_and_wait(|core| core.registry().contains("foo"))
        .unwrap();
    assert!(!known);
    assert_eq!(entries(&log), vec!["model: start"]);
    driver.stop();
}

#[test]
fn unknown_device_value_creates_external_device() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    assert_eq!(
        broker.take_log(),
        vec![
            "Subscribe -- driver: /devices/+/meta/name",
            "Subscribe -- driver: /devices/+/controls/+",
            "Subscribe -- driver: /devices/+/controls/+/meta/type",
            "Subscribe -- driver: /devices/+/controls/+/meta/max",
        ]
    );

    ext.publish(Message::retained("/devices/foo/controls/bar", "5")).unwrap();
    settle(&handle);

    assert_eq!(
        entries(&log),
        vec![
            "model: start",
            "model: add_device(foo)",
            "external foo: send_value(bar, 5)",
        ]
    );
    let external = handle
        .call_and_wait(|core| core.registry().get("foo").map(DeviceHandle::is_external))
        .unwrap();
    assert_eq!(external, Some(true));
    driver.stop();
}

#[test]
fn external_metadata_reaches_the_proxy() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/foo/meta/name", "Foo")).unwrap();
    ext.publish(Message::retained("/devices/foo/controls/bar/meta/type", "range")).unwrap();
    ext.publish(Message::retained("/devices/foo/controls/bar/meta/max", "100")).unwrap();
    ext.publish(Message::retained("/devices/foo/controls/bar/meta/max", "plenty")).unwrap();
    ext.publish(Message::retained("/devices/foo/controls/bar/meta/order", "1")).unwrap();
    ext.publish(Message::retained("/devices/foo/controls/bar", "42")).unwrap();
    settle(&handle);

    assert_eq!(
        entries(&log),
        vec![
            "model: start",
            "model: add_device(foo)",
            "external foo: set_title(Foo)",
            "external foo: send_control_type(bar, range)",
            "external foo: send_control_range(bar, 100)",
            "external foo: send_value(bar, 42)",
        ]
    );
    let title = handle
        .call_and_wait(|core| core.registry().get("foo").map(|d| d.title().to_string()))
        .unwrap();
    assert_eq!(title.as_deref(), Some("Foo"));
    driver.stop();
}

#[test]
fn external_value_change_is_sent_as_command() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/foo/controls/bar", "5")).unwrap();
    settle(&handle);
    broker.take_log();

    handle.on_value("foo", "bar", "9");
    settle(&handle);

    assert_eq!(
        broker.take_log(),
        vec!["driver -> /devices/foo/controls/bar/on: [9] (QoS 1)"]
    );
    driver.stop();
}

#[test]
fn model_without_external_support_admits_nothing() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/foo/controls/bar", "5")).unwrap();
    settle(&handle);

    let missing = handle
        .call_and_wait(|core| {
            matches!(
                core.ensure_external_device("foo"),
                Err(AdmissionError::MissingCapability(_))
            )
        })
        .unwrap();
    assert!(missing);
    assert_eq!(
        handle.call_and_wait(|core| core.registry().len()).unwrap(),
        0
    );
    driver.stop();
}

#[test]
fn refused_device_is_not_registered() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log).refusing("foo"), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/foo/controls/bar", "5")).unwrap();
    ext.publish(Message::retained("/devices/baz/controls/bar", "6")).unwrap();
    settle(&handle);

    assert_eq!(
        entries(&log),
        vec![
            "model: start",
            "model: add_device(foo)",
            "model: add_device(baz)",
            "external baz: send_value(bar, 6)",
        ]
    );
    let names = handle
        .call_and_wait(|core| {
            core.registry()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(names, vec!["baz".to_string()]);
    driver.stop();
}

#[test]
fn local_device_replaces_external_proxy_without_migration() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), true);
    let handle = driver.handle();
    let ext = external_client(&broker);

    ext.publish(Message::retained("/devices/d/meta/name", "Remote")).unwrap();
    ext.publish(Message::retained("/devices/d/controls/x/meta/type", "range")).unwrap();
    settle(&handle);

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("d", "Local", &log)));
    handle.on_new_control("d", Control::new("x", "switch", "0"));
    settle(&handle);
    broker.take_log();
    log.lock().unwrap().clear();

    ext.publish(Message::retained("/devices/d/meta/name", "Renamed")).unwrap();
    ext.publish(Message::retained("/devices/d/controls/x/meta/type", "text")).unwrap();
    ext.publish(Message::retained("/devices/d/controls/x", "3")).unwrap();
    ext.publish(Message::new("/devices/d/controls/x/on", "7", QoS::AtLeastOnce, false))
        .unwrap();
    settle(&handle);

    assert_eq!(entries(&log), vec!["local d: send_value(x, 7)"]);
    let (external, title, order) = handle
        .call_and_wait(|core| {
            let device = core.registry().get("d");
            (
                device.map(DeviceHandle::is_external),
                device.map(|d| d.title().to_string()),
                core.registry().control_order("d", "x"),
            )
        })
        .unwrap();
    assert_eq!(external, Some(false));
    assert_eq!(title.as_deref(), Some("Local"));
    assert_eq!(order, Some(1));
    driver.stop();
}

#[test]
fn own_publications_do_not_create_external_devices() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::extended(&log), true);
    let handle = driver.handle();

    handle.on_new_device(DeviceHandle::local(FakeDevice::new("therm", "Thermometer", &log)));
    handle.on_new_control("therm", Control::new("temp", "temperature", "21.5").read_only());
    settle(&handle);

    assert_eq!(entries(&log), vec!["model: start"]);
    driver.stop();
}

#[test]
fn stop_shuts_down_model_and_transport() {
    let broker = MemoryBroker::new();
    let log = new_log();
    let mut driver = driver_with(&broker, FakeModel::new(&log), false);

    driver.stop();

    assert_eq!(entries(&log), vec!["model: start", "model: stop"]);
    assert_eq!(broker.take_log(), vec!["stop: driver"]);
    assert!(!driver.is_active());
}

#[test]
fn model_may_announce_more_events_than_the_queue_holds_on_start() {
    let broker = MemoryBroker::new();
    let transport = broker.client("driver");
    let controls = EVENT_QUEUE_LEN + 50;

    let (started_tx, started_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut driver = Driver::with_config(
            AnnouncingModel::new(controls),
            Arc::new(transport),
            manual_config(false),
        );
        let started = driver.start().is_ok();
        let _ = started_tx.send((driver, started));
    });
    let (mut driver, started) = started_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("Driver::start did not return");
    assert!(started);
    settle(&driver.handle());

    let orders: Vec<String> = broker
        .published()
        .into_iter()
        .filter(|message| message.topic.ends_with("/meta/order"))
        .map(|message| message.payload)
        .collect();
    let expected: Vec<String> = (1..=controls).map(|order| order.to_string()).collect();
    assert_eq!(orders, expected);
    assert_eq!(
        broker.published().first().map(|message| message.topic.clone()),
        Some("/devices/bulk/meta/name".to_string())
    );
    driver.stop();
}

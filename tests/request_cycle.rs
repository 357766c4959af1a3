//! Request-cycle tests against a scripted in-memory bus.
//!
//! The scripted bus answers name requests and method calls the way the bus
//! daemon and the adder service would, without needing either to run.

use addbus::client::{ClientError, RpcClient, RunOptions, RunSummary, ServiceTarget};
use addbus::dbus::add_numbers;
use addbus::rpc::{
    Bus, BusError, CallTimeout, MethodCall, NameRegistrar, Ownership, PendingCall, ReplySender,
    RpcError,
};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use zbus::zvariant::Value;
use zbus::Message;

const CLIENT_NAME: &str = "org.addbus.AddClient";

/// How the scripted service answers a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    /// Adds the numbers; malformed input gets a reply with no arguments.
    Adder,
    /// Never answers.
    Silent,
    /// Answers every call with an ERROR message.
    Failing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Request,
    Release,
    Send(String),
    Flush,
}

struct ScriptedBus {
    service: Service,
    /// Name requests answered with `Queued` before the name frees up
    contended: Mutex<u32>,
    events: Mutex<Vec<Event>>,
    /// Name requests served before the bus socket breaks
    disconnect_after: Option<usize>,
    /// Keeps unanswered calls pending instead of disconnected
    parked: Mutex<Vec<ReplySender>>,
}

impl ScriptedBus {
    fn new(service: Service) -> Self {
        Self {
            service,
            contended: Mutex::new(0),
            events: Mutex::new(Vec::new()),
            disconnect_after: None,
            parked: Mutex::new(Vec::new()),
        }
    }

    fn contended(self, k: u32) -> Self {
        *self.contended.lock().unwrap() = k;
        self
    }

    fn disconnect_after(mut self, requests: usize) -> Self {
        self.disconnect_after = Some(requests);
        self
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

fn reply_to(call: &Message, service: Service, input: &str) -> Message {
    let header = call.header();
    match service {
        Service::Adder => match add_numbers(input) {
            Ok(sum) => Message::method_return(&header)
                .unwrap()
                .build(&(sum.to_string(),))
                .unwrap(),
            Err(_) => Message::method_return(&header).unwrap().build(&()).unwrap(),
        },
        Service::Failing => Message::error(&header, "org.freedesktop.DBus.Error.Failed")
            .unwrap()
            .build(&("adder is broken",))
            .unwrap(),
        Service::Silent => unreachable!("silent service never replies"),
    }
}

#[async_trait]
impl Bus for ScriptedBus {
    async fn request_name(&self, name: &str) -> Result<Ownership, RpcError> {
        assert_eq!(name, CLIENT_NAME);
        if self
            .disconnect_after
            .is_some_and(|n| self.count(&Event::Request) >= n)
        {
            let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Broken pipe");
            return Err(RpcError::NameRequest(zbus::Error::from(io).into()));
        }
        self.events.lock().unwrap().push(Event::Request);
        let mut contended = self.contended.lock().unwrap();
        if *contended > 0 {
            *contended -= 1;
            Ok(Ownership::Queued)
        } else {
            Ok(Ownership::PrimaryOwner)
        }
    }

    async fn release_name(&self, _name: &str) -> Result<bool, RpcError> {
        self.events.lock().unwrap().push(Event::Release);
        Ok(true)
    }

    async fn send(&self, call: MethodCall, timeout: CallTimeout) -> Result<PendingCall, RpcError> {
        assert_eq!(call.destination(), "org.addbus.AddServer");
        assert_eq!(call.member(), "add_numbers");
        let input = match call.args() {
            [Value::Str(s)] => s.as_str().to_string(),
            other => panic!("expected one string argument, got {other:?}"),
        };
        self.events.lock().unwrap().push(Event::Send(input.clone()));

        let message = call.into_message()?;
        let serial = message.primary_header().serial_num().get();
        let (pending, tx) = PendingCall::channel(serial, timeout);

        if self.service == Service::Silent {
            self.parked.lock().unwrap().push(tx);
        } else {
            tx.send(Ok(reply_to(&message, self.service, &input)))
                .expect("pending call dropped");
        }
        Ok(pending)
    }

    async fn flush(&self) -> Result<(), RpcError> {
        self.events.lock().unwrap().push(Event::Flush);
        Ok(())
    }
}

fn target() -> ServiceTarget {
    ServiceTarget {
        destination: "org.addbus.AddServer".into(),
        path: "/org/addbus/Adder".into(),
        interface: "org.addbus.Adder1".into(),
        method: "add_numbers".into(),
    }
}

fn client(bus: ScriptedBus, timeout: CallTimeout) -> RpcClient<ScriptedBus> {
    RpcClient::new(bus, NameRegistrar::new(CLIENT_NAME), target(), timeout)
}

#[tokio::test]
async fn test_add_scenario() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);

    assert_eq!(client.call("3 4").await.unwrap(), "7");
    assert_eq!(
        client.bus().events(),
        vec![
            Event::Request,
            Event::Send("3 4".into()),
            Event::Flush,
            Event::Release,
        ]
    );
    assert!(!client.registrar().is_owned());
}

#[tokio::test]
async fn test_empty_reply_is_argument_mismatch() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);

    let err = client.call("").await.unwrap_err();

    assert!(matches!(err, RpcError::ArgumentMismatch { .. }));
    assert!(err.bus_error().is_none());
    // Name still released after the failed cycle.
    assert_eq!(client.bus().count(&Event::Release), 1);
}

#[tokio::test]
async fn test_error_reply_is_remote() {
    let mut client = client(ScriptedBus::new(Service::Failing), CallTimeout::Default);

    match client.call("3 4").await.unwrap_err() {
        RpcError::Remote(BusError { name, message }) => {
            assert_eq!(name, "org.freedesktop.DBus.Error.Failed");
            assert_eq!(message, "adder is broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_contention_converges_after_k_retries() {
    let bus = ScriptedBus::new(Service::Adder).contended(5);
    let mut client = client(bus, CallTimeout::Default);
    let started = Instant::now();

    assert_eq!(client.call("1 2").await.unwrap(), "3");

    // Nothing was sent while the name was contended.
    let events = client.bus().events();
    assert!(events[..6].iter().all(|e| *e == Event::Request));
    assert_eq!(events[6], Event::Send("1 2".into()));
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_bounded_contention_reports_unavailable() {
    let bus = ScriptedBus::new(Service::Adder).contended(100);
    let registrar = NameRegistrar::new(CLIENT_NAME)
        .with_backoff(Duration::from_millis(200))
        .with_max_attempts(Some(3));
    let mut client = RpcClient::new(bus, registrar, target(), CallTimeout::Default);

    let err = client.call("1 2").await.unwrap_err();

    assert!(matches!(err, RpcError::NameUnavailable { attempts: 3, .. }));
    assert_eq!(client.bus().count(&Event::Request), 3);
    assert!(!client
        .bus()
        .events()
        .iter()
        .any(|e| matches!(e, Event::Send(_))));
}

#[tokio::test(start_paused = true)]
async fn test_silent_service_times_out_within_bound() {
    let mut client = client(
        ScriptedBus::new(Service::Silent),
        CallTimeout::Millis(1500),
    );
    let started = Instant::now();

    let err = client.call("3 4").await.unwrap_err();

    assert!(matches!(err, RpcError::Timeout(_)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1500));
    assert!(elapsed < Duration::from_millis(1600));
    assert_eq!(client.bus().count(&Event::Release), 1);
}

#[tokio::test]
async fn test_acquire_release_pairs_over_many_cycles() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);

    for (input, expected) in [("1 1", "2"), ("10 -3", "7"), ("0 0", "0")] {
        assert_eq!(client.call(input).await.unwrap(), expected);
    }
    let _ = client.call("not numbers").await;

    let events = client.bus().events();
    let mut held = false;
    for event in &events {
        match event {
            Event::Request => {
                assert!(!held, "name requested twice without release");
                held = true;
            }
            Event::Release => {
                assert!(held, "name released without being held");
                held = false;
            }
            _ => {}
        }
    }
    assert!(!held);
    assert_eq!(client.bus().count(&Event::Request), 4);
    assert_eq!(client.bus().count(&Event::Release), 4);
}

#[tokio::test]
async fn test_run_prints_results_and_continues() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);
    let input: &[u8] = b"3 4\n\n\nbad\n5 6\n";
    let mut output = Vec::new();

    let summary = client
        .run(input, &mut output, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "7\n11\n");
    assert_eq!(
        summary,
        RunSummary {
            succeeded: 2,
            failed: 1
        }
    );
}

#[tokio::test]
async fn test_run_fail_fast_stops_at_first_failure() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);
    let input: &[u8] = b"bad\n3 4\n";
    let mut output = Vec::new();
    let options = RunOptions {
        fail_fast: true,
        prompt: None,
    };

    let err = client.run(input, &mut output, &options).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rpc(RpcError::ArgumentMismatch { .. })
    ));
    assert!(output.is_empty());
    assert_eq!(client.bus().count(&Event::Send("3 4".into())), 0);
}

#[tokio::test]
async fn test_run_writes_prompt() {
    let mut client = client(ScriptedBus::new(Service::Adder), CallTimeout::Default);
    let input: &[u8] = b"3 4\n";
    let mut output = Vec::new();
    let options = RunOptions {
        fail_fast: false,
        prompt: Some("> ".into()),
    };

    client.run(input, &mut output, &options).await.unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "> 7\n> ");
}

#[tokio::test]
async fn test_run_stops_when_bus_goes_away() {
    let bus = ScriptedBus::new(Service::Adder).disconnect_after(1);
    let mut client = client(bus, CallTimeout::Default);
    let input: &[u8] = b"3 4\n1 2\n5 5\n";
    let mut output = Vec::new();

    let err = client
        .run(input, &mut output, &RunOptions::default())
        .await
        .unwrap_err();

    match err {
        ClientError::Rpc(e) => {
            assert!(e.is_connection_lost());
            assert_eq!(e.operation(), "request_name");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(String::from_utf8(output).unwrap(), "7\n");
    assert_eq!(client.bus().count(&Event::Send("5 5".into())), 0);
}

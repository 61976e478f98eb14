use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use modelrpc_schema::{SchemaDocumentBuilder, TypeRef};
use modelrpc_server::prelude::*;
use modelrpc_server::{CancellationHandle, Code, DescriptorBinding, FrameworkError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Person {
    name: String,
    age: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Greeting {
    greeting: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Registration {
    name: String,
    age: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Spell {
    letters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Letter {
    letter: String,
}

#[derive(Default)]
struct Greeter {
    pulls: Arc<AtomicUsize>,
}

impl Greeter {
    async fn say_hello(&self, person: Person) -> Result<Greeting, BoxError> {
        Ok(Greeting {
            greeting: format!("Hello, {} ({})!", person.name, person.age),
        })
    }
}

impl Service for Greeter {
    fn description(&self) -> Option<String> {
        Some("Greets people".to_string())
    }

    fn methods(registry: &mut MethodRegistry<Self>) {
        registry
            .unary("say_hello", |greeter: Arc<Self>, person: Person| async move {
                greeter.say_hello(person).await
            })
            .describe("Says hello");
        registry.unary("register", |_: Arc<Self>, registration: Registration| async move {
            Ok::<_, BoxError>(Greeting {
                greeting: format!("Registered {}", registration.name),
            })
        });
        registry.unary("fail", |_: Arc<Self>, _: Person| async move {
            Err::<Greeting, BoxError>("database unavailable".into())
        });
        registry.unary("lookup", |_: Arc<Self>, person: Person| async move {
            Err::<Greeting, Status>(Status::not_found(format!("no record of {}", person.name)))
        });
        registry.unary_with_context(
            "whoami",
            |_: Arc<Self>, _: Person, ctx: CallContext| async move {
                let user = ctx.metadata("user").unwrap_or("anonymous").to_string();
                Ok::<_, BoxError>(Greeting {
                    greeting: format!("{} via {}", user, ctx.method()),
                })
            },
        );
        registry.server_streaming("spell", |greeter: Arc<Self>, spell: Spell| {
            assert!(!spell.letters.is_empty(), "nothing to spell");
            let pulls = Arc::clone(&greeter.pulls);
            stream::iter(spell.letters)
                .inspect(move |_| {
                    pulls.fetch_add(1, Ordering::SeqCst);
                })
                .map(|letter| {
                    if letter == "!" {
                        panic!("letter overflow");
                    }
                    if letter == "?" {
                        Err::<Letter, BoxError>("unreadable letter".into())
                    } else {
                        Ok(Letter { letter })
                    }
                })
        });
    }
}

struct Clock;

impl Service for Clock {
    fn methods(registry: &mut MethodRegistry<Self>) {
        registry.blocking("now", |_: &Self, person: Person| {
            Ok::<_, BoxError>(Greeting {
                greeting: format!("It is late, {}", person.name),
            })
        });
    }
}

fn person(name: &str, age: i32) -> WireMessage {
    WireMessage::new("Person")
        .with_field("name", WireValue::String(name.to_string()))
        .with_field("age", WireValue::Int32(age))
}

fn spell(letters: &[&str]) -> WireMessage {
    let letters = letters
        .iter()
        .map(|l| WireValue::String(l.to_string()))
        .collect();
    WireMessage::new("Spell").with_field("letters", WireValue::List(letters))
}

fn letter(message: &WireMessage) -> &str {
    message.get("letter").and_then(WireValue::as_str).unwrap()
}

#[tokio::test]
async fn test_greeting_scenario() {
    let generator = BindingGenerator::default();
    let document = generator.document(&Greeter::default()).unwrap();
    let request = document.catalog().message("Person").unwrap();
    assert_eq!(request.field("name").unwrap().number, 1);
    assert_eq!(request.field("age").unwrap().number, 2);
    let response = document.catalog().message("Greeting").unwrap();
    assert_eq!(response.field("greeting").unwrap().number, 1);

    let adapter = generator.generate(Greeter::default()).unwrap();
    assert_eq!(adapter.service_name(), "greeter.v1.Greeter");

    let reply = adapter
        .call("SayHello", person("Ada", 37), CallContext::new())
        .await
        .unwrap();
    let message = reply.into_unary().unwrap();
    assert_eq!(message.type_name(), "Greeting");

    let decoded: Greeting = generator
        .registry()
        .from_wire(
            "greeter.v1.Greeter",
            &TypeRef::Record("Greeting".into()),
            &WireValue::Message(message),
        )
        .unwrap();
    let native = Greeter::default()
        .say_hello(Person {
            name: "Ada".into(),
            age: 37,
        })
        .await
        .unwrap();
    assert_eq!(decoded, native);
}

#[tokio::test]
async fn test_descriptors_follow_registration_order() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let names: Vec<_> = adapter.descriptors().iter().map(|d| d.name.clone()).collect();
    assert_eq!(
        names,
        ["SayHello", "Register", "Fail", "Lookup", "Whoami", "Spell"]
    );
    assert!(adapter.descriptor("Spell").unwrap().server_streaming);
}

#[tokio::test]
async fn test_validation_failure_is_invalid_argument() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let request = WireMessage::new("Registration")
        .with_field("name", WireValue::String("Ada".into()))
        .with_field("age", WireValue::Uint32(300));

    let Err(status) = adapter.call("Register", request, CallContext::new()).await else {
        panic!("Expected a validation failure");
    };
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("u8"));
}

#[tokio::test]
async fn test_user_failure_is_internal() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let Err(status) = adapter.call("Fail", person("Ada", 37), CallContext::new()).await else {
        panic!("Expected a failure");
    };
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "database unavailable");
}

#[tokio::test]
async fn test_user_status_passes_through() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let Err(status) = adapter.call("Lookup", person("Ada", 37), CallContext::new()).await else {
        panic!("Expected a failure");
    };
    assert_eq!(status, Status::not_found("no record of Ada"));
}

#[tokio::test]
async fn test_wrong_request_type_is_internal() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let Err(status) = adapter
        .call("SayHello", spell(&["a"]), CallContext::new())
        .await
    else {
        panic!("Expected a conversion failure");
    };
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn test_unknown_method_is_unimplemented() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let Err(status) = adapter.call("SayGoodbye", person("Ada", 37), CallContext::new()).await
    else {
        panic!("Expected a failure");
    };
    assert_eq!(status.code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_context_reaches_handler() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let ctx = CallContext::new().with_metadata("user", "grace");
    let reply = adapter.call("Whoami", person("Ada", 37), ctx).await.unwrap();
    let message = reply.into_unary().unwrap();
    assert_eq!(
        message.get("greeting"),
        Some(&WireValue::String("grace via Whoami".into()))
    );
}

#[tokio::test]
async fn test_stream_emits_in_order() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let reply = adapter
        .call("Spell", spell(&["a", "b", "c"]), CallContext::new())
        .await
        .unwrap();
    let items: Vec<_> = reply
        .into_stream()
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;
    let letters: Vec<_> = items.iter().map(letter).collect();
    assert_eq!(letters, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_cancelled_stream_stops_pulling() {
    let greeter = Greeter::default();
    let pulls = Arc::clone(&greeter.pulls);
    let adapter = BindingGenerator::default().generate(greeter).unwrap();

    let cancel = CancellationHandle::new();
    let ctx = CallContext::new().with_cancellation(cancel.clone());
    let reply = adapter
        .call("Spell", spell(&["a", "b", "c"]), ctx)
        .await
        .unwrap();
    let mut items = reply.into_stream().unwrap();

    let first = items.next().await.unwrap().unwrap();
    assert_eq!(letter(&first), "a");
    cancel.cancel();

    assert!(items.next().await.is_none());
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_stops_after_failed_item() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();
    let reply = adapter
        .call("Spell", spell(&["a", "?", "c"]), CallContext::new())
        .await
        .unwrap();
    let items: Vec<_> = reply.into_stream().unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(letter(items[0].as_ref().unwrap()), "a");
    let Err(status) = &items[1] else {
        panic!("Expected the second item to fail");
    };
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "unreadable letter");
}

#[tokio::test]
async fn test_stream_handler_panic_is_internal() {
    let adapter = BindingGenerator::default().generate(Greeter::default()).unwrap();

    let Err(status) = adapter.call("Spell", spell(&[]), CallContext::new()).await else {
        panic!("Expected the call to fail");
    };
    assert_eq!(status.code(), Code::Internal);

    let reply = adapter
        .call("Spell", spell(&["a", "!", "c"]), CallContext::new())
        .await
        .unwrap();
    let items: Vec<_> = reply.into_stream().unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(letter(items[0].as_ref().unwrap()), "a");
    let Err(status) = &items[1] else {
        panic!("Expected the second item to fail");
    };
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn test_router_routes_paths() {
    let generator = BindingGenerator::default();
    let mut router = Router::new();
    router
        .mount(generator.generate(Greeter::default()).unwrap())
        .unwrap()
        .mount(generator.generate(Clock).unwrap())
        .unwrap();
    assert_eq!(router.services(), ["clock.v1.Clock", "greeter.v1.Greeter"]);

    let reply = router
        .call("/clock.v1.Clock/Now", person("Ada", 37), CallContext::new())
        .await
        .unwrap();
    assert_eq!(
        reply.into_unary().unwrap().get("greeting"),
        Some(&WireValue::String("It is late, Ada".into()))
    );

    let Err(status) = router
        .call("/greeter.v1.Greeter/Nope", person("Ada", 37), CallContext::new())
        .await
    else {
        panic!("Expected a failure");
    };
    assert_eq!(status.code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_router_rejects_duplicate_mount() {
    let generator = BindingGenerator::default();
    let mut router = Router::new();
    router.mount(generator.generate(Clock).unwrap()).unwrap();
    let result = router.mount(generator.generate(Clock).unwrap());
    assert!(matches!(result, Err(FrameworkError::Binding(_))));
}

#[test]
fn test_async_only_router_rejects_blocking_methods() {
    let generator = BindingGenerator::default();
    let mut router = Router::async_only();

    router.mount(generator.generate(Greeter::default()).unwrap()).unwrap();
    let Err(FrameworkError::Arity { method, .. }) = router.mount(generator.generate(Clock).unwrap())
    else {
        panic!("Expected an arity error");
    };
    assert_eq!(method, "now");
}

#[test]
fn test_configured_package_wins() {
    let generator = BindingGenerator::new(ServerConfig::new().with_package("people.v2"));
    let adapter = generator.generate(Greeter::default()).unwrap();
    assert_eq!(adapter.service_name(), "people.v2.Greeter");
    assert!(generator.registry().has_scope("people.v2.Greeter"));
}

#[test]
fn test_skip_generation_requires_existing_document() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new()
        .with_out_dir(dir.path())
        .with_protoc("modelrpc-no-such-compiler")
        .with_skip_generation(true);
    let generator = BindingGenerator::new(config);

    assert!(matches!(
        generator.generate(Clock),
        Err(FrameworkError::Compiler(_))
    ));

    let document = generator.document(&Clock).unwrap();
    std::fs::write(dir.path().join("clock.proto"), document.render()).unwrap();
    assert!(generator.generate(Clock).is_ok());
}

#[test]
fn test_skip_generation_without_out_dir_is_config_error() {
    let generator = BindingGenerator::new(ServerConfig::new().with_skip_generation(true));
    assert!(matches!(
        generator.generate(Clock),
        Err(FrameworkError::Config(_))
    ));
}

#[test]
fn test_foreign_binding_rejected() {
    let other = SchemaDocumentBuilder::new("Clock")
        .package("time.v1")
        .rpc::<Person, Greeting>("Now")
        .build()
        .unwrap();
    let result = BindingGenerator::default()
        .generate_with_binding(Arc::new(Clock), Arc::new(DescriptorBinding::new(&other)));
    assert!(matches!(result, Err(FrameworkError::Binding(_))));

    let matching = SchemaDocumentBuilder::new("Clock")
        .rpc::<Person, Greeting>("Now")
        .build()
        .unwrap();
    let result = BindingGenerator::default()
        .generate_with_binding(Arc::new(Clock), Arc::new(DescriptorBinding::new(&matching)));
    assert!(result.is_ok());
}

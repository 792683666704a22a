use std::sync::Arc;
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue};
use rs_gatekeeper::{
    AuthContext, AuthenticateLayer, AuthorizationRule, AuthorizeLayer, Code, Effect, Engine,
    EngineBuilder, Error, GatewayConfig, MethodId, Pipeline, PropagationOptions, Requirement,
    RpcRequest, TrustSignal, VerifyError, context, propagation, verify_fn,
};
use tower::{Layer, Service, ServiceExt, service_fn};

fn token_pipeline() -> Pipeline {
    Pipeline::builder(verify_fn(|token: String| async move {
        match token.as_str() {
            "admin-token" => Ok(AuthContext::builder("alice")
                .roles(["admin"])
                .scopes(["orders:read", "orders:write"])
                .credential_type("api-key")
                .build()),
            "viewer-token" => Ok(AuthContext::builder("bob")
                .roles(["viewer"])
                .scopes(["orders:read"])
                .credential_type("api-key")
                .build()),
            other if other.starts_with("user-") => {
                Ok(AuthContext::builder(other.trim_start_matches("user-")).build())
            }
            _ => Err(VerifyError::from("unknown token")),
        }
    }))
    .skip_methods(["grpc.health.v1.Health/*"])
    .build()
    .unwrap()
}

fn engine() -> Arc<Engine> {
    Arc::new(
        EngineBuilder::new()
            .rule(AuthorizationRule::new("health", ["grpc.health.v1.Health/*"], Effect::Allow).unwrap())
            .rule(
                AuthorizationRule::new("order-writers", ["shop.Orders/Create"], Effect::Allow)
                    .unwrap()
                    .requires(Requirement::scopes(["orders:write"])),
            )
            .rule(
                AuthorizationRule::new("order-readers", ["shop.Orders/List", "shop.Orders/Get"], Effect::Allow)
                    .unwrap()
                    .requires(Requirement::roles(["admin", "viewer"])),
            )
            .build()
            .unwrap(),
    )
}

/// Handler that echoes the bound subject, or `-` when the call is anonymous.
fn stack(
    pipeline: Pipeline,
    engine: Arc<Engine>,
) -> impl Service<RpcRequest, Response = String, Error = Error> + Clone {
    let handler = service_fn(|_request: RpcRequest| async move {
        Ok::<_, Error>(
            context::current()
                .map(|identity| identity.subject().to_string())
                .unwrap_or_else(|| "-".to_string()),
        )
    });
    AuthenticateLayer::new(pipeline).layer(AuthorizeLayer::new(engine).layer(handler))
}

fn call(method: &str, token: Option<&str>) -> RpcRequest {
    let mut request = RpcRequest::new(MethodId::try_from(method).unwrap());
    if let Some(token) = token {
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    request
}

#[tokio::test]
async fn authenticated_call_should_reach_handler_with_identity() {
    let service = stack(token_pipeline(), engine());
    let subject = service
        .oneshot(call("shop.Orders/Create", Some("admin-token")))
        .await
        .unwrap();
    assert_eq!(subject, "alice");
    assert!(context::current().is_none());
}

#[tokio::test]
async fn missing_or_bad_credential_should_fail_unauthenticated() {
    let err = stack(token_pipeline(), engine())
        .oneshot(call("shop.Orders/List", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    let err = stack(token_pipeline(), engine())
        .oneshot(call("shop.Orders/List", Some("forged")))
        .await
        .unwrap_err();
    assert_eq!(err.public_message(), "invalid credential");
}

#[tokio::test]
async fn unmet_requirement_should_deny_without_leaking_rule() {
    let err = stack(token_pipeline(), engine())
        .oneshot(call("shop.Orders/Create", Some("viewer-token")))
        .await
        .unwrap_err();

    // The writer rule is skipped, so the default policy denies and reports what was missing.
    assert!(matches!(
        &err,
        Error::PermissionDenied { rule, requirement: Some(requirement) }
            if rule == "default-policy" && *requirement == Requirement::scopes(["orders:write"])
    ));
    assert_eq!(err.public_message(), "access denied");

    let allowed = stack(token_pipeline(), engine())
        .oneshot(call("shop.Orders/List", Some("viewer-token")))
        .await;
    assert_eq!(allowed.unwrap(), "bob");

    let denied = stack(token_pipeline(), engine())
        .oneshot(call("shop.Billing/Charge", Some("viewer-token")))
        .await
        .unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn skipped_public_method_should_run_anonymously() {
    let subject = stack(token_pipeline(), engine())
        .oneshot(call("grpc.health.v1.Health/Check", None))
        .await
        .unwrap();
    assert_eq!(subject, "-");
}

#[tokio::test]
async fn concurrent_calls_should_not_observe_each_other() {
    let service = {
        let handler = service_fn(|request: RpcRequest| async move {
            let before = context::require()?.subject().to_string();
            // Interleave with sibling calls before reading the binding again.
            let delay = request.method_name().len() as u64 % 3;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tokio::task::yield_now().await;
            let after = context::require()?.subject().to_string();
            assert_eq!(before, after);
            Ok::<_, Error>(after)
        });
        AuthenticateLayer::new(token_pipeline()).layer(handler)
    };

    let calls = (0..32).map(|i| {
        let service = service.clone();
        let method = format!("shop.Orders/{}", "M".repeat(i % 5 + 1));
        let token = format!("user-{i}");
        tokio::spawn(async move {
            let subject = service.oneshot(call(&method, Some(&token))).await.unwrap();
            (i, subject)
        })
    });

    for handle in futures::future::join_all(calls).await {
        let (i, subject) = handle.unwrap();
        assert_eq!(subject, i.to_string());
    }
}

#[tokio::test]
async fn gateway_stack_should_forward_only_trusted_identity() {
    let pipeline = GatewayConfig::new(
        "x-user-id",
        TrustSignal::Header("x-gateway-secret".to_string()),
        ["gw-secret"],
    )
    .roles_header("x-user-roles")
    .propagate(true)
    .build()
    .unwrap();

    let handler = service_fn(|request: RpcRequest| async move {
        assert!(!request.headers().contains_key("x-user-id"));
        assert!(!request.headers().contains_key("x-user-roles"));
        let forwarded = propagation::read_identity(request.headers()).expect("propagated identity");
        Ok::<_, Error>(format!("{}:{}", forwarded.subject(), forwarded.roles().join(",")))
    });
    let service = AuthenticateLayer::new(pipeline).layer(AuthorizeLayer::new(engine()).layer(handler));

    let mut request = RpcRequest::new(MethodId::new("shop.Orders", "List").unwrap());
    for (name, value) in [
        ("x-gateway-secret", "gw-secret"),
        ("x-user-id", "carol"),
        ("x-user-roles", "viewer"),
        ("x-auth-subject", "mallory"),
    ] {
        request
            .headers_mut()
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    let forwarded = service.clone().oneshot(request).await.unwrap();
    assert_eq!(forwarded, "carol:viewer");

    let mut spoofed = RpcRequest::new(MethodId::new("shop.Orders", "List").unwrap());
    spoofed
        .headers_mut()
        .insert(HeaderName::from_static("x-user-id"), HeaderValue::from_static("root"));
    let err = service.oneshot(spoofed).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn propagated_headers_should_replace_inbound_spoofing() {
    let pipeline = Pipeline::builder(verify_fn(|_token: String| async move {
        Ok::<_, VerifyError>(AuthContext::builder("svc-a").credential_type("api-key").build())
    }))
    .propagate(PropagationOptions::new())
    .build()
    .unwrap();
    let handler = service_fn(|request: RpcRequest| async move {
        Ok::<_, Error>(propagation::read_identity(request.headers()).map(|identity| identity.subject().to_string()))
    });
    let service = AuthenticateLayer::new(pipeline).layer(handler);

    let request = call("shop.Orders/List", Some("anything")).with_header(
        propagation::SUBJECT_HEADER,
        HeaderValue::from_static("mallory"),
    );
    let subject = service.oneshot(request).await.unwrap();
    assert_eq!(subject.as_deref(), Some("svc-a"));
}

#[cfg(feature = "memory-store")]
#[tokio::test]
async fn declarative_options_should_override_rules() {
    use rs_gatekeeper::{MemoryPolicySource, MethodAuthOption, PolicyResolver, ServiceAuthOption};

    let source = MemoryPolicySource::new();
    source.set_service_option(
        "shop.Catalog",
        ServiceAuthOption {
            public: Some(true),
            ..Default::default()
        },
    );
    source.set_method_option(
        MethodId::new("shop.Catalog", "Import").unwrap(),
        MethodAuthOption {
            public: Some(false),
            requires: Some(Requirement::roles(["admin"])),
            ..Default::default()
        },
    );
    let resolver = Arc::new(PolicyResolver::new(source.clone()));
    resolver.preload(&source.methods());
    let engine = Arc::new(EngineBuilder::new().resolver(resolver).build().unwrap());

    let pipeline = || {
        Pipeline::builder(verify_fn(|token: String| async move {
            let roles: Vec<&str> = if token == "admin" { vec!["admin"] } else { vec![] };
            Ok::<_, VerifyError>(AuthContext::builder(token).roles(roles).build())
        }))
        .skip_methods(["shop.Catalog/Browse"])
        .build()
        .unwrap()
    };

    let anonymous = stack(pipeline(), engine.clone())
        .oneshot(call("shop.Catalog/Browse", None))
        .await
        .unwrap();
    assert_eq!(anonymous, "-");

    let err = stack(pipeline(), engine.clone())
        .oneshot(call("shop.Catalog/Import", Some("guest")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PermissionDenied { ref rule, requirement: Some(_) } if rule == "method-requires"
    ));

    let admin = stack(pipeline(), engine)
        .oneshot(call("shop.Catalog/Import", Some("admin")))
        .await
        .unwrap();
    assert_eq!(admin, "admin");
}

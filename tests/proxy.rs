//! End-to-end forwarding through the plaintext listener.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostgate::routing::Route;
use hostgate::RouterError;
use reqwest::StatusCode;

mod common;

#[tokio::test]
async fn forwards_by_host_with_verbatim_uri() {
    let proxy = common::start_proxy().await;
    let backend = common::start_echo_backend("b1").await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);
    proxy.set_route(Route::new("app.test", "web")).await;

    let client = proxy.client(&["app.test"]);
    let res = client
        .get(proxy.url("app.test", "/a/b%20c?x=1&y=%2F"))
        .header("x-request-id", "client-supplied")
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = common::echo(res).await;
    assert_eq!(body["backend"], "b1");
    assert_eq!(body["uri"], "/a/b%20c?x=1&y=%2F");

    let headers = &body["headers"];
    assert_ne!(headers["x-request-id"], "client-supplied");
    assert_eq!(headers["x-request-id"].as_str().unwrap().len(), 36);
    assert!(headers["x-request-start"].as_str().unwrap().parse::<u64>().is_ok());
    assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(
        headers["x-forwarded-port"],
        proxy.http_addr.port().to_string().as_str()
    );
    assert!(headers["host"].as_str().unwrap().starts_with("app.test"));
}

#[tokio::test]
async fn unknown_host_is_not_found() {
    let proxy = common::start_proxy().await;
    let client = proxy.client(&["nowhere.test"]);

    let res = client.get(proxy.url("nowhere.test", "/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "Not Found\n");
}

#[tokio::test]
async fn wildcard_routes_match_subdomains() {
    let proxy = common::start_proxy().await;
    let wild = common::start_echo_backend("wild").await;
    let exact = common::start_echo_backend("exact").await;
    proxy.discovery.set_addrs("wild", [wild.to_string()]);
    proxy.discovery.set_addrs("exact", [exact.to_string()]);
    proxy.set_route(Route::new("*.apps.test", "wild")).await;
    proxy.set_route(Route::new("admin.apps.test", "exact")).await;

    let client = proxy.client(&["one.apps.test", "Deep.Two.Apps.Test", "admin.apps.test"]);
    for (host, expected) in [
        ("one.apps.test", "wild"),
        ("Deep.Two.Apps.Test", "wild"),
        ("admin.apps.test", "exact"),
    ] {
        let res = client.get(proxy.url(host, "/")).send().await.unwrap();
        assert_eq!(common::echo(res).await["backend"], expected, "host {}", host);
    }
}

#[tokio::test]
async fn service_without_backends_is_unavailable() {
    let proxy = common::start_proxy().await;
    proxy.discovery.set_addrs("empty", Vec::<String>::new());
    proxy.set_route(Route::new("empty.test", "empty")).await;

    let res = proxy
        .client(&["empty.test"])
        .get(proxy.url("empty.test", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.headers()["content-length"], "20");
    assert_eq!(res.text().await.unwrap(), "Service Unavailable\n");
}

#[tokio::test]
async fn dial_failures_fall_through_to_live_backend() {
    let proxy = common::start_proxy().await;
    let live = common::start_echo_backend("live").await;
    proxy.discovery.set_addrs(
        "web",
        [
            common::dead_addr().await,
            common::dead_addr().await,
            live.to_string(),
        ],
    );
    proxy.set_route(Route::new("retry.test", "web")).await;

    let client = proxy.client(&["retry.test"]);
    for _ in 0..10 {
        let res = client.get(proxy.url("retry.test", "/")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(common::echo(res).await["backend"], "live");
    }
}

#[tokio::test]
async fn every_backend_down_is_unavailable() {
    let proxy = common::start_proxy().await;
    proxy
        .discovery
        .set_addrs("web", [common::dead_addr().await, common::dead_addr().await]);
    proxy.set_route(Route::new("down.test", "web")).await;

    let res = proxy
        .client(&["down.test"])
        .get(proxy.url("down.test", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn failure_after_request_is_sent_is_not_retried() {
    let proxy = common::start_proxy().await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    // Accepts the connection, reads the request, then hangs up without a reply.
    let broken = common::start_programmable_backend(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { String::new() }
    })
    .await;
    let live = common::start_echo_backend("live").await;
    proxy
        .discovery
        .set_addrs("web", [broken.to_string(), live.to_string()]);
    proxy.set_route(Route::new("once.test", "web")).await;

    let client = proxy.client(&["once.test"]);
    let mut unavailable = 0;
    for _ in 0..20 {
        let res = client.get(proxy.url("once.test", "/")).send().await.unwrap();
        if res.status() == StatusCode::SERVICE_UNAVAILABLE {
            unavailable += 1;
        }
    }
    // Every request that reached the broken backend failed outright.
    assert_eq!(unavailable, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn hop_by_hop_headers_are_stripped_both_ways() {
    let proxy = common::start_proxy().await;
    let echo = common::start_echo_backend("echo").await;
    let raw = common::start_raw_backend(
        "HTTP/1.1 200 OK\r\n\
         Content-Length: 2\r\n\
         Connection: close, X-Private\r\n\
         X-Private: secret\r\n\
         Upgrade: h2c\r\n\
         X-Public: visible\r\n\
         \r\n\
         ok"
        .to_string(),
    )
    .await;
    proxy.discovery.set_addrs("echo", [echo.to_string()]);
    proxy.discovery.set_addrs("raw", [raw.to_string()]);
    proxy.set_route(Route::new("echo.test", "echo")).await;
    proxy.set_route(Route::new("raw.test", "raw")).await;

    let client = proxy.client(&["echo.test", "raw.test"]);
    let res = client
        .get(proxy.url("echo.test", "/"))
        .header("connection", "X-Secret")
        .header("x-secret", "1")
        .header("te", "trailers")
        .header("x-kept", "1")
        .send()
        .await
        .unwrap();
    let headers = common::echo(res).await["headers"].clone();
    assert!(headers.get("x-secret").is_none());
    assert!(headers.get("te").is_none());
    assert_eq!(headers["x-kept"], "1");

    let res = client.get(proxy.url("raw.test", "/")).send().await.unwrap();
    assert!(res.headers().get("x-private").is_none());
    assert!(res.headers().get("upgrade").is_none());
    assert_eq!(res.headers()["x-public"], "visible");
    assert_eq!(res.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn removed_route_stops_serving() {
    let proxy = common::start_proxy().await;
    let backend = common::start_echo_backend("b1").await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);
    let route = Route::new("gone.test", "web");
    proxy.set_route(route.clone()).await;

    let client = proxy.client(&["gone.test"]);
    let res = client.get(proxy.url("gone.test", "/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.remove_route(&route.id).await;
    let res = client.get(proxy.url("gone.test", "/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(proxy.server.table().service_refs("web"), None);
    assert_eq!(proxy.discovery.open_caches("web"), 0);

    let err = proxy.server.remove_route(&route.id).await.unwrap_err();
    assert!(matches!(err, RouterError::NotFound(_)));
}

#[tokio::test]
async fn add_route_conflicts_on_same_domain() {
    let proxy = common::start_proxy().await;
    proxy.server.add_route(Route::new("dup.test", "web")).await.unwrap();
    let err = proxy
        .server
        .add_route(Route::new("dup.test", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Conflict(_)));

    let routes = proxy.server.list_routes().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].service, "web");
}

#[tokio::test]
async fn domain_case_and_trailing_dot_share_one_route() {
    let proxy = common::start_proxy().await;
    let first = proxy.server.add_route(Route::new("case.test", "web")).await.unwrap();

    for variant in ["CASE.TEST", "Case.Test."] {
        let err = proxy
            .server
            .add_route(Route::new(variant, "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Conflict(_)), "{}", variant);
    }

    let replaced = proxy.server.set_route(Route::new("CASE.TEST", "other")).await.unwrap();
    assert_eq!(replaced.id, first.id);
    let routes = proxy.server.list_routes().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].service, "other");

    proxy.server.remove_route(&first.id).await.unwrap();
    let table = proxy.server.table().clone();
    common::wait_until(move || table.is_empty()).await;
    assert!(proxy.server.list_routes().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_routes_never_reach_the_store() {
    let proxy = common::start_proxy().await;
    proxy.discovery.set_addrs("web", ["127.0.0.1:1"]);

    let err = proxy
        .server
        .set_route(Route::new("bad.test", "web").with_tls("garbage", "garbage"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Tls(_)));

    let mut half = Route::new("half.test", "web");
    half.tls_cert = "garbage".to_string();
    assert!(matches!(
        proxy.server.add_route(half).await,
        Err(RouterError::Tls(_))
    ));

    assert!(matches!(
        proxy.server.add_route(Route::new("nosvc.test", "")).await,
        Err(RouterError::Discovery(_))
    ));

    assert!(proxy.server.list_routes().await.unwrap().is_empty());
    assert!(matches!(
        proxy.server.get_route(&Route::new("bad.test", "web").id).await,
        Err(RouterError::NotFound(_))
    ));
    assert!(proxy.server.table().is_empty());
    assert_eq!(proxy.discovery.open_caches("web"), 0);
}

#[tokio::test]
async fn response_body_streams_without_buffering() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                common::read_head(&mut socket).await;
                let head = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nfirst\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(2)).await;
                let _ = socket.write_all(b"4\r\nrest\r\n0\r\n\r\n").await;
            });
        }
    });
    let proxy = common::start_proxy().await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);
    proxy.set_route(Route::new("stream.test", "web")).await;

    let started = Instant::now();
    let mut res = proxy
        .client(&["stream.test"])
        .get(proxy.url("stream.test", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let first = res.chunk().await.unwrap().unwrap();
    assert_eq!(&first[..], b"first");
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "first chunk took {:?}",
        started.elapsed()
    );

    let mut rest = Vec::new();
    while let Some(chunk) = res.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"rest");
}

#[tokio::test]
async fn seeded_routes_are_live_after_start() {
    let backend = common::start_echo_backend("seeded").await;
    let route = Route::new("seed.test", "web");
    let proxy = common::start_proxy_with(common::test_settings(), vec![route]).await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);

    // No waiting: start returns only after the initial snapshot is applied.
    assert!(proxy.server.table().resolve("seed.test").is_some());
    let res = proxy
        .client(&["seed.test"])
        .get(proxy.url("seed.test", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(common::echo(res).await["backend"], "seeded");
}

#[tokio::test]
async fn start_twice_fails() {
    let proxy = common::start_proxy().await;
    assert!(matches!(
        proxy.server.start().await,
        Err(RouterError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn bind_failure_is_reported() {
    // A listener without SO_REUSEPORT keeps the port exclusive.
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut settings = common::test_settings();
    settings.https_address = taken.local_addr().unwrap().to_string();

    let server = hostgate::HttpServer::new(
        settings,
        Arc::new(hostgate::store::MemoryRouteStore::new()),
        Arc::new(hostgate::discovery::StaticDiscovery::new()),
    );
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, RouterError::Bind { .. }));
    assert!(server.addr().is_none());
}

#[tokio::test]
async fn start_can_be_retried_after_bind_failure() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let mut settings = common::test_settings();
    settings.https_address = format!("127.0.0.1:{}", port);

    let discovery = hostgate::discovery::StaticDiscovery::new();
    let store = hostgate::store::MemoryRouteStore::with_routes([Route::new("retry.test", "web")]);
    let server = hostgate::HttpServer::new(settings, Arc::new(store), Arc::new(discovery));

    assert!(matches!(server.start().await, Err(RouterError::Bind { .. })));
    drop(taken);

    server.start().await.unwrap();
    assert_eq!(server.tls_addr().unwrap().port(), port);
    assert!(server.table().resolve("retry.test").is_some());
    assert!(matches!(server.start().await, Err(RouterError::AlreadyStarted)));

    server.set_route(Route::new("later.test", "web")).await.unwrap();
    let table = server.table().clone();
    common::wait_until(move || table.resolve("later.test").is_some()).await;
    server.close();
}

#[tokio::test]
async fn close_stops_everything() {
    let proxy = common::start_proxy().await;
    let backend = common::start_echo_backend("b1").await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);
    proxy.set_route(Route::new("close.test", "web")).await;
    assert_eq!(proxy.discovery.open_caches("web"), 1);

    proxy.server.close();
    proxy.server.close();

    assert_eq!(proxy.discovery.open_caches("web"), 0);
    assert!(matches!(
        proxy.server.add_route(Route::new("late.test", "web")).await,
        Err(RouterError::Closed)
    ));
    assert!(matches!(
        proxy.server.list_routes().await,
        Err(RouterError::Closed)
    ));

    let res = proxy
        .client(&["close.test"])
        .get(proxy.url("close.test", "/"))
        .send()
        .await;
    match res {
        Ok(res) => assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE),
        Err(e) => assert!(e.is_connect() || e.is_request(), "{}", e),
    }
}

#[tokio::test]
async fn requests_survive_route_churn() {
    let proxy = common::start_proxy().await;
    let backend = common::start_echo_backend("b1").await;
    proxy.discovery.set_addrs("web", [backend.to_string()]);
    proxy.set_route(Route::new("stable.test", "web")).await;

    let churn = {
        let server = proxy.server.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                let route = Route::new(format!("churn{}.test", i % 5), "web");
                server.set_route(route.clone()).await.unwrap();
                let _ = server.remove_route(&route.id).await;
            }
        })
    };

    let client = proxy.client(&["stable.test"]);
    let requests: Vec<_> = (0..50)
        .map(|_| {
            let client = client.clone();
            let url = proxy.url("stable.test", "/");
            tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
        })
        .collect();

    for request in requests {
        assert_eq!(request.await.unwrap(), StatusCode::OK);
    }
    churn.await.unwrap();
    let table = proxy.server.table().clone();
    common::wait_until(move || table.service_refs("web") == Some(1)).await;
}

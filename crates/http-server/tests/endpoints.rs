use core::time::Duration;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng as _};
use randomnumbers_http_server::{
    load_settings, HttpServerError, RandomNumbersServer, ServiceSettings,
};
use randomnumbers_sampler::SharedRng;
use reqwest::StatusCode;

/// Settings for a free localhost port with the given values applied
fn settings<const N: usize>(values: [(&str, &str); N]) -> Result<Arc<ServiceSettings>> {
    let mut values: HashMap<String, String> = values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    values
        .entry("address".to_string())
        .or_insert_with(|| "127.0.0.1:0".to_string());
    let settings = load_settings(&values).context("failed to load settings")?;
    Ok(Arc::new(settings))
}

/// Start a server on a free localhost port with the given settings values
async fn start_server<const N: usize>(values: [(&str, &str); N]) -> Result<RandomNumbersServer> {
    RandomNumbersServer::new(settings(values)?).await
}

/// Generator that stalls before every draw
struct SlowRng {
    inner: StdRng,
    delay: Duration,
}

impl SlowRng {
    fn new(delay: Duration) -> Self {
        Self {
            inner: StdRng::seed_from_u64(0),
            delay,
        }
    }
}

impl RngCore for SlowRng {
    fn next_u32(&mut self) -> u32 {
        std::thread::sleep(self.delay);
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        std::thread::sleep(self.delay);
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        std::thread::sleep(self.delay);
        self.inner.fill_bytes(dst);
    }
}

fn url(server: &RandomNumbersServer, path: &str) -> String {
    format!("http://{}{path}", server.local_addr())
}

fn assert_distinct_in_range(values: &[i32], count: usize) {
    assert_eq!(values.len(), count);
    let set: HashSet<_> = values.iter().collect();
    assert_eq!(set.len(), count, "duplicates in {values:?}");
    assert!(values.iter().all(|v| (1..=99).contains(v)), "{values:?}");
}

#[test_log::test(tokio::test)]
async fn default_route_returns_eight() -> Result<()> {
    let server = start_server([]).await?;
    let resp = reqwest::get(url(&server, "/randomnumbers")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let values: Vec<i32> = resp.json().await?;
    assert_distinct_in_range(&values, 8);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn explicit_counts() -> Result<()> {
    let server = start_server([]).await?;
    for count in [0, 1, 50, 99] {
        let resp = reqwest::get(url(&server, &format!("/randomnumbers/{count}"))).await?;
        assert_eq!(resp.status(), StatusCode::OK, "count {count}");
        let values: Vec<i32> = resp.json().await?;
        assert_distinct_in_range(&values, count);
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn out_of_bounds_counts_are_rejected() -> Result<()> {
    let server = start_server([]).await?;
    for count in [
        "-1",
        "101",
        "100000",
        "99999999999999999999",
        "-99999999999999999999",
    ] {
        let resp = reqwest::get(url(&server, &format!("/randomnumbers/{count}"))).await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "count {count}");
        assert_eq!(resp.text().await?, "Count must be between 0 and 100.");
    }

    for count in ["eight", "1.5", "12abc"] {
        let resp = reqwest::get(url(&server, &format!("/randomnumbers/{count}"))).await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "count {count}");
        assert_eq!(resp.text().await?, "Count must be an integer.");
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn slow_sampling_times_out() -> Result<()> {
    let server = RandomNumbersServer::with_rng(
        settings([("timeout_ms", "50")])?,
        SharedRng::from(SlowRng::new(Duration::from_millis(25))),
    )
    .await?;
    let resp = reqwest::get(url(&server, "/randomnumbers/5")).await?;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn sampling_within_timeout_succeeds() -> Result<()> {
    let server = start_server([("timeout_ms", "2000")]).await?;
    let resp = reqwest::get(url(&server, "/randomnumbers/5")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let values: Vec<i32> = resp.json().await?;
    assert_distinct_in_range(&values, 5);

    let server = RandomNumbersServer::with_rng(
        settings([("timeout_ms", "2000")])?,
        SharedRng::from(SlowRng::new(Duration::from_millis(1))),
    )
    .await?;
    let values: Vec<i32> = reqwest::get(url(&server, "/randomnumbers"))
        .await?
        .json()
        .await?;
    assert_distinct_in_range(&values, 8);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn address_in_use_fails_startup() -> Result<()> {
    let server = start_server([]).await?;
    let addr = server.local_addr().to_string();
    let Err(err) = start_server([("address", addr.as_str())]).await else {
        panic!("second server bound {addr}");
    };
    assert!(
        matches!(
            err.downcast_ref::<HttpServerError>(),
            Some(HttpServerError::Init(_))
        ),
        "{err:#}"
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn exhausted_range_fails_fast() -> Result<()> {
    let server = start_server([]).await?;
    let resp = reqwest::get(url(&server, "/randomnumbers/100")).await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = resp.text().await?;
    assert!(body.contains("only 99 available"), "{body}");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn count_route_can_be_disabled() -> Result<()> {
    let server = start_server([("accept_count", "false")]).await?;
    let resp = reqwest::get(url(&server, "/randomnumbers/5")).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = reqwest::get(url(&server, "/randomnumbers")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn seeded_servers_agree() -> Result<()> {
    let a = start_server([("seed", "1234")]).await?;
    let b = start_server([("seed", "1234")]).await?;
    for path in ["/randomnumbers", "/randomnumbers/30"] {
        let from_a: Vec<i32> = reqwest::get(url(&a, path)).await?.json().await?;
        let from_b: Vec<i32> = reqwest::get(url(&b, path)).await?.json().await?;
        assert_eq!(from_a, from_b, "{path}");
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn cors_headers_follow_toggle() -> Result<()> {
    let client = reqwest::Client::new();

    let server = start_server([]).await?;
    let resp = client
        .get(url(&server, "/randomnumbers"))
        .header(reqwest::header::ORIGIN, "https://example.com")
        .send()
        .await?;
    assert!(resp
        .headers()
        .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());

    let server = start_server([("cors", "true")]).await?;
    let resp = client
        .get(url(&server, "/randomnumbers"))
        .header(reqwest::header::ORIGIN, "https://example.com")
        .send()
        .await?;
    assert_eq!(
        resp.headers()
            .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );

    let resp = client
        .request(reqwest::Method::OPTIONS, url(&server, "/randomnumbers/3"))
        .header(reqwest::header::ORIGIN, "https://example.com")
        .header(reqwest::header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(reqwest::header::ACCESS_CONTROL_MAX_AGE)
            .and_then(|v| v.to_str().ok()),
        Some("300")
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn cors_origin_list() -> Result<()> {
    let server = start_server([(
        "config_json",
        r#"{"cors":{"enabled":true,"allowed_origins":["https://allowed.example"]}}"#,
    )])
    .await?;
    let client = reqwest::Client::new();
    let allowed = client
        .get(url(&server, "/randomnumbers"))
        .header(reqwest::header::ORIGIN, "https://allowed.example")
        .send()
        .await?;
    assert_eq!(
        allowed
            .headers()
            .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://allowed.example")
    );
    let other = client
        .get(url(&server, "/randomnumbers"))
        .header(reqwest::header::ORIGIN, "https://other.example")
        .send()
        .await?;
    assert!(other
        .headers()
        .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn cache_control_is_appended() -> Result<()> {
    let server = start_server([("cache_control", "no-store")]).await?;
    let resp = reqwest::get(url(&server, "/randomnumbers")).await?;
    assert_eq!(
        resp.headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn openapi_and_health() -> Result<()> {
    let server = start_server([]).await?;
    let resp = reqwest::get(url(&server, "/openapi.json")).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = reqwest::get(url(&server, "/healthz")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await?, "ok");

    let server = start_server([("openapi", "true"), ("accept_count", "false")]).await?;
    let doc: serde_json::Value = reqwest::get(url(&server, "/openapi.json"))
        .await?
        .json()
        .await?;
    assert_eq!(doc["openapi"], "3.0.1");
    assert!(doc["paths"]["/randomnumbers"].is_object());
    assert!(doc["paths"].get("/randomnumbers/{count}").is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn only_get_is_routed() -> Result<()> {
    let server = start_server([]).await?;
    let resp = reqwest::Client::new()
        .post(url(&server, "/randomnumbers"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn graceful_shutdown_stops_serving() -> Result<()> {
    let mut server = start_server([]).await?;
    let endpoint = url(&server, "/healthz");
    assert_eq!(reqwest::get(&endpoint).await?.status(), StatusCode::OK);

    server.shutdown(Some(Duration::from_millis(100)));
    tokio::time::timeout(Duration::from_secs(5), server.stopped())
        .await
        .context("server did not stop in time")??;

    let client = reqwest::Client::builder().pool_max_idle_per_host(0).build()?;
    assert!(client.get(&endpoint).send().await.is_err());
    Ok(())
}

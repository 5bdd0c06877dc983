use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use caracal_security::config::ReputationConfig;
use caracal_security::reputation::{
    LinkVerdict, Lookup, ReputationCache, ReputationService, encode_url_id, parse_verdict,
};

fn sample_verdict() -> LinkVerdict {
    LinkVerdict {
        malicious_vendors: vec!["VendorA".into()],
        suspicious_vendors: vec![],
        harmless: 3,
        undetected: 1,
        total_vendors: 5,
        permalink: Some("https://www.virustotal.com/gui/url/abc".into()),
    }
}

/* =========================================
   Cache
   ========================================= */

#[test]
fn cache_serves_entries_strictly_before_ttl_and_drops_them_after() {
    let cache = ReputationCache::new(Duration::from_millis(80));
    cache.put("https://a.example", Lookup::Verdict(sample_verdict()));

    match cache.get("https://a.example") {
        Some(Lookup::Verdict(v)) => assert_eq!(v, sample_verdict()),
        other => panic!("expected cached verdict, got {other:?}"),
    }

    std::thread::sleep(Duration::from_millis(120));
    assert!(cache.get("https://a.example").is_none());
}

#[test]
fn cache_stores_failures_as_negative_entries() {
    let cache = ReputationCache::new(Duration::from_secs(300));
    cache.put("https://down.example", Lookup::Unavailable);
    assert!(matches!(
        cache.get("https://down.example"),
        Some(Lookup::Unavailable)
    ));
}

#[test]
fn cache_allows_silent_overwrite() {
    let cache = ReputationCache::new(Duration::from_secs(300));
    cache.put("https://a.example", Lookup::Unavailable);
    cache.put("https://a.example", Lookup::Verdict(sample_verdict()));
    assert!(matches!(
        cache.get("https://a.example"),
        Some(Lookup::Verdict(_))
    ));
}

/* =========================================
   Parsowanie odpowiedzi
   ========================================= */

#[test]
fn parse_counts_categories_and_ignores_unknown_ones() {
    let body = serde_json::json!({
        "data": {
            "id": "abc123",
            "attributes": {
                "last_analysis_results": {
                    "VendorA": { "category": "malicious" },
                    "VendorB": { "category": "malicious" },
                    "VendorC": { "category": "suspicious" },
                    "VendorD": { "category": "harmless" },
                    "VendorE": { "category": "undetected" },
                    "VendorF": { "category": "timeout" }
                }
            }
        }
    });

    let v = parse_verdict(&body);
    assert_eq!(v.malicious_count(), 2);
    assert!(v.malicious_vendors.contains(&"VendorA".to_string()));
    assert_eq!(v.suspicious_count(), 1);
    assert_eq!(v.harmless, 1);
    assert_eq!(v.undetected, 1);
    assert_eq!(v.total_vendors, 6);
    assert!(v.is_flagged());
    // brak permalinka => fallback na stronę raportu po id
    assert_eq!(
        v.permalink.as_deref(),
        Some("https://www.virustotal.com/gui/url/abc123")
    );
}

#[test]
fn parse_prefers_explicit_permalink() {
    let body = serde_json::json!({
        "data": {
            "id": "abc123",
            "attributes": {
                "permalink": "https://rep.example/report/42",
                "last_analysis_results": {}
            }
        }
    });
    let v = parse_verdict(&body);
    assert_eq!(v.permalink.as_deref(), Some("https://rep.example/report/42"));
    assert!(!v.is_flagged());
}

#[test]
fn url_ids_are_urlsafe_base64_without_padding() {
    let id = encode_url_id("https://example.com/?a=b&c=d");
    assert!(!id.contains('='));
    assert!(!id.contains('+'));
    assert!(!id.contains('/'));
}

/* =========================================
   Klient — warunki brzegowe po sieci
   ========================================= */

fn test_config(addr: std::net::SocketAddr, api_key: Option<&str>) -> ReputationConfig {
    ReputationConfig {
        api_key: api_key.map(str::to_string),
        base_url: Some(format!("http://{addr}")),
        timeout_secs: Some(2),
        cache_ttl_secs: Some(300),
    }
}

/// Licznik połączeń; każde accept dostaje odpowiedź 500.
async fn spawn_failing_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\n\
                          content-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
                let _ = sock.shutdown().await;
            });
        }
    });

    (addr, hits)
}

#[tokio::test]
async fn lookup_without_api_key_makes_zero_network_calls() {
    let (addr, hits) = spawn_failing_server().await;
    let svc = ReputationService::new(&test_config(addr, None)).unwrap();

    assert!(matches!(
        svc.lookup("https://anything.example").await,
        Lookup::Unavailable
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_lookup_is_cached_and_not_retried_within_ttl() {
    let (addr, hits) = spawn_failing_server().await;
    let svc = ReputationService::new(&test_config(addr, Some("test-key"))).unwrap();

    assert!(matches!(
        svc.lookup("https://down.example").await,
        Lookup::Unavailable
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // drugi lookup w oknie TTL idzie z cache, bez sieci
    assert!(matches!(
        svc.lookup("https://down.example").await,
        Lookup::Unavailable
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

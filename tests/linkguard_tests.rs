use caracal_security::linkguard::{extract_urls, find_blacklisted_domain, scan};

fn keywords() -> Vec<String> {
    vec![
        "free nitro".into(),
        "nitro giveaway".into(),
        "free crypto".into(),
        "btc giveaway".into(),
        "nitro".into(),
    ]
}

fn allowed() -> Vec<String> {
    vec!["youtube.com".into(), "x.com".into(), "tiktok.com".into()]
}

#[test]
fn single_dash_single_keyword_is_clean() {
    // 1 myślnik, 1 słowo — oba progi poniżej minimum
    let d = scan("https://example.com/free-crypto", &allowed(), &keywords());
    assert!(!d.is_suspicious);
    assert!(d.matched_url.is_none());
    assert!(d.matched_keywords.is_empty());
}

#[test]
fn many_dashes_without_keywords_is_clean() {
    let d = scan("https://my-totally-normal-blog.example/post", &allowed(), &keywords());
    assert!(!d.is_suspicious);
}

#[test]
fn two_dashes_two_keywords_is_suspicious() {
    let url = "https://bad-site-free-crypto-nitro.example";
    let d = scan(url, &allowed(), &keywords());
    assert!(d.is_suspicious);
    assert_eq!(d.matched_url.as_deref(), Some(url));
    assert!(d.matched_keywords.contains(&"free crypto".to_string()));
    assert!(d.matched_keywords.contains(&"nitro".to_string()));
}

#[test]
fn allowlisted_host_never_flagged() {
    // host z allowlisty wygrywa niezależnie od myślników i słów
    let d = scan(
        "https://youtube.com/watch?v=free-crypto-nitro-giveaway",
        &allowed(),
        &keywords(),
    );
    assert!(!d.is_suspicious);
}

#[test]
fn masked_markdown_link_is_scanned() {
    let d = scan(
        "claim here: [totally safe](https://bad-site-free-crypto-nitro.example)",
        &allowed(),
        &keywords(),
    );
    assert!(d.is_suspicious);
    assert_eq!(
        d.matched_url.as_deref(),
        Some("https://bad-site-free-crypto-nitro.example")
    );
}

#[test]
fn keyword_match_is_case_insensitive() {
    let d = scan(
        "https://BAD-SITE.example/FREE-CRYPTO-NITRO",
        &allowed(),
        &keywords(),
    );
    assert!(d.is_suspicious);
}

#[test]
fn message_without_urls_is_clean() {
    let d = scan("free crypto nitro giveaway!!! no links though", &allowed(), &keywords());
    assert!(!d.is_suspicious);
}

#[test]
fn first_suspicious_url_wins_over_later_ones() {
    let text = "https://clean.example then https://a-free-crypto-nitro.example \
                and https://b-free-crypto-nitro.example";
    let d = scan(text, &allowed(), &keywords());
    assert!(d.is_suspicious);
    assert_eq!(
        d.matched_url.as_deref(),
        Some("https://a-free-crypto-nitro.example")
    );
}

#[test]
fn extract_urls_finds_raw_and_masked() {
    let urls = extract_urls("a [x](https://one.example/p) b https://two.example/q c");
    assert_eq!(urls, vec!["https://one.example/p", "https://two.example/q"]);
}

#[test]
fn blacklisted_domain_is_found_by_host() {
    let hit = find_blacklisted_domain(
        "check https://grabify.link/abc out",
        &["grabify.link".to_string()],
    );
    let (url, domain) = hit.expect("expected a hit");
    assert_eq!(url, "https://grabify.link/abc");
    assert_eq!(domain, "grabify.link");

    assert!(find_blacklisted_domain("https://example.com/x", &["grabify.link".to_string()]).is_none());
}

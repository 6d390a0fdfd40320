//! The split-horizon Corefile generator (§4.5): two view-guarded server
//! blocks sharing one listen port, plus shared liveness/readiness blocks.
//! The canonical `view`-plugin/`expr`/`incidr` form is the one this crate
//! renders (§9, Open Question — the `bind`/"VIEW 1"/"VIEW 2" variant is a
//! historical shape we do not reproduce).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEntry {
    pub hostname: String,
    pub ipv4: String,
}

/// Everything the generator needs, already validated (§6) and with
/// durations already converted to canonical seconds strings (§9 "Duration
/// parsing" — no locale-dependent parsing happens here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInput {
    pub port: u16,
    pub secondary_cidr: String,
    pub external_proxy_ip: String,
    pub internal_proxy_ip: Option<String>,
    pub static_entries: Vec<StaticEntry>,
    pub upstream_resolvers: Vec<String>,
    pub reload_interval_secs: String,
    pub cache_ttl_secs: String,
}

fn render_hosts_block(ip: &str, entries: &[StaticEntry]) -> String {
    let mut out = String::new();
    out.push_str("    hosts {\n");
    for e in entries {
        out.push_str(&format!("        {ip} {}\n", e.hostname));
    }
    out.push_str("        fallthrough\n");
    out.push_str("    }\n");
    out
}

fn render_forward_cache_reload(upstreams: &[String], cache_ttl_secs: &str, reload_interval_secs: &str) -> String {
    let upstream_list = upstreams.join(" ");
    format!(
        "    forward . {upstream_list} {{\n        policy sequential\n        health_check 5s\n    }}\n    cache {cache_ttl_secs}\n    log errors\n    reload {reload_interval_secs}\n"
    )
}

/// Renders the full Corefile per §4.5: `view multus` (guarded by
/// `incidr(client_ip(), secondaryCIDR)`) always carries the external-proxy
/// hosts block; `view default` (guarded by `true`) carries the
/// internal-proxy hosts block when `internal_proxy_ip` is set, or no hosts
/// block at all otherwise — the invariant that the two never mix.
pub fn render(input: &ZoneInput) -> String {
    let mut out = String::new();

    out.push_str(&format!(".:{} {{\n", input.port));
    out.push_str(&format!(
        "    view multus {{\n        expr incidr(client_ip(), '{}')\n    }}\n",
        input.secondary_cidr
    ));
    out.push_str(&render_hosts_block(&input.external_proxy_ip, &input.static_entries));
    out.push_str(&render_forward_cache_reload(
        &input.upstream_resolvers,
        &input.cache_ttl_secs,
        &input.reload_interval_secs,
    ));
    out.push_str("}\n\n");

    out.push_str(&format!(".:{} {{\n", input.port));
    out.push_str("    view default {\n        expr true\n    }\n");
    if let Some(internal_ip) = &input.internal_proxy_ip {
        out.push_str(&render_hosts_block(internal_ip, &input.static_entries));
    }
    out.push_str(&render_forward_cache_reload(
        &input.upstream_resolvers,
        &input.cache_ttl_secs,
        &input.reload_interval_secs,
    ));
    out.push_str("}\n\n");

    out.push_str(".:8080 {\n    health\n}\n\n");
    out.push_str(".:8181 {\n    ready\n}\n");

    out
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CorefileParseError {
    #[error("expected exactly two view-guarded server blocks, found {0}")]
    WrongViewCount(usize),
    #[error("'view multus' block is missing its incidr guard")]
    MissingMultusGuard,
    #[error("'view default' block is missing its 'expr true' guard")]
    MissingDefaultGuard,
}

/// A minimal structural parse of a rendered Corefile: enough to recover
/// each view's `hosts` mappings for the `dns` subcommand's liveness/
/// readiness exposition (§NEW "DNS engine process shape") without
/// reimplementing the embedded resolver's own Corefile grammar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedZone {
    pub multus_hosts: Vec<(String, String)>,
    pub default_hosts: Vec<(String, String)>,
}

/// Parses the rendered form back into host mappings per view, and asserts
/// the structural invariant (§4.5 "Invariant"): exactly a `multus` view
/// guarded by `incidr`, and a `default` view guarded by `true` — disjoint
/// and, by construction of those two predicates, jointly total.
pub fn parse(text: &str) -> Result<ParsedZone, CorefileParseError> {
    let view_count = text.matches("view multus").count() + text.matches("view default").count();
    if view_count != 2 {
        return Err(CorefileParseError::WrongViewCount(view_count));
    }
    if !text.contains("expr incidr(client_ip()") {
        return Err(CorefileParseError::MissingMultusGuard);
    }
    if !text.contains("expr true") {
        return Err(CorefileParseError::MissingDefaultGuard);
    }

    let multus_block = extract_block_after(text, "view multus");
    let default_block = extract_block_after(text, "view default");

    Ok(ParsedZone {
        multus_hosts: extract_hosts(&multus_block),
        default_hosts: extract_hosts(&default_block),
    })
}

fn extract_block_after(text: &str, marker: &str) -> String {
    let Some(start) = text.find(marker) else {
        return String::new();
    };
    let rest = &text[start..];
    match rest.find("\n\n") {
        Some(end) => rest[..end].to_owned(),
        None => rest.to_owned(),
    }
}

fn extract_hosts(block: &str) -> Vec<(String, String)> {
    let Some(hosts_start) = block.find("hosts {") else {
        return Vec::new();
    };
    let after = &block[hosts_start + "hosts {".len()..];
    let Some(hosts_end) = after.find('}') else {
        return Vec::new();
    };
    after[..hosts_end]
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == "fallthrough" {
                return None;
            }
            let mut parts = trimmed.split_whitespace();
            let ip = parts.next()?.to_owned();
            let hostname = parts.next()?.to_owned();
            Some((ip, hostname))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<StaticEntry> {
        vec![
            StaticEntry {
                hostname: "api.my-cluster.example.com".to_owned(),
                ipv4: String::new(),
            },
            StaticEntry {
                hostname: "oauth.my-cluster.example.com".to_owned(),
                ipv4: String::new(),
            },
        ]
    }

    fn input(internal_proxy_ip: Option<&str>) -> ZoneInput {
        ZoneInput {
            port: 53,
            secondary_cidr: "192.168.100.0/24".to_owned(),
            external_proxy_ip: "192.168.100.4".to_owned(),
            internal_proxy_ip: internal_proxy_ip.map(str::to_owned),
            static_entries: entries(),
            upstream_resolvers: vec!["8.8.8.8".to_owned()],
            reload_interval_secs: "30s".to_owned(),
            cache_ttl_secs: "60s".to_owned(),
        }
    }

    #[test]
    fn multus_view_always_uses_external_proxy_ip() {
        let text = render(&input(Some("10.0.0.5")));
        assert!(text.contains("192.168.100.4 api.my-cluster.example.com"));
        assert!(text.contains("192.168.100.4 oauth.my-cluster.example.com"));
    }

    #[test]
    fn default_view_uses_internal_ip_when_set() {
        let text = render(&input(Some("10.0.0.5")));
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.default_hosts.len(), 2);
        assert!(parsed.default_hosts.iter().all(|(ip, _)| ip == "10.0.0.5"));
    }

    #[test]
    fn default_view_has_no_hosts_block_when_internal_ip_unset() {
        let text = render(&input(None));
        let parsed = parse(&text).unwrap();
        assert!(parsed.default_hosts.is_empty());
        assert_eq!(parsed.multus_hosts.len(), 2);
    }

    #[test]
    fn every_static_entry_appears_exactly_once_per_applicable_view() {
        let text = render(&input(Some("10.0.0.5")));
        assert_eq!(text.matches("api.my-cluster.example.com").count(), 2);
        assert_eq!(text.matches("oauth.my-cluster.example.com").count(), 2);
    }

    #[test]
    fn shared_liveness_and_readiness_blocks_are_always_present() {
        let text = render(&input(None));
        assert!(text.contains(".:8080 {\n    health\n}"));
        assert!(text.contains(".:8181 {\n    ready\n}"));
    }

    #[test]
    fn rejects_malformed_view_count() {
        assert_eq!(parse("no views here"), Err(CorefileParseError::WrongViewCount(0)));
    }
}

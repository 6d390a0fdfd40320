//! The DHCP engine's on-disk config format (§6(a), §4.3 "Config generator"):
//! a single `server4` key holding a `listen` list and an ordered `plugins`
//! list of scalar-key items. Rendering (used by the reconciler to produce
//! the mounted ConfigMap) and parsing (used by the `dhcp` subcommand to
//! load it) share this one model so the two never drift apart.

use std::net::Ipv4Addr;

use hcinfra_core::net::parse_ipv4;

#[derive(Debug, Clone, PartialEq)]
pub struct RangePlugin {
    pub lease_store_path: String,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub lease_duration: String,
}

/// One entry of the ordered `plugins` list, in the fixed order §4.3
/// specifies: `kubevirt`, `server_id`, `dns`, `router`, `netmask`, `range`.
#[derive(Debug, Clone, PartialEq)]
pub enum Plugin {
    Kubevirt,
    ServerId(Ipv4Addr),
    Dns(Ipv4Addr),
    Router(Ipv4Addr),
    Netmask(Ipv4Addr),
    Range(RangePlugin),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DhcpConfig {
    pub listen: Vec<String>,
    pub plugins: Vec<Plugin>,
}

pub const DEFAULT_DNS_FALLBACK: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const DEFAULT_LEASE_DURATION: &str = "60s";

/// Builds the config per §4.3: bind to the secondary interface by name
/// (`%net1`), `dns` falls back to `8.8.8.8` when no upstream resolver is
/// given, `leaseDuration` falls back to `60s`.
pub fn render(
    server_ip: Ipv4Addr,
    gateway: Ipv4Addr,
    first_resolver: Option<Ipv4Addr>,
    lease_store_path: &str,
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    lease_duration: Option<&str>,
) -> DhcpConfig {
    DhcpConfig {
        listen: vec!["%net1".to_owned()],
        plugins: vec![
            Plugin::Kubevirt,
            Plugin::ServerId(server_ip),
            Plugin::Dns(first_resolver.unwrap_or(DEFAULT_DNS_FALLBACK)),
            Plugin::Router(gateway),
            Plugin::Netmask(DEFAULT_NETMASK),
            Plugin::Range(RangePlugin {
                lease_store_path: lease_store_path.to_owned(),
                range_start,
                range_end,
                lease_duration: lease_duration.unwrap_or(DEFAULT_LEASE_DURATION).to_owned(),
            }),
        ],
    }
}

/// Renders the text form mounted into the workload's ConfigMap.
pub fn render_text(cfg: &DhcpConfig) -> String {
    let mut out = String::new();
    out.push_str("server4:\n");
    out.push_str("  listen:\n");
    for l in &cfg.listen {
        out.push_str(&format!("    - \"{l}\"\n"));
    }
    out.push_str("  plugins:\n");
    for p in &cfg.plugins {
        out.push_str(&format!("    - {}\n", render_plugin(p)));
    }
    out
}

fn render_plugin(p: &Plugin) -> String {
    match p {
        Plugin::Kubevirt => "kubevirt".to_owned(),
        Plugin::ServerId(ip) => format!("server_id={ip}"),
        Plugin::Dns(ip) => format!("dns={ip}"),
        Plugin::Router(ip) => format!("router={ip}"),
        Plugin::Netmask(ip) => format!("netmask={ip}"),
        Plugin::Range(r) => format!(
            "range={} {} {} {}",
            r.lease_store_path, r.range_start, r.range_end, r.lease_duration
        ),
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigParseError {
    #[error("missing 'server4' top-level key")]
    MissingServer4,
    #[error("missing 'listen' list")]
    MissingListen,
    #[error("missing 'plugins' list")]
    MissingPlugins,
    #[error("unrecognized plugin line: '{0}'")]
    UnrecognizedPlugin(String),
    #[error("malformed '{field}' value '{value}'")]
    Malformed { field: String, value: String },
}

/// Parses the text form back into a [`DhcpConfig`], used by the `dhcp`
/// subcommand loading `--config-file`. Tolerant of the exact indentation
/// `render_text` produces; this is not a general YAML parser, just the
/// inverse of our own renderer (§1, Non-goals: DHCP wire parsing is
/// delegated to the embedded engine, but the config *file* format is ours).
pub fn parse(text: &str) -> Result<DhcpConfig, ConfigParseError> {
    let mut lines = text.lines().peekable();
    if !lines.any(|l| l.trim_end() == "server4:") {
        return Err(ConfigParseError::MissingServer4);
    }

    let lines: Vec<&str> = text.lines().collect();
    let listen_idx = lines
        .iter()
        .position(|l| l.trim() == "listen:")
        .ok_or(ConfigParseError::MissingListen)?;
    let plugins_idx = lines
        .iter()
        .position(|l| l.trim() == "plugins:")
        .ok_or(ConfigParseError::MissingPlugins)?;

    let mut listen = Vec::new();
    for line in &lines[listen_idx + 1..plugins_idx] {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("- ") {
            listen.push(value.trim_matches('"').to_owned());
        }
    }

    let mut plugins = Vec::new();
    for line in &lines[plugins_idx + 1..] {
        let trimmed = line.trim();
        let Some(value) = trimmed.strip_prefix("- ") else {
            continue;
        };
        plugins.push(parse_plugin(value)?);
    }

    Ok(DhcpConfig { listen, plugins })
}

fn parse_plugin(s: &str) -> Result<Plugin, ConfigParseError> {
    if s == "kubevirt" {
        return Ok(Plugin::Kubevirt);
    }
    if let Some(value) = s.strip_prefix("server_id=") {
        return Ok(Plugin::ServerId(parse_ip_field("server_id", value)?));
    }
    if let Some(value) = s.strip_prefix("dns=") {
        return Ok(Plugin::Dns(parse_ip_field("dns", value)?));
    }
    if let Some(value) = s.strip_prefix("router=") {
        return Ok(Plugin::Router(parse_ip_field("router", value)?));
    }
    if let Some(value) = s.strip_prefix("netmask=") {
        return Ok(Plugin::Netmask(parse_ip_field("netmask", value)?));
    }
    if let Some(value) = s.strip_prefix("range=") {
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(ConfigParseError::Malformed {
                field: "range".to_owned(),
                value: value.to_owned(),
            });
        }
        return Ok(Plugin::Range(RangePlugin {
            lease_store_path: parts[0].to_owned(),
            range_start: parse_ip_field("range.start", parts[1])?,
            range_end: parse_ip_field("range.end", parts[2])?,
            lease_duration: parts[3].to_owned(),
        }));
    }
    Err(ConfigParseError::UnrecognizedPlugin(s.to_owned()))
}

fn parse_ip_field(field: &str, value: &str) -> Result<Ipv4Addr, ConfigParseError> {
    parse_ipv4(value).map_err(|_| ConfigParseError::Malformed {
        field: field.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plugins_in_fixed_order_with_fallbacks() {
        let cfg = render(
            "192.168.100.2".parse().unwrap(),
            "192.168.100.1".parse().unwrap(),
            None,
            "/var/lib/dhcp/leases.db",
            "192.168.100.10".parse().unwrap(),
            "192.168.100.200".parse().unwrap(),
            None,
        );
        let text = render_text(&cfg);
        assert!(text.contains("- \"%net1\""));
        assert!(text.contains("- kubevirt"));
        assert!(text.contains("- server_id=192.168.100.2"));
        assert!(text.contains("- dns=8.8.8.8"));
        assert!(text.contains("- router=192.168.100.1"));
        assert!(text.contains("- netmask=255.255.255.0"));
        assert!(text.contains("- range=/var/lib/dhcp/leases.db 192.168.100.10 192.168.100.200 60s"));

        let kubevirt_pos = text.find("kubevirt").unwrap();
        let server_id_pos = text.find("server_id").unwrap();
        let dns_pos = text.find("dns=").unwrap();
        let router_pos = text.find("router=").unwrap();
        let netmask_pos = text.find("netmask=").unwrap();
        let range_pos = text.find("range=").unwrap();
        assert!(kubevirt_pos < server_id_pos);
        assert!(server_id_pos < dns_pos);
        assert!(dns_pos < router_pos);
        assert!(router_pos < netmask_pos);
        assert!(netmask_pos < range_pos);
    }

    #[test]
    fn uses_first_resolver_when_given() {
        let cfg = render(
            "192.168.100.2".parse().unwrap(),
            "192.168.100.1".parse().unwrap(),
            Some("192.168.100.3".parse().unwrap()),
            "/db",
            "192.168.100.10".parse().unwrap(),
            "192.168.100.20".parse().unwrap(),
            Some("5m"),
        );
        assert_eq!(cfg.plugins[2], Plugin::Dns("192.168.100.3".parse().unwrap()));
        assert_eq!(
            cfg.plugins[5],
            Plugin::Range(RangePlugin {
                lease_store_path: "/db".to_owned(),
                range_start: "192.168.100.10".parse().unwrap(),
                range_end: "192.168.100.20".parse().unwrap(),
                lease_duration: "5m".to_owned(),
            })
        );
    }

    #[test]
    fn render_then_parse_round_trips() {
        let cfg = render(
            "192.168.100.2".parse().unwrap(),
            "192.168.100.1".parse().unwrap(),
            Some("10.0.0.1".parse().unwrap()),
            "/db",
            "192.168.100.10".parse().unwrap(),
            "192.168.100.200".parse().unwrap(),
            Some("30s"),
        );
        let parsed = parse(&render_text(&cfg)).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn rejects_config_missing_server4_key() {
        assert_eq!(parse("not a config"), Err(ConfigParseError::MissingServer4));
    }
}

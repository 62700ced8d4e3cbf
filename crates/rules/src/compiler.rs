//! Indicator -> rule body compilation.
//!
//! A [`RuleBody`] never carries `sid`/`rev`; those are appended by
//! [`RuleBody::render`] once the catalogue has assigned a signature id.
//! This keeps [`rule_hash`] a function of the semantic inputs only.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use fleet_core::config::RulesConfig;

/// One threat indicator as supplied by the intelligence feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub indicator_type: String,
    pub value: String,
    #[serde(default)]
    pub to_ids: bool,
    #[serde(default)]
    pub attr_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<u64>,
    #[serde(default)]
    pub pulled_at: Option<String>,
}

impl Indicator {
    pub fn kind(&self) -> String {
        self.indicator_type.trim().to_lowercase()
    }

    /// A raw engine rule line (`type=snort`, value starting with `alert`).
    pub fn is_raw_rule(&self) -> bool {
        self.kind() == "snort" && self.value.to_lowercase().contains("alert")
    }

    /// Whether conversion should pick this indicator up.
    pub fn is_convertible(&self) -> bool {
        self.to_ids || self.is_raw_rule()
    }
}

/// Engine-native rule without its signature id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBody {
    pub msg: String,
    pub protocol: String,
    pub src_sel: String,
    pub dst_sel: String,
    pub keywords: Vec<String>,
    /// `alert <proto> <src> <sport> -> <dst> <dport>`
    pub header: String,
    /// Option tokens without trailing `;`, excluding `sid` and `rev`.
    pub options: Vec<String>,
}

impl RuleBody {
    /// Full rule line with the assigned `sid`/`rev` appended.
    pub fn render(&self, sid: u64, rev: u32) -> String {
        let mut options = self.options.clone();
        options.push(format!("sid:{sid}"));
        options.push(format!("rev:{rev}"));
        format!("{} ({})", self.header, join_options(&options))
    }

    /// The sid-free form used for hashing.
    pub fn canonical(&self) -> String {
        format!("{} ({})", self.header, join_options(&self.options))
    }
}

/// Turns indicators into rule bodies. `None` means "cannot express this".
pub trait RuleCompiler: Send + Sync {
    fn compile(&self, indicator: &Indicator) -> Option<RuleBody>;
}

/// Deduplication key: SHA-256 over `type|value|sid-free body`.
pub fn rule_hash(indicator: &Indicator, body: &RuleBody) -> String {
    let input = format!(
        "{}|{}|{}",
        indicator.kind(),
        indicator.value.trim(),
        body.canonical()
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn join_options(tokens: &[String]) -> String {
    let joined: Vec<&str> = tokens
        .iter()
        .map(|t| t.trim().trim_end_matches(';'))
        .filter(|t| !t.is_empty())
        .collect();
    if joined.is_empty() {
        String::new()
    } else {
        format!("{};", joined.join("; "))
    }
}

/// Split a rule's option list on `;`, leaving quoted and escaped
/// semicolons inside their option.
fn split_options(raw: &str) -> Vec<String> {
    let mut options = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in raw.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                let option = current.trim();
                if !option.is_empty() {
                    options.push(option.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let option = current.trim();
    if !option.is_empty() {
        options.push(option.to_string());
    }
    options
}

fn escape_content(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | ';' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn safe_msg(value: &str) -> String {
    value.replace('"', "'").replace(';', ",").chars().take(180).collect()
}

fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// `1.2.3.4|443`, `1.2.3.4:443` or `1.2.3.4` -> (ip, port).
fn split_ip_port(value: &str) -> (&str, &str) {
    for sep in ['|', ':'] {
        if let Some((ip, port)) = value.split_once(sep) {
            let port = port.trim();
            return (ip.trim(), if port.is_empty() { "any" } else { port });
        }
    }
    (value, "any")
}

/// `evil.com|1.2.3.4` or `1.2.3.4|evil.com` -> the name to match.
fn domain_of_pair(value: &str) -> &str {
    match value.split_once('|') {
        Some((left, right)) => {
            let (left, right) = (left.trim(), right.trim());
            if is_ip(left) && !right.is_empty() {
                right
            } else if !left.is_empty() {
                left
            } else {
                right
            }
        }
        None => value,
    }
}

static RAW_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*alert\s+(\w+)\s+(\S+)\s+(\S+)\s*->\s*(\S+)\s+(\S+)\s*\((.*)\)\s*$")
        .expect("raw rule regex is valid")
});

static MSG_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)msg\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("msg regex is valid")
});

static SID_OR_REV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(sid|rev)\s*:").expect("sid regex is valid"));

static URL_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?([^/]+)(/.*)?$").expect("url regex is valid")
});

/// Snort 3 dialect.
#[derive(Debug, Clone)]
pub struct SnortCompiler {
    home_net: String,
    external_net: String,
}

impl SnortCompiler {
    pub fn new(home_net: impl Into<String>, external_net: impl Into<String>) -> Self {
        Self {
            home_net: home_net.into(),
            external_net: external_net.into(),
        }
    }

    pub fn from_config(config: &RulesConfig) -> Self {
        Self::new(&config.home_net, &config.external_net)
    }

    /// `$HOME_NET any -> $EXTERNAL_NET <dport>` rule led by `msg`.
    fn outbound(
        &self,
        protocol: &str,
        dport: &str,
        msg: &str,
        options: Vec<String>,
        keywords: &[&str],
    ) -> RuleBody {
        let mut all = vec![format!("msg:\"{msg}\"")];
        all.extend(options);
        RuleBody {
            msg: msg.to_string(),
            protocol: protocol.to_string(),
            src_sel: format!("{}:any", self.home_net),
            dst_sel: format!("{}:{}", self.external_net, dport),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            header: format!(
                "alert {protocol} {} any -> {} {dport}",
                self.home_net, self.external_net
            ),
            options: all,
        }
    }

    fn tls_sni(&self, domain: &str) -> RuleBody {
        self.outbound(
            "tcp",
            "443",
            "TLS SNI suspicious domain",
            vec![
                "tls_sni".to_string(),
                format!("content:\"{}\"", escape_content(domain)),
                "fast_pattern".to_string(),
            ],
            &["tls_sni", "content", "fast_pattern"],
        )
    }

    fn dns_query(&self, name: &str) -> RuleBody {
        self.outbound(
            "udp",
            "53",
            "DNS query suspicious name",
            vec![
                "dns_query".to_string(),
                format!("content:\"{}\"", escape_content(name)),
                "nocase".to_string(),
            ],
            &["dns_query", "content", "nocase"],
        )
    }

    fn http_url(&self, url: &str) -> RuleBody {
        let (host, path) = match URL_PARTS.captures(url) {
            Some(caps) => (
                caps.get(1).map_or(url, |m| m.as_str()),
                caps.get(2).map_or("/", |m| m.as_str()),
            ),
            None => (url, "/"),
        };
        self.outbound(
            "tcp",
            "80",
            "HTTP request suspicious URL",
            vec![
                "http_header".to_string(),
                "content:\"Host\"".to_string(),
                "http_header".to_string(),
                format!("content:\"{}\"", escape_content(host)),
                "http_uri".to_string(),
                format!("content:\"{}\"", escape_content(path)),
                "fast_pattern".to_string(),
                "flow:to_server,established".to_string(),
            ],
            &["http_header", "http_uri", "content", "flow", "fast_pattern"],
        )
    }

    fn ip_conn(&self, ip: &str, port: &str, source_side: bool) -> RuleBody {
        let msg = "Suspicious IP connection";
        let (src, src_port, dst, dst_port) = if source_side {
            (ip, "any", self.external_net.as_str(), port)
        } else {
            (self.home_net.as_str(), "any", ip, port)
        };
        RuleBody {
            msg: msg.to_string(),
            protocol: "ip".to_string(),
            src_sel: format!("{src}:{src_port}"),
            dst_sel: format!("{dst}:{dst_port}"),
            keywords: vec!["flow".to_string()],
            header: format!("alert ip {src} {src_port} -> {dst} {dst_port}"),
            options: vec![
                format!("msg:\"{msg}\""),
                "flow:to_server,established".to_string(),
            ],
        }
    }

    /// Import an existing rule line, dropping its own `sid`/`rev`.
    fn raw(&self, line: &str) -> Option<RuleBody> {
        let caps = RAW_RULE.captures(line)?;
        let field = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let (proto, src, sport, dst, dport) = (field(1), field(2), field(3), field(4), field(5));

        let options: Vec<String> = split_options(field(6))
            .into_iter()
            .filter(|t| !SID_OR_REV.is_match(t))
            .collect();
        let msg = options
            .iter()
            .find_map(|t| MSG_OPTION.captures(t))
            .and_then(|c| c.get(1))
            .map_or("Imported Snort rule", |m| m.as_str())
            .to_string();

        Some(RuleBody {
            msg,
            protocol: proto.to_lowercase(),
            src_sel: format!("{src}:{sport}"),
            dst_sel: format!("{dst}:{dport}"),
            keywords: vec![],
            header: format!("alert {proto} {src} {sport} -> {dst} {dport}"),
            options,
        })
    }

    fn generic(&self, kind: &str, value: &str) -> RuleBody {
        RuleBody {
            msg: format!("Generic match for {kind}"),
            protocol: "ip".to_string(),
            src_sel: "any:any".to_string(),
            dst_sel: "any:any".to_string(),
            keywords: vec!["content".to_string()],
            header: "alert ip any any -> any any".to_string(),
            options: vec![
                format!("msg:\"{}\"", safe_msg(value)),
                format!("content:\"{}\"", escape_content(value)),
            ],
        }
    }
}

impl RuleCompiler for SnortCompiler {
    fn compile(&self, indicator: &Indicator) -> Option<RuleBody> {
        let kind = indicator.kind();
        let value = indicator.value.trim();
        if value.is_empty() {
            return None;
        }

        let body = match kind.as_str() {
            "domain" | "hostname" => Some(self.tls_sni(value)),
            "domain|ip" => Some(self.dns_query(domain_of_pair(value))),
            "ip-dst" | "ip-src" if is_ip(value) => {
                Some(self.ip_conn(value, "any", kind == "ip-src"))
            }
            "ip-dst|port" | "ip-src|port" => {
                let (ip, port) = split_ip_port(value);
                is_ip(ip).then(|| self.ip_conn(ip, port, kind == "ip-src|port"))
            }
            "url" | "uri" => Some(self.http_url(value)),
            // A malformed raw rule is dropped rather than wrapped.
            "snort" if value.to_lowercase().starts_with("alert") => return self.raw(value),
            _ => None,
        };
        Some(body.unwrap_or_else(|| self.generic(&kind, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::indicator;

    fn compiler() -> SnortCompiler {
        SnortCompiler::new("$HOME_NET", "$EXTERNAL_NET")
    }

    #[test]
    fn domain_becomes_tls_sni_rule() {
        let body = compiler().compile(&indicator("domain", "evil.example")).unwrap();
        assert_eq!(
            body.render(3_000_000, 1),
            "alert tcp $HOME_NET any -> $EXTERNAL_NET 443 (msg:\"TLS SNI suspicious domain\"; \
             tls_sni; content:\"evil.example\"; fast_pattern; sid:3000000; rev:1;)"
        );
        assert_eq!(body.dst_sel, "$EXTERNAL_NET:443");
    }

    #[test]
    fn domain_ip_pair_queries_the_name() {
        let body = compiler()
            .compile(&indicator("domain|ip", "10.0.0.1|bad.example"))
            .unwrap();
        assert_eq!(body.protocol, "udp");
        assert!(body.canonical().contains("content:\"bad.example\""));
    }

    #[test]
    fn ip_with_port_in_either_notation() {
        let c = compiler();
        for raw in ["192.0.2.7|8443", "192.0.2.7:8443"] {
            let body = c.compile(&indicator("ip-dst|port", raw)).unwrap();
            assert_eq!(body.header, "alert ip $HOME_NET any -> 192.0.2.7 8443");
        }
        let src = c.compile(&indicator("ip-src", "192.0.2.9")).unwrap();
        assert_eq!(src.src_sel, "192.0.2.9:any");
        assert_eq!(src.dst_sel, "$EXTERNAL_NET:any");
    }

    #[test]
    fn invalid_ip_falls_back_to_generic() {
        let body = compiler().compile(&indicator("ip-dst", "not-an-ip")).unwrap();
        assert_eq!(body.msg, "Generic match for ip-dst");
        assert_eq!(body.header, "alert ip any any -> any any");
    }

    #[test]
    fn url_splits_host_and_path() {
        let body = compiler()
            .compile(&indicator("url", "https://bad.example/payload.bin"))
            .unwrap();
        let text = body.canonical();
        assert!(text.contains("content:\"bad.example\""));
        assert!(text.contains("content:\"/payload.bin\""));
    }

    #[test]
    fn raw_rule_loses_its_own_sid() {
        let raw = "alert tcp any any -> any 80 (msg:\"Imported\"; content:\"x\"; sid:42; rev:3;)";
        let body = compiler().compile(&indicator("snort", raw)).unwrap();
        assert_eq!(body.msg, "Imported");
        assert!(!body.canonical().contains("sid:"));
        assert_eq!(
            body.render(3_000_005, 1),
            "alert tcp any any -> any 80 (msg:\"Imported\"; content:\"x\"; sid:3000005; rev:1;)"
        );
    }

    #[test]
    fn raw_rule_keeps_quoted_semicolons() {
        let raw = r#"alert tcp any any -> any 80 (msg:"stage; two"; content:"a\;b"; sid:7;)"#;
        let body = compiler().compile(&indicator("snort", raw)).unwrap();
        assert_eq!(body.msg, "stage; two");
        assert_eq!(
            body.options,
            vec![r#"msg:"stage; two""#.to_string(), r#"content:"a\;b""#.to_string()]
        );
        assert_eq!(
            body.render(3_000_001, 1),
            r#"alert tcp any any -> any 80 (msg:"stage; two"; content:"a\;b"; sid:3000001; rev:1;)"#
        );
    }

    #[test]
    fn malformed_raw_rule_is_rejected() {
        assert!(compiler().compile(&indicator("snort", "alert garbage")).is_none());
    }

    #[test]
    fn content_is_escaped() {
        let body = compiler().compile(&indicator("hostname", "a\"b;c")).unwrap();
        assert!(body.canonical().contains(r#"content:"a\"b\;c""#));
    }

    #[test]
    fn hash_ignores_sid_and_tracks_inputs() {
        let c = compiler();
        let a = indicator("domain", "evil.example");
        let b = indicator("domain", "other.example");
        let body_a = c.compile(&a).unwrap();
        let body_b = c.compile(&b).unwrap();

        assert_eq!(rule_hash(&a, &body_a), rule_hash(&a, &c.compile(&a).unwrap()));
        assert_ne!(rule_hash(&a, &body_a), rule_hash(&b, &body_b));
        assert_eq!(rule_hash(&a, &body_a).len(), 64);
    }

    #[test]
    fn selection_follows_to_ids_or_raw_alert() {
        let mut ind = indicator("domain", "x.example");
        ind.to_ids = false;
        assert!(!ind.is_convertible());

        let mut raw = indicator("snort", "alert ip any any -> any any (msg:\"m\";)");
        raw.to_ids = false;
        assert!(raw.is_convertible());
    }
}

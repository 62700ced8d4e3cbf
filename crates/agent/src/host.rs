//! Host probes: network identity, resource metrics and the engine version.

use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

const SYS_CLASS_NET: &str = "/sys/class/net";
const UNKNOWN_IFACE: &str = "unknown";

/// Interfaces and management address reported in the heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub ifaces: Vec<String>,
    pub ip_mgmt: Ipv4Addr,
}

impl NetworkIdentity {
    pub fn detect(mgmt_iface: Option<&str>, console_base: &str) -> Self {
        let ifaces = up_interfaces(Path::new(SYS_CLASS_NET));
        let addrs = ipv4_addresses();
        let ip_mgmt = pick_mgmt_ip(&addrs, &ifaces, mgmt_iface)
            .or_else(|| route_source_ip(console_base).filter(is_usable_private))
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let ifaces = if ifaces.is_empty() {
            vec![UNKNOWN_IFACE.to_string()]
        } else {
            ifaces
        };
        info!(?ifaces, mgmt_iface = ?mgmt_iface, %ip_mgmt, "network identity detected");
        Self { ifaces, ip_mgmt }
    }
}

/// Non-loopback interfaces whose `operstate` is `up`, sorted.
pub fn up_interfaces(sys_class_net: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(sys_class_net) else {
        return Vec::new();
    };
    let mut ifaces: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name != "lo")
        .filter(|name| {
            fs::read_to_string(sys_class_net.join(name).join("operstate"))
                .map(|s| s.trim() == "up")
                .unwrap_or(false)
        })
        .collect();
    ifaces.sort();
    ifaces
}

fn is_usable_private(ip: &Ipv4Addr) -> bool {
    ip.is_private() && !ip.is_link_local()
}

/// First private IPv4 on `mgmt_iface` when it is up, else on any up
/// interface in order.
pub fn pick_mgmt_ip(
    addrs: &[(String, Ipv4Addr)],
    ifaces: &[String],
    mgmt_iface: Option<&str>,
) -> Option<Ipv4Addr> {
    let first_on = |name: &str| {
        addrs
            .iter()
            .filter(|(iface, ip)| iface == name && is_usable_private(ip))
            .map(|(_, ip)| *ip)
            .next()
    };
    mgmt_iface
        .filter(|m| ifaces.iter().any(|i| i == m))
        .and_then(first_on)
        .or_else(|| ifaces.iter().find_map(|i| first_on(i.as_str())))
}

/// Local address the kernel would use to reach the console.
fn route_source_ip(console_base: &str) -> Option<Ipv4Addr> {
    let authority = console_base
        .split("://")
        .nth(1)?
        .split('/')
        .next()?;
    let target = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{}:80", authority)
    };
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) => Some(ip),
        std::net::IpAddr::V6(_) => None,
    }
}

/// `(interface, address)` for every IPv4 address on the host.
#[cfg(unix)]
pub fn ipv4_addresses() -> Vec<(String, Ipv4Addr)> {
    use std::ffi::CStr;

    let mut out = Vec::new();
    unsafe {
        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut head) != 0 {
            return out;
        }
        let mut cursor = head;
        while !cursor.is_null() {
            let ifa = &*cursor;
            if !ifa.ifa_addr.is_null()
                && i32::from((*ifa.ifa_addr).sa_family) == libc::AF_INET
            {
                let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                out.push((name, ip));
            }
            cursor = ifa.ifa_next;
        }
        libc::freeifaddrs(head);
    }
    out
}

#[cfg(not(unix))]
pub fn ipv4_addresses() -> Vec<(String, Ipv4Addr)> {
    Vec::new()
}

// ── Metrics ──────────────────────────────────────────────────────

/// Resource usage reported in the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostMetrics {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_free_gb: f64,
}

impl HostMetrics {
    /// Sample CPU over `window`; other values are instantaneous.
    pub async fn sample(disk_path: &Path, window: Duration) -> Self {
        let before = read_cpu_times();
        tokio::time::sleep(window).await;
        let after = read_cpu_times();
        let cpu_pct = match (before, after) {
            (Some(a), Some(b)) => cpu_busy_pct(a, b),
            _ => 0.0,
        };
        let mem_pct = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| mem_used_pct(&s))
            .unwrap_or(0.0);
        let disk_free_gb = disk_free_bytes(disk_path)
            .map(|b| b as f64 / (1024.0 * 1024.0 * 1024.0))
            .unwrap_or(0.0);
        Self {
            cpu_pct: round2(cpu_pct),
            mem_pct: round2(mem_pct),
            disk_free_gb: round2(disk_free_gb),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `(busy, total)` jiffies from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

pub fn parse_cpu_times(proc_stat: &str) -> Option<CpuTimes> {
    let line = proc_stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn read_cpu_times() -> Option<CpuTimes> {
    fs::read_to_string("/proc/stat")
        .ok()
        .and_then(|s| parse_cpu_times(&s))
}

pub fn cpu_busy_pct(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let busy = after.busy.saturating_sub(before.busy);
    busy as f64 * 100.0 / total as f64
}

/// Used memory from `/proc/meminfo` (`MemTotal` minus `MemAvailable`).
pub fn mem_used_pct(meminfo: &str) -> Option<f64> {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) * 100.0 / total)
}

#[cfg(unix)]
fn disk_free_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = CString::new(path.as_os_str().as_bytes()).ok()?;

    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(path_cstr.as_ptr(), &mut stat) == 0 {
            Some(stat.f_bavail as u64 * stat.f_frsize as u64)
        } else {
            None
        }
    }
}

#[cfg(not(unix))]
fn disk_free_bytes(_path: &Path) -> Option<u64> {
    None
}

// ── Engine ───────────────────────────────────────────────────────

/// `{"rule_engine": <engine>, "rule_engine_raw": <first "Version" line of `<bin> -V`>}`.
pub async fn engine_versions(engine: &str, engine_bin: &str) -> BTreeMap<String, String> {
    let probe = tokio::time::timeout(
        Duration::from_secs(2),
        Command::new(engine_bin).arg("-V").output(),
    )
    .await;

    let raw = match probe {
        Ok(Ok(output)) => {
            let text = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            text.lines()
                .find(|l| l.contains("Version"))
                .map(|l| l.trim().to_string())
        }
        Ok(Err(e)) => {
            debug!(engine_bin, error = %e, "engine version probe failed");
            None
        }
        Err(_) => {
            debug!(engine_bin, "engine version probe timed out");
            None
        }
    };

    BTreeMap::from([
        ("rule_engine".to_string(), engine.to_string()),
        (
            "rule_engine_raw".to_string(),
            raw.unwrap_or_else(|| engine.to_string()),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_iface(root: &Path, name: &str, state: &str) {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join("operstate"), format!("{}\n", state)).unwrap();
    }

    #[test]
    fn only_up_non_loopback_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        fake_iface(dir.path(), "lo", "unknown");
        fake_iface(dir.path(), "ens37", "up");
        fake_iface(dir.path(), "eth0", "up");
        fake_iface(dir.path(), "eth1", "down");

        assert_eq!(up_interfaces(dir.path()), vec!["ens37", "eth0"]);
        assert!(up_interfaces(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn mgmt_ip_prefers_configured_interface() {
        let addrs = vec![
            ("eth0".to_string(), Ipv4Addr::new(10, 0, 0, 5)),
            ("ens37".to_string(), Ipv4Addr::new(8, 8, 8, 8)),
            ("ens37".to_string(), Ipv4Addr::new(172, 16, 1, 20)),
            ("wlan0".to_string(), Ipv4Addr::new(192, 168, 1, 9)),
        ];
        let ifaces = vec!["ens37".to_string(), "eth0".to_string()];

        assert_eq!(
            pick_mgmt_ip(&addrs, &ifaces, Some("ens37")),
            Some(Ipv4Addr::new(172, 16, 1, 20))
        );
        // Unknown or down management interface falls back to the others.
        assert_eq!(
            pick_mgmt_ip(&addrs, &ifaces, Some("wlan0")),
            Some(Ipv4Addr::new(172, 16, 1, 20))
        );
        let reordered = vec!["eth0".to_string(), "ens37".to_string()];
        assert_eq!(
            pick_mgmt_ip(&addrs, &reordered, None),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
        assert_eq!(pick_mgmt_ip(&addrs, &[], None), None);
    }

    #[test]
    fn link_local_is_not_a_management_address() {
        let addrs = vec![("eth0".to_string(), Ipv4Addr::new(169, 254, 3, 3))];
        assert_eq!(pick_mgmt_ip(&addrs, &["eth0".to_string()], None), None);
    }

    #[test]
    fn cpu_percent_from_two_samples() {
        let a = parse_cpu_times("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        let b = parse_cpu_times("cpu  150 0 150 750 150 0 0 0 0 0\n").unwrap();
        assert_eq!(a, CpuTimes { busy: 200, total: 1000 });
        assert_eq!(cpu_busy_pct(a, b), 50.0);
        assert_eq!(cpu_busy_pct(a, a), 0.0);
        assert!(parse_cpu_times("intr 1 2 3").is_none());
    }

    #[test]
    fn memory_percent_uses_available() {
        let meminfo = "MemTotal:       8000000 kB\nMemFree:        1000000 kB\nMemAvailable:   2000000 kB\n";
        assert_eq!(mem_used_pct(meminfo), Some(75.0));
        assert_eq!(mem_used_pct("MemTotal: 10 kB\n"), None);
    }

    #[tokio::test]
    async fn missing_engine_binary_falls_back_to_engine_name() {
        let versions = engine_versions("snort3", "/nonexistent/snort").await;
        assert_eq!(versions["rule_engine"], "snort3");
        assert_eq!(versions["rule_engine_raw"], "snort3");
    }
}

//! Linux `/proc` readers for the numbers `sysinfo` does not expose.
//!
//! Parsing is kept in pure functions over file content so it can be tested
//! with string fixtures; [`ProcFs`] only does the file access.

use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use super::error::ProviderError;
use super::types::{CtxSwitches, DiskIoCounters, SocketConnection};

const SECTOR_SIZE: u64 = 512;

#[derive(Clone, Debug)]
pub struct ProcFs {
    root: PathBuf,
    sys_block: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        ProcFs::new("/proc", "/sys/block")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>, sys_block: impl Into<PathBuf>) -> Self {
        ProcFs {
            root: root.into(),
            sys_block: sys_block.into(),
        }
    }

    pub fn disk_io_counters(&self) -> Result<DiskIoCounters, ProviderError> {
        let path = self.root.join("diskstats");
        let content = read(&path)?;
        Ok(sum_diskstats(&content, |device| {
            self.sys_block.join(device).exists()
        }))
    }

    /// Reads the TCP and UDP socket tables for both address families.
    /// Tables missing from the kernel (e.g. IPv6 disabled) are skipped.
    pub fn net_connections(&self) -> Result<Vec<SocketConnection>, ProviderError> {
        let tables = [
            ("tcp", "inet", "tcp"),
            ("tcp6", "inet6", "tcp"),
            ("udp", "inet", "udp"),
            ("udp6", "inet6", "udp"),
        ];
        let mut connections = Vec::new();
        for (file, family, kind) in tables {
            let path = self.root.join("net").join(file);
            match fs::read_to_string(&path) {
                Ok(content) => connections.extend(parse_socket_table(&content, family, kind)),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ProviderError::io(path.display().to_string(), err)),
            }
        }
        Ok(connections)
    }

    pub fn ctx_switches(&self, pid: u32) -> Result<CtxSwitches, ProviderError> {
        let path = self.pid_dir(pid).join("status");
        let content = fs::read_to_string(&path).map_err(|err| process_io(pid, &path, err))?;
        parse_ctx_switches(&content)
    }

    pub fn num_fds(&self, pid: u32) -> Result<u64, ProviderError> {
        let path = self.pid_dir(pid).join("fd");
        let entries = fs::read_dir(&path).map_err(|err| process_io(pid, &path, err))?;
        Ok(entries.filter_map(Result::ok).count() as u64)
    }

    pub fn threads(&self, pid: u32) -> Result<Vec<u32>, ProviderError> {
        let path = self.pid_dir(pid).join("task");
        let entries = fs::read_dir(&path).map_err(|err| process_io(pid, &path, err))?;
        let mut tids: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        Ok(tids)
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

fn read(path: &Path) -> Result<String, ProviderError> {
    fs::read_to_string(path).map_err(|err| ProviderError::io(path.display().to_string(), err))
}

fn process_io(pid: u32, path: &Path, err: std::io::Error) -> ProviderError {
    match err.kind() {
        ErrorKind::NotFound => ProviderError::NoSuchProcess(pid),
        ErrorKind::PermissionDenied => ProviderError::AccessDenied(pid),
        _ => ProviderError::io(path.display().to_string(), err),
    }
}

/// Sums `/proc/diskstats` rows for which `is_whole_disk` holds, so that
/// partitions are not counted twice.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged
/// w_sectors w_time io_pending io_time w_io_time [discards ...]
pub fn sum_diskstats(content: &str, is_whole_disk: impl Fn(&str) -> bool) -> DiskIoCounters {
    let mut total = DiskIoCounters::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 || !is_whole_disk(parts[2]) {
            continue;
        }
        let get_val = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        total.read_count += get_val(3);
        total.read_merged_count += get_val(4);
        total.read_bytes += get_val(5) * SECTOR_SIZE;
        total.read_time += get_val(6);
        total.write_count += get_val(7);
        total.write_merged_count += get_val(8);
        total.write_bytes += get_val(9) * SECTOR_SIZE;
        total.write_time += get_val(10);
        total.busy_time += get_val(12);
    }
    total
}

pub fn parse_ctx_switches(content: &str) -> Result<CtxSwitches, ProviderError> {
    let mut voluntary = None;
    let mut involuntary = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("voluntary_ctxt_switches:") {
            voluntary = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("nonvoluntary_ctxt_switches:") {
            involuntary = rest.trim().parse().ok();
        }
    }
    match (voluntary, involuntary) {
        (Some(voluntary), Some(involuntary)) => Ok(CtxSwitches {
            voluntary,
            involuntary,
        }),
        _ => Err(ProviderError::Parse {
            what: "status",
            detail: "context switch counters missing".to_string(),
        }),
    }
}

/// Parses one of `/proc/net/{tcp,tcp6,udp,udp6}`. Malformed rows are skipped.
pub fn parse_socket_table(content: &str, family: &str, kind: &str) -> Vec<SocketConnection> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let local = parse_socket_addr(parts[1])?;
            let remote = parse_socket_addr(parts[2])?;
            let status = if kind == "tcp" {
                tcp_state(parts[3])
            } else {
                "NONE"
            };
            let raddr = if remote.port() == 0 && remote.ip().is_unspecified() {
                String::new()
            } else {
                remote.to_string()
            };
            Some(SocketConnection {
                family: family.to_string(),
                kind: kind.to_string(),
                laddr: local.to_string(),
                raddr,
                status: status.to_string(),
            })
        })
        .collect()
}

/// Decodes `0100007F:0035`. The address words are printed in host byte
/// order, the port in network order.
fn parse_socket_addr(field: &str) -> Option<SocketAddr> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (idx, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr[idx * 8..idx * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

fn tcp_state(code: &str) -> &'static str {
    match code {
        "01" => "ESTABLISHED",
        "02" => "SYN_SENT",
        "03" => "SYN_RECV",
        "04" => "FIN_WAIT1",
        "05" => "FIN_WAIT2",
        "06" => "TIME_WAIT",
        "07" => "CLOSE",
        "08" => "CLOSE_WAIT",
        "09" => "LAST_ACK",
        "0A" => "LISTEN",
        "0B" => "CLOSING",
        _ => "NONE",
    }
}

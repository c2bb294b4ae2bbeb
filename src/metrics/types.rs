use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::Serialize;

/// A single value in a report: a scalar, or a list for bulk categories.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<MetricValue>),
    Record(BTreeMap<String, MetricValue>),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::UInt(v) => Some(*v as f64),
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetricValue]> {
        match self {
            MetricValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::UInt(value)
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::UInt(value as u64)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(value as f64)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl<T: Into<MetricValue>> From<Vec<T>> for MetricValue {
    fn from(values: Vec<T>) -> Self {
        MetricValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// What the provider hands back for one category, before flattening.
#[derive(Clone, Debug, PartialEq)]
pub enum RawMetricRecord {
    Scalar(MetricValue),
    Nested(Vec<(String, MetricValue)>),
}

impl RawMetricRecord {
    pub fn nested<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<MetricValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        RawMetricRecord::Nested(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Flat `category_field -> value` mapping produced by one collection pass.
///
/// Keys are kept sorted so serialized reports are stable between runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlatReport {
    entries: BTreeMap<String, MetricValue>,
}

impl FlatReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one if the key was taken.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Option<MetricValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, MetricValue> {
        self.entries.iter()
    }
}

impl IntoIterator for FlatReport {
    type Item = (String, MetricValue);
    type IntoIter = btree_map::IntoIter<String, MetricValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<MetricValue>> FromIterator<(K, V)> for FlatReport {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FlatReport {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Percentage rounded to one decimal, zero when `total` is zero.
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 1000.0).round() / 10.0
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VirtualMemory {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
    pub used: u64,
    pub free: u64,
}

impl From<VirtualMemory> for RawMetricRecord {
    fn from(mem: VirtualMemory) -> Self {
        RawMetricRecord::nested([
            ("total", MetricValue::from(mem.total)),
            ("available", mem.available.into()),
            ("percent", mem.percent.into()),
            ("used", mem.used.into()),
            ("free", mem.free.into()),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl From<SwapMemory> for RawMetricRecord {
    fn from(swap: SwapMemory) -> Self {
        RawMetricRecord::nested([
            ("total", MetricValue::from(swap.total)),
            ("used", swap.used.into()),
            ("free", swap.free.into()),
            ("percent", swap.percent.into()),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl From<DiskUsage> for RawMetricRecord {
    fn from(usage: DiskUsage) -> Self {
        RawMetricRecord::nested([
            ("total", MetricValue::from(usage.total)),
            ("used", usage.used.into()),
            ("free", usage.free.into()),
            ("percent", usage.percent.into()),
        ])
    }
}

/// System-wide block device counters, summed over whole disks.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiskIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Milliseconds spent reading.
    pub read_time: u64,
    /// Milliseconds spent writing.
    pub write_time: u64,
    pub read_merged_count: u64,
    pub write_merged_count: u64,
    pub busy_time: u64,
}

impl From<DiskIoCounters> for RawMetricRecord {
    fn from(io: DiskIoCounters) -> Self {
        RawMetricRecord::nested([
            ("read_count", io.read_count),
            ("write_count", io.write_count),
            ("read_bytes", io.read_bytes),
            ("write_bytes", io.write_bytes),
            ("read_time", io.read_time),
            ("write_time", io.write_time),
            ("read_merged_count", io.read_merged_count),
            ("write_merged_count", io.write_merged_count),
            ("busy_time", io.busy_time),
        ])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NetIoCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
}

impl From<NetIoCounters> for RawMetricRecord {
    fn from(net: NetIoCounters) -> Self {
        RawMetricRecord::nested([
            ("bytes_sent", net.bytes_sent),
            ("bytes_recv", net.bytes_recv),
            ("packets_sent", net.packets_sent),
            ("packets_recv", net.packets_recv),
            ("errin", net.errin),
            ("errout", net.errout),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SocketConnection {
    /// `inet` or `inet6`.
    pub family: String,
    /// `tcp` or `udp`.
    pub kind: String,
    pub laddr: String,
    /// Empty when the socket has no peer.
    pub raddr: String,
    pub status: String,
}

impl From<SocketConnection> for MetricValue {
    fn from(conn: SocketConnection) -> Self {
        let mut record = BTreeMap::new();
        record.insert("family".to_string(), MetricValue::from(conn.family));
        record.insert("type".to_string(), conn.kind.into());
        record.insert("laddr".to_string(), conn.laddr.into());
        record.insert("raddr".to_string(), conn.raddr.into());
        record.insert("status".to_string(), conn.status.into());
        MetricValue::Record(record)
    }
}

/// Resident and virtual sizes of one process, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CtxSwitches {
    pub voluntary: u64,
    pub involuntary: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlatformInfo {
    pub machine: String,
    pub system: String,
    pub os_version: String,
    pub platform: String,
    pub kernel_version: String,
    pub hostname: String,
    pub processor: String,
    pub cores: usize,
}

impl From<PlatformInfo> for FlatReport {
    fn from(info: PlatformInfo) -> Self {
        let mut report = FlatReport::new();
        report.insert("machine", info.machine);
        report.insert("system", info.system);
        report.insert("version", info.os_version);
        report.insert("platform", info.platform);
        report.insert("kernel_version", info.kernel_version);
        report.insert("hostname", info.hostname);
        report.insert("processor", info.processor);
        report.insert("cores", info.cores as u64);
        report
    }
}

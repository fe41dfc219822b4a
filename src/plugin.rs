use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Plugin binary interface generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginFormat {
    /// VST2 and older
    #[serde(alias = "vst2", alias = "vst", alias = "VST2")]
    Legacy,
    /// VST3
    #[serde(alias = "vst3", alias = "VST3")]
    Modern,
}

impl PluginFormat {
    /// Short tag used in `BranchDeviceId` values.
    pub fn device_tag(&self) -> &'static str {
        match self {
            PluginFormat::Legacy => "vst",
            PluginFormat::Modern => "vst3",
        }
    }
}

impl fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginFormat::Legacy => f.write_str("VST2"),
            PluginFormat::Modern => f.write_str("VST3"),
        }
    }
}

/// A plugin version as an ordered tuple of numbers.
///
/// Every run of ASCII digits in the raw string becomes one component, so
/// `"1.2.10"`, `"v1.2.10"` and `"1.2.10 (build)"` all compare equal.
/// Architecture tags (`x64`, `x86`, `64bit`, `32bit`) are not part of the
/// version and are skipped. Missing trailing components count as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    parts: Vec<u64>,
}

const ARCHITECTURE_TAGS: &[&str] = &["x64", "x86", "64bit", "32bit"];

impl Version {
    pub fn parse(raw: &str) -> Self {
        let parts = raw
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| {
                !ARCHITECTURE_TAGS
                    .iter()
                    .any(|tag| token.eq_ignore_ascii_case(tag))
            })
            .flat_map(|token| token.split(|c: char| !c.is_ascii_digit()))
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| chunk.parse::<u64>().unwrap_or(u64::MAX))
            .collect();
        Version {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// Components with trailing zeros removed; equal versions share one key.
    pub fn canonical_parts(&self) -> &[u64] {
        let end = self
            .parts
            .iter()
            .rposition(|&part| part != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<String> for Version {
    fn from(raw: String) -> Self {
        Version::parse(&raw)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// One installed plugin as reported by the host's scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub unique_id: String,
    pub display_name: String,
    pub format: PluginFormat,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub vendor: Option<String>,
    /// Parameter names in declaration order. Empty when the scanner did not
    /// publish a layout.
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl PluginRecord {
    pub fn new(unique_id: &str, display_name: &str, format: PluginFormat, version: &str) -> Self {
        PluginRecord {
            unique_id: unique_id.to_string(),
            display_name: display_name.to_string(),
            format,
            version: Version::parse(version),
            vendor: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = Some(vendor.to_string());
        self
    }
}

//! Live set document model.
//!
//! Wraps the lossless [`XmlTree`] with the structural knowledge needed to find
//! plugin devices, their parameters, and the automation lanes and control
//! mappings that point at those parameters.
//!
//! # Layout
//!
//! ```text
//! PluginDevice
//!   PluginDesc/VstPluginInfo      legacy: PlugName, UniqueId, Path, .../Buffer
//!   PluginDesc/Vst3PluginInfo     modern: Name, Uid/Fields.0..3, .../ProcessorState
//!   ParameterList/*               ParameterName, ParameterId,
//!                                 ParameterValue/Manual,
//!                                 ParameterValue/AutomationTarget@Id
//! *Envelope/EnvelopeTarget/PointeeId@Value            -> AutomationTarget@Id
//! MacroMapping|MidiMapping//PointeeId@Value           -> AutomationTarget@Id
//! ```

use crate::error::{FixerError, Result};
use crate::plugin::{PluginFormat, PluginRecord};
use crate::rewrite::RewritePlan;
use crate::xml::{NodeId, XmlTree};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Pointee value written into links whose parameter no longer exists.
pub const ORPHANED_POINTEE: &str = "-1";

/// Oldest Live generation whose set layout is understood (Live 10).
const MIN_SUPPORTED_MINOR: u32 = 10;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const MAPPING_ELEMENTS: &[&str] = &["MacroMapping", "MidiMapping"];

const TARGET_ELEMENTS: &[&str] = &["AutomationTarget", "ModulationTarget"];

/// Header scalars of a converted descriptor, with the values written when the
/// legacy descriptor did not carry them. Live refuses to load a
/// `Vst3PluginInfo` without the audio port counts.
const CONVERTED_HEADER: &[(&str, &str)] = &[
    ("WinPosX", "47"),
    ("WinPosY", "72"),
    ("NumAudioInputs", "0"),
    ("NumAudioOutputs", "1"),
];

/// Vendor shown in the browser path when the catalog has none.
const UNKNOWN_VENDOR: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerFormat {
    Gzip,
    PlainXml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkKind {
    Automation,
    Mapping,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Automation => f.write_str("automation"),
            LinkKind::Mapping => f.write_str("mapping"),
        }
    }
}

/// Where a device lives: an arena handle plus a human-readable path.
#[derive(Debug, Clone)]
pub struct Location {
    pub node: NodeId,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ParameterRef {
    pub node: NodeId,
    pub index: i64,
    pub name: String,
    pub value: Option<String>,
    /// `AutomationTarget`/`ModulationTarget` ids owned by this parameter.
    pub targets: Vec<String>,
}

/// A `PointeeId` node pointing at one of a device's parameters.
#[derive(Debug, Clone)]
pub struct LinkRef {
    pub kind: LinkKind,
    pub pointee: NodeId,
    pub target_id: String,
    pub parameter_index: i64,
    pub parameter_name: String,
}

#[derive(Debug, Clone)]
pub struct DeviceReference {
    pub location: Location,
    /// The `VstPluginInfo` / `Vst3PluginInfo` element.
    pub info_node: NodeId,
    pub declared_id: Option<String>,
    pub declared_name: String,
    pub parameters: Vec<ParameterRef>,
    pub automation_links: Vec<LinkRef>,
    pub mapping_links: Vec<LinkRef>,
}

impl DeviceReference {
    /// Every link into this device, automation first.
    pub fn links(&self) -> impl Iterator<Item = &LinkRef> {
        self.automation_links.iter().chain(self.mapping_links.iter())
    }
}

#[derive(Debug, Clone)]
pub struct LegacyReference {
    pub device: DeviceReference,
    pub binary_path: Option<String>,
    /// Opaque plugin state (`Buffer`), carried over on conversion.
    pub state_buffer: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ModernReference {
    pub device: DeviceReference,
    pub processor_state: Option<NodeId>,
}

/// A plugin device found in a set.
#[derive(Debug, Clone)]
pub enum PluginReference {
    Legacy(LegacyReference),
    Modern(ModernReference),
}

impl PluginReference {
    pub fn format(&self) -> PluginFormat {
        match self {
            PluginReference::Legacy(_) => PluginFormat::Legacy,
            PluginReference::Modern(_) => PluginFormat::Modern,
        }
    }

    pub fn device(&self) -> &DeviceReference {
        match self {
            PluginReference::Legacy(legacy) => &legacy.device,
            PluginReference::Modern(modern) => &modern.device,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectDocument {
    path: PathBuf,
    container: ContainerFormat,
    live_version: String,
    tree: XmlTree,
    /// Automation target ids whose parameter node was removed in this run.
    removed_targets: BTreeSet<String>,
}

impl ProjectDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| FixerError::format(path, e))?;
        Self::from_bytes(path, &bytes)
    }

    /// Parse an in-memory set; `path` is only used for reporting.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let (container, text) = if bytes.starts_with(&GZIP_MAGIC) {
            let mut text = String::new();
            GzDecoder::new(bytes)
                .read_to_string(&mut text)
                .map_err(|e| FixerError::format(path, format!("cannot decompress: {}", e)))?;
            (ContainerFormat::Gzip, text)
        } else {
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|e| FixerError::format(path, format!("not UTF-8: {}", e)))?;
            (ContainerFormat::PlainXml, text)
        };

        let tree = XmlTree::parse(&text).map_err(|e| FixerError::format(path, e))?;
        let live_version = check_schema(&tree).map_err(|reason| FixerError::format(path, reason))?;

        Ok(ProjectDocument {
            path: path.to_path_buf(),
            container,
            live_version,
            tree,
            removed_targets: BTreeSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    /// `MinorVersion` of the set, e.g. `11.0_433`.
    pub fn live_version(&self) -> &str {
        &self.live_version
    }

    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    /// Every plugin device, depth-first in declaration order.
    pub fn find_plugin_references(&self) -> Vec<PluginReference> {
        let Some(root) = self.tree.root_element() else {
            return Vec::new();
        };
        let links = self.collect_links();

        self.tree
            .descendants(root)
            .into_iter()
            .filter(|&node| self.tree.name(node) == Some("PluginDevice"))
            .filter_map(|node| {
                let reference = self.read_device(node, &links);
                if reference.is_none() {
                    tracing::debug!(
                        path = %self.path.display(),
                        device = %self.node_path(node),
                        "Skipping plugin device without a VST descriptor"
                    );
                }
                reference
            })
            .collect()
    }

    /// Apply one rewrite plan to the tree.
    ///
    /// Touches only the device's descriptor and browser identity, the mapped
    /// parameters' name/index fields, orphaned parameter nodes, and the
    /// pointees of orphaned links.
    pub fn apply(&mut self, plan: &RewritePlan) -> Result<()> {
        let device = plan.reference.device();
        if !self.tree.is_attached(device.info_node) {
            return Err(FixerError::Serialize(format!(
                "device {} is no longer part of the document",
                device.location.path
            )));
        }

        let record = &plan.candidate.plugin;
        match &plan.reference {
            PluginReference::Legacy(legacy) => self.convert_legacy(legacy, record),
            PluginReference::Modern(modern) => self.retarget_modern(modern, record),
        }
        self.update_device_identity(device.location.node, record);

        for moved in &plan.parameter_mapping {
            let node = moved.from.node;
            if let Some(name) = self.tree.child(node, "ParameterName") {
                self.tree.set_attr(name, "Value", &moved.to.name);
            }
            if let Some(index) = self.tree.child(node, "ParameterId") {
                self.tree.set_attr(index, "Value", &moved.to.index.to_string());
            }
        }

        for orphan in &plan.unresolved_parameters {
            self.tree.detach(orphan.node);
            self.removed_targets.extend(orphan.targets.iter().cloned());
        }
        for link in &plan.orphaned_links {
            tracing::debug!(
                path = %self.path.display(),
                kind = %link.kind,
                target = %link.target_id,
                parameter = %link.parameter_name,
                "Link redirected to the orphan sentinel"
            );
            self.tree.set_attr(link.pointee, "Value", ORPHANED_POINTEE);
        }

        Ok(())
    }

    /// Serialize back to the container format the set was read from.
    ///
    /// Fails when any `PointeeId` in the set still points at a parameter
    /// removed in this run.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if !self.removed_targets.is_empty() {
            let nodes = self
                .tree
                .root_element()
                .map(|root| self.tree.descendants(root))
                .unwrap_or_default();
            for pointee in nodes {
                if self.tree.name(pointee) != Some("PointeeId") {
                    continue;
                }
                let Some(target) = self.tree.attr(pointee, "Value") else {
                    continue;
                };
                if self.removed_targets.contains(target) {
                    return Err(FixerError::Serialize(format!(
                        "link {} still points at removed target {}",
                        self.node_path(pointee),
                        target
                    )));
                }
            }
        }

        let text = self.tree.to_xml_string();
        match self.container {
            ContainerFormat::PlainXml => Ok(text.into_bytes()),
            ContainerFormat::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(text.as_bytes())
                    .and_then(|_| encoder.finish())
                    .map_err(|e| FixerError::Serialize(format!("gzip: {}", e)))
            }
        }
    }

    /// Canonical XML text of the current tree.
    pub fn to_xml_string(&self) -> String {
        self.tree.to_xml_string()
    }

    #[cfg(test)]
    pub(crate) fn tree_mut(&mut self) -> &mut XmlTree {
        &mut self.tree
    }

    #[cfg(test)]
    pub(crate) fn mark_removed_target(&mut self, target: &str) {
        self.removed_targets.insert(target.to_string());
    }

    fn read_device(
        &self,
        node: NodeId,
        links: &[(LinkKind, NodeId, String)],
    ) -> Option<PluginReference> {
        let desc = self.tree.child(node, "PluginDesc")?;
        let location = Location {
            node,
            path: self.node_path(node),
        };

        if let Some(info) = self.tree.child(desc, "VstPluginInfo") {
            let device = self.read_common(
                location,
                info,
                self.tree.child_value(info, "PlugName"),
                non_empty(self.tree.child_value(info, "UniqueId")),
                links,
            );
            return Some(PluginReference::Legacy(LegacyReference {
                device,
                binary_path: non_empty(self.tree.child_value(info, "Path")),
                state_buffer: self.tree.find_descendant(info, "Buffer"),
            }));
        }

        if let Some(info) = self.tree.child(desc, "Vst3PluginInfo") {
            let declared_id = self
                .tree
                .child(info, "Uid")
                .and_then(|uid| id_from_uid_fields(&self.tree, uid));
            let device = self.read_common(
                location,
                info,
                self.tree.child_value(info, "Name"),
                declared_id,
                links,
            );
            return Some(PluginReference::Modern(ModernReference {
                device,
                processor_state: self.tree.find_descendant(info, "ProcessorState"),
            }));
        }

        None
    }

    fn read_common(
        &self,
        location: Location,
        info_node: NodeId,
        name: Option<&str>,
        declared_id: Option<String>,
        links: &[(LinkKind, NodeId, String)],
    ) -> DeviceReference {
        let parameters = self.read_parameters(location.node);

        let mut automation_links = Vec::new();
        let mut mapping_links = Vec::new();
        for (kind, pointee, target) in links {
            let Some(owner) = parameters.iter().find(|p| p.targets.contains(target)) else {
                continue;
            };
            let link = LinkRef {
                kind: *kind,
                pointee: *pointee,
                target_id: target.clone(),
                parameter_index: owner.index,
                parameter_name: owner.name.clone(),
            };
            match kind {
                LinkKind::Automation => automation_links.push(link),
                LinkKind::Mapping => mapping_links.push(link),
            }
        }

        DeviceReference {
            location,
            info_node,
            declared_id,
            declared_name: name.unwrap_or_default().to_string(),
            parameters,
            automation_links,
            mapping_links,
        }
    }

    fn read_parameters(&self, device: NodeId) -> Vec<ParameterRef> {
        let Some(list) = self.tree.child(device, "ParameterList") else {
            return Vec::new();
        };

        self.tree
            .child_elements(list)
            .enumerate()
            .map(|(position, node)| {
                let index = self
                    .tree
                    .child_value(node, "ParameterId")
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(position as i64);
                let value = self
                    .tree
                    .child_path(node, "ParameterValue/Manual")
                    .and_then(|manual| self.tree.attr(manual, "Value"))
                    .map(str::to_string);
                let targets = TARGET_ELEMENTS
                    .iter()
                    .filter_map(|target| {
                        self.tree
                            .child_path(node, &format!("ParameterValue/{}", target))
                            .and_then(|t| self.tree.attr(t, "Id"))
                            .map(str::to_string)
                    })
                    .collect();
                ParameterRef {
                    node,
                    index,
                    name: self
                        .tree
                        .child_value(node, "ParameterName")
                        .unwrap_or_default()
                        .to_string(),
                    value,
                    targets,
                }
            })
            .collect()
    }

    /// Every attached automation/mapping pointee as (kind, node, target id).
    ///
    /// Automation covers arrangement and clip lanes alike: any `*Envelope`
    /// carrying an `EnvelopeTarget/PointeeId`.
    fn collect_links(&self) -> Vec<(LinkKind, NodeId, String)> {
        let Some(root) = self.tree.root_element() else {
            return Vec::new();
        };

        let mut links = Vec::new();
        for node in self.tree.descendants(root) {
            match self.tree.name(node) {
                Some(name) if name.ends_with("Envelope") => {
                    if let Some(pointee) = self.tree.child_path(node, "EnvelopeTarget/PointeeId") {
                        if let Some(target) = self.tree.attr(pointee, "Value") {
                            links.push((LinkKind::Automation, pointee, target.to_string()));
                        }
                    }
                }
                Some(name) if MAPPING_ELEMENTS.contains(&name) => {
                    for inner in self.tree.descendants(node) {
                        if self.tree.name(inner) != Some("PointeeId") {
                            continue;
                        }
                        if let Some(target) = self.tree.attr(inner, "Value") {
                            links.push((LinkKind::Mapping, inner, target.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        links
    }

    fn convert_legacy(&mut self, legacy: &LegacyReference, record: &PluginRecord) {
        let info = legacy.device.info_node;
        let state = legacy.state_buffer.and_then(|buffer| self.tree.text(buffer));
        let header: Vec<(&str, String)> = CONVERTED_HEADER
            .iter()
            .map(|&(name, default)| {
                let kept = self.tree.child_value(info, name).unwrap_or(default);
                (name, kept.to_string())
            })
            .collect();

        self.tree.rename(info, "Vst3PluginInfo");
        self.tree.clear_children(info);
        for (name, value) in &header {
            self.tree.append_element(info, name, &[("Value", value.as_str())]);
        }
        self.tree
            .append_element(info, "IsPlaceholderDevice", &[("Value", "false")]);

        let preset = self.tree.append_element(info, "Preset", &[]);
        let vst3_preset = self.tree.append_element(preset, "Vst3Preset", &[("Id", "1")]);
        let preset_uid = self.tree.append_element(vst3_preset, "Uid", &[]);
        self.write_uid_fields(preset_uid, &record.unique_id);
        self.tree.append_element(vst3_preset, "DeviceType", &[("Value", "1")]);
        match state {
            Some(state) => {
                let processor = self.tree.append_element(vst3_preset, "ProcessorState", &[]);
                self.tree.set_text(processor, &state);
            }
            None => tracing::warn!(
                path = %self.path.display(),
                device = %legacy.device.location.path,
                "Legacy device carries no state buffer; replacement starts from defaults"
            ),
        }
        self.tree.append_element(vst3_preset, "ControllerState", &[]);
        self.tree.append_element(vst3_preset, "Name", &[("Value", "")]);

        self.tree
            .append_element(info, "Name", &[("Value", record.display_name.as_str())]);
        let uid = self.tree.append_element(info, "Uid", &[]);
        self.write_uid_fields(uid, &record.unique_id);
        self.tree.append_element(info, "DeviceType", &[("Value", "1")]);
    }

    fn retarget_modern(&mut self, modern: &ModernReference, record: &PluginRecord) {
        let info = modern.device.info_node;
        match self.tree.child(info, "Name") {
            Some(name) => {
                self.tree.set_attr(name, "Value", &record.display_name);
            }
            None => {
                self.tree
                    .append_element(info, "Name", &[("Value", record.display_name.as_str())]);
            }
        }

        let uid = match self.tree.child(info, "Uid") {
            Some(uid) => uid,
            None => self.tree.append_element(info, "Uid", &[]),
        };
        if self.tree.children(uid).is_empty() {
            self.write_uid_fields(uid, &record.unique_id);
            return;
        }
        let fields: Vec<NodeId> = self.tree.child_elements(uid).collect();
        match uid_fields(&record.unique_id) {
            Some(values) if fields.len() == values.len() => {
                for (field, value) in fields.into_iter().zip(values) {
                    self.tree.set_attr(field, "Value", &value.to_string());
                }
            }
            _ => {
                self.tree.clear_children(uid);
                self.write_uid_fields(uid, &record.unique_id);
            }
        }
    }

    fn write_uid_fields(&mut self, uid: NodeId, unique_id: &str) {
        match uid_fields(unique_id) {
            Some(values) => {
                for (i, value) in values.iter().enumerate() {
                    self.tree.append_element(
                        uid,
                        &format!("Fields.{}", i),
                        &[("Value", value.to_string().as_str())],
                    );
                }
            }
            None => tracing::debug!(
                unique_id,
                "Catalog id is not a 128-bit class id; Uid fields left empty"
            ),
        }
    }

    /// Point the device's browser identity at the replacement: the
    /// `BranchDeviceId`, the `BrowserContentPath`, and the `Pointee`, which
    /// keeps only its `Id` once the device is retargeted.
    fn update_device_identity(&mut self, device: NodeId, record: &PluginRecord) {
        if let Some(branch) = self.tree.find_descendant(device, "BranchDeviceId") {
            let kind = self
                .tree
                .attr(branch, "Value")
                .and_then(|value| value.split(':').nth(2))
                .filter(|kind| !kind.is_empty())
                .unwrap_or("instr")
                .to_string();
            let value = format!(
                "device:{}:{}:{}",
                record.format.device_tag(),
                kind,
                record.unique_id
            );
            self.tree.set_attr(branch, "Value", &value);
        }

        if let Some(browser_path) = self
            .tree
            .child_path(device, "SourceContext/Value/BranchSourceContext/BrowserContentPath")
        {
            self.tree.set_attr(browser_path, "Value", &browser_content_path(record));
        }

        if let Some(pointee) = self.tree.find_descendant(device, "Pointee") {
            self.tree.remove_attr(pointee, "Value");
        }
    }

    /// `Ableton/LiveSet/Tracks/AudioTrack[2]/...`; the `[k]` suffix appears
    /// only where siblings share a name.
    fn node_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(name) = self.tree.name(id) else {
                break;
            };
            let segment = match self.tree.parent(id) {
                Some(parent) => {
                    let same: Vec<NodeId> = self
                        .tree
                        .child_elements(parent)
                        .filter(|&sibling| self.tree.name(sibling) == Some(name))
                        .collect();
                    if same.len() > 1 {
                        let k = same.iter().position(|&s| s == id).unwrap_or(0);
                        format!("{}[{}]", name, k)
                    } else {
                        name.to_string()
                    }
                }
                None => name.to_string(),
            };
            segments.push(segment);
            current = self.tree.parent(id);
        }
        segments.reverse();
        segments.join("/")
    }
}

/// `view:X-Plugins#<vendor>:<name>`, both halves percent-encoded.
pub fn browser_content_path(record: &PluginRecord) -> String {
    let vendor = record
        .vendor
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_VENDOR);
    format!(
        "view:X-Plugins#{}:{}",
        urlencoding::encode(vendor),
        urlencoding::encode(&record.display_name)
    )
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate the root element and return its `MinorVersion`.
fn check_schema(tree: &XmlTree) -> std::result::Result<String, String> {
    let root = tree.root_element().ok_or("document has no root element")?;
    if tree.name(root) != Some("Ableton") {
        return Err(format!(
            "root element is {:?}, expected Ableton",
            tree.name(root).unwrap_or_default()
        ));
    }
    match tree.attr(root, "MajorVersion") {
        Some("5") => {}
        other => return Err(format!("unsupported MajorVersion {:?}", other)),
    }
    let minor = tree
        .attr(root, "MinorVersion")
        .ok_or("missing MinorVersion")?;
    let generation: u32 = minor
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|lead| lead.parse().ok())
        .ok_or_else(|| format!("unreadable MinorVersion {:?}", minor))?;
    if generation < MIN_SUPPORTED_MINOR {
        return Err(format!(
            "set was saved by Live {}; sets older than Live {} use a different layout",
            generation, MIN_SUPPORTED_MINOR
        ));
    }
    Ok(minor.to_string())
}

/// Split a 128-bit class id (32 hex digits, dashes and a `prefix:` allowed)
/// into the four signed 32-bit words Live stores under `Uid`.
pub fn uid_fields(unique_id: &str) -> Option<[i32; 4]> {
    let hex: String = unique_id
        .rsplit(':')
        .next()
        .unwrap_or(unique_id)
        .chars()
        .filter(|&c| c != '-')
        .collect();
    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut fields = [0i32; 4];
    for (i, field) in fields.iter_mut().enumerate() {
        let word = u32::from_str_radix(&hex[i * 8..i * 8 + 8], 16).ok()?;
        *field = word as i32;
    }
    Some(fields)
}

fn id_from_uid_fields(tree: &XmlTree, uid: NodeId) -> Option<String> {
    let words: Vec<i32> = (0..4)
        .map(|i| {
            tree.child_value(uid, &format!("Fields.{}", i))
                .and_then(|v| v.trim().parse::<i32>().ok())
        })
        .collect::<Option<Vec<_>>>()?;
    if words.iter().all(|&w| w == 0) {
        return None;
    }
    Some(words.iter().map(|&w| format!("{:08x}", w as u32)).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A Live 11 set with one VST2 synth (automated and MIDI-mapped), one
    /// VST3 effect, and a mixer automation lane that targets neither.
    pub(crate) const LIVE_SET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="11.0_433" SchemaChangeCount="3" Creator="Ableton Live 11.3.4" Revision="">
	<LiveSet>
		<Tracks>
			<MidiTrack Id="12">
				<DeviceChain>
					<Mixer>
						<Volume>
							<Manual Value="0.85"/>
							<AutomationTarget Id="900">
								<LockEnvelope Value="0" />
							</AutomationTarget>
						</Volume>
					</Mixer>
					<DeviceChain>
						<Devices>
							<PluginDevice Id="0">
								<SourceContext>
									<Value>
										<BranchSourceContext Id="0">
											<BranchDeviceId Value="device:vst:instr:1483109208" />
											<BrowserContentPath Value="query:Plugins#VST:Local:Serum_x64" />
										</BranchSourceContext>
									</Value>
								</SourceContext>
								<Pointee Id="19" Value="4" />
								<PluginDesc>
									<VstPluginInfo Id="0">
										<WinPosX Value="40" />
										<Path Value="C:/VST/Serum_x64.dll" />
										<PlugName Value="Serum_x64" />
										<UniqueId Value="1483109208" />
										<Preset>
											<VstPreset Id="2">
												<Buffer>
													0A0B0C
												</Buffer>
											</VstPreset>
										</Preset>
									</VstPluginInfo>
								</PluginDesc>
								<ParameterList>
									<PluginFloatParameter Id="0">
										<ParameterName Value="Cutoff" />
										<ParameterId Value="0" />
										<ParameterValue>
											<Manual Value="0.5" />
											<AutomationTarget Id="1001">
												<LockEnvelope Value="0" />
											</AutomationTarget>
										</ParameterValue>
									</PluginFloatParameter>
									<PluginFloatParameter Id="1">
										<ParameterName Value="LegacyOnlyParam" />
										<ParameterId Value="1" />
										<ParameterValue>
											<Manual Value="0.9" />
											<AutomationTarget Id="1002">
												<LockEnvelope Value="0" />
											</AutomationTarget>
										</ParameterValue>
									</PluginFloatParameter>
								</ParameterList>
							</PluginDevice>
							<PluginDevice Id="1">
								<PluginDesc>
									<Vst3PluginInfo Id="0">
										<Name Value="Pro-Q 3" />
										<Uid>
											<Fields.0 Value="1447449425" />
											<Fields.1 Value="-1046419374" />
											<Fields.2 Value="1886417006" />
											<Fields.3 Value="2004059698" />
										</Uid>
									</Vst3PluginInfo>
								</PluginDesc>
								<ParameterList />
							</PluginDevice>
						</Devices>
					</DeviceChain>
				</DeviceChain>
			</MidiTrack>
		</Tracks>
		<AutomationEnvelopes>
			<Envelopes>
				<AutomationEnvelope Id="0">
					<EnvelopeTarget>
						<PointeeId Value="1001" />
					</EnvelopeTarget>
				</AutomationEnvelope>
				<AutomationEnvelope Id="1">
					<EnvelopeTarget>
						<PointeeId Value="1002" />
					</EnvelopeTarget>
				</AutomationEnvelope>
				<AutomationEnvelope Id="2">
					<EnvelopeTarget>
						<PointeeId Value="900" />
					</EnvelopeTarget>
				</AutomationEnvelope>
			</Envelopes>
		</AutomationEnvelopes>
		<MidiMappings>
			<MidiMapping Id="0">
				<Channel Value="1" />
				<ControllerNumber Value="74" />
				<PointeeId Value="1002" />
			</MidiMapping>
		</MidiMappings>
	</LiveSet>
</Ableton>
"#;

    pub(crate) fn open_sample() -> ProjectDocument {
        ProjectDocument::from_bytes(Path::new("sample.als"), LIVE_SET.as_bytes()).unwrap()
    }

    /// The sample set with a MIDI clip whose envelope automates
    /// `LegacyOnlyParam` (target 1002).
    pub(crate) fn sample_with_clip_envelope() -> String {
        LIVE_SET.replace(
            "\t\t\t</MidiTrack>",
            "\t\t\t\t<MidiClip Id=\"4\">\n\
             \t\t\t\t\t<Envelopes>\n\
             \t\t\t\t\t\t<Envelopes>\n\
             \t\t\t\t\t\t\t<ClipEnvelope Id=\"0\">\n\
             \t\t\t\t\t\t\t\t<EnvelopeTarget>\n\
             \t\t\t\t\t\t\t\t\t<PointeeId Value=\"1002\" />\n\
             \t\t\t\t\t\t\t\t</EnvelopeTarget>\n\
             \t\t\t\t\t\t\t</ClipEnvelope>\n\
             \t\t\t\t\t\t</Envelopes>\n\
             \t\t\t\t\t</Envelopes>\n\
             \t\t\t\t</MidiClip>\n\
             \t\t\t</MidiTrack>",
        )
    }

    #[test]
    fn round_trip_without_edits_is_byte_identical() {
        let doc = open_sample();
        assert_eq!(doc.container(), ContainerFormat::PlainXml);
        assert_eq!(String::from_utf8(doc.serialize().unwrap()).unwrap(), LIVE_SET);
    }

    #[test]
    fn gzip_round_trip_preserves_text() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(LIVE_SET.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let doc = ProjectDocument::from_bytes(Path::new("sample.als"), &compressed).unwrap();
        assert_eq!(doc.container(), ContainerFormat::Gzip);
        let written = doc.serialize().unwrap();
        assert_eq!(&written[..2], &GZIP_MAGIC);

        let mut text = String::new();
        GzDecoder::new(&written[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text, LIVE_SET);
    }

    #[test]
    fn finds_devices_in_traversal_order() {
        let doc = open_sample();
        let refs = doc.find_plugin_references();
        assert_eq!(refs.len(), 2);

        let PluginReference::Legacy(serum) = &refs[0] else {
            panic!("first device should be legacy");
        };
        assert_eq!(serum.device.declared_name, "Serum_x64");
        assert_eq!(serum.device.declared_id.as_deref(), Some("1483109208"));
        assert_eq!(serum.binary_path.as_deref(), Some("C:/VST/Serum_x64.dll"));
        assert!(serum.state_buffer.is_some());
        assert!(serum.device.location.path.ends_with("Devices/PluginDevice[0]"));

        let params: Vec<_> = serum
            .device
            .parameters
            .iter()
            .map(|p| (p.index, p.name.as_str(), p.value.as_deref()))
            .collect();
        assert_eq!(
            params,
            vec![(0, "Cutoff", Some("0.5")), (1, "LegacyOnlyParam", Some("0.9"))]
        );
        assert_eq!(serum.device.automation_links.len(), 2);
        assert_eq!(serum.device.mapping_links.len(), 1);
        assert_eq!(serum.device.mapping_links[0].parameter_name, "LegacyOnlyParam");

        let PluginReference::Modern(eq) = &refs[1] else {
            panic!("second device should be modern");
        };
        assert_eq!(eq.device.declared_name, "Pro-Q 3");
        assert_eq!(
            eq.device.declared_id.as_deref(),
            Some("56465351c1a0e8527070706e77738632")
        );
        assert!(eq.device.parameters.is_empty());
    }

    #[test]
    fn traversal_is_stable_across_parses() {
        let first: Vec<String> = open_sample()
            .find_plugin_references()
            .iter()
            .map(|r| r.device().location.path.clone())
            .collect();
        let second: Vec<String> = open_sample()
            .find_plugin_references()
            .iter()
            .map(|r| r.device().location.path.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_old_and_foreign_schemas() {
        let old = LIVE_SET.replace("MinorVersion=\"11.0_433\"", "MinorVersion=\"9.7_178\"");
        assert!(matches!(
            ProjectDocument::from_bytes(Path::new("old.als"), old.as_bytes()),
            Err(FixerError::Format { .. })
        ));

        let foreign = "<Project Version=\"1\"/>";
        assert!(ProjectDocument::from_bytes(Path::new("x.xml"), foreign.as_bytes()).is_err());

        let garbage = [0x1f, 0x8b, 0x00, 0x01];
        assert!(ProjectDocument::from_bytes(Path::new("bad.als"), &garbage).is_err());
    }

    #[test]
    fn serialize_refuses_links_into_removed_parameters() {
        let mut doc = open_sample();
        let refs = doc.find_plugin_references();
        let orphan = &refs[0].device().parameters[1];
        doc.tree_mut().detach(orphan.node);
        doc.mark_removed_target("1002");
        assert!(matches!(doc.serialize(), Err(FixerError::Serialize(_))));
    }

    #[test]
    fn clip_envelopes_count_as_automation() {
        let text = sample_with_clip_envelope();
        let doc = ProjectDocument::from_bytes(Path::new("clip.als"), text.as_bytes()).unwrap();
        let refs = doc.find_plugin_references();
        let serum = refs[0].device();

        let automated: Vec<&str> = serum
            .automation_links
            .iter()
            .map(|link| link.parameter_name.as_str())
            .collect();
        assert_eq!(automated, vec!["LegacyOnlyParam", "Cutoff", "LegacyOnlyParam"]);
        assert_eq!(serum.mapping_links.len(), 1);
        // LockEnvelope has no EnvelopeTarget and is not a link
        assert!(serum.links().all(|link| doc.tree().name(link.pointee) == Some("PointeeId")));
    }

    #[test]
    fn serialize_checks_pointees_in_every_section() {
        let stray = LIVE_SET.replace(
            "\t\t<MidiMappings>",
            "\t\t<Grooves>\n\
             \t\t\t<PointeeId Value=\"777\" />\n\
             \t\t</Grooves>\n\
             \t\t<MidiMappings>",
        );
        let mut doc =
            ProjectDocument::from_bytes(Path::new("stray.als"), stray.as_bytes()).unwrap();
        doc.mark_removed_target("777");
        match doc.serialize() {
            Err(FixerError::Serialize(reason)) => assert!(reason.contains("Grooves/PointeeId")),
            other => panic!("expected a serialize error, got {:?}", other.map(|b| b.len())),
        }

        let mut clean = open_sample();
        clean.mark_removed_target("777");
        assert!(clean.serialize().is_ok());
    }

    #[test]
    fn browser_path_encodes_vendor_and_name() {
        let record = PluginRecord::new("x", "Pro-Q 3", PluginFormat::Modern, "3")
            .with_vendor("FabFilter & Co");
        assert_eq!(
            browser_content_path(&record),
            "view:X-Plugins#FabFilter%20%26%20Co:Pro-Q%203"
        );

        let anonymous = PluginRecord::new("x", "Serum", PluginFormat::Modern, "1");
        assert_eq!(browser_content_path(&anonymous), "view:X-Plugins#Unknown:Serum");
    }

    #[test]
    fn uid_fields_round_trip_through_signed_words() {
        let fields = uid_fields("56465351-C1A0-E852-7070-706E77738632").unwrap();
        assert_eq!(fields, [1447449425, -1046419374, 1886417006, 2004059698]);
        assert!(uid_fields("1483109208").is_none());
        assert!(uid_fields("device:vst3:audiofx:56465351c1a0e8527070706e77738632").is_some());
    }
}

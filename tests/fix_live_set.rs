use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pluginfix_core::{
    fix_projects, DocumentOutcome, FixerConfig, PluginCatalog, PluginFormat, ProjectDocument,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const SET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="12.0_12049" Creator="Ableton Live 12.0.5">
	<LiveSet>
		<Tracks>
			<MidiTrack Id="3">
				<DeviceChain>
					<DeviceChain>
						<Devices>
							<PluginDevice Id="0">
								<SourceContext>
									<Value>
										<BranchSourceContext Id="0">
											<BranchDeviceId Value="device:vst:audiofx:1398895416" />
										</BranchSourceContext>
									</Value>
								</SourceContext>
								<PluginDesc>
									<VstPluginInfo Id="0">
										<Path Value="/Library/Audio/Plug-Ins/VST/Soundtoys Crystallizer.vst" />
										<PlugName Value="Crystallizer" />
										<UniqueId Value="1398895416" />
										<Preset>
											<VstPreset Id="1">
												<Buffer>CAFEBABE</Buffer>
											</VstPreset>
										</Preset>
									</VstPluginInfo>
								</PluginDesc>
								<ParameterList>
									<PluginFloatParameter Id="0">
										<ParameterName Value="Mix" />
										<ParameterId Value="0" />
										<ParameterValue>
											<Manual Value="0.25" />
											<AutomationTarget Id="7001">
												<LockEnvelope Value="0" />
											</AutomationTarget>
										</ParameterValue>
									</PluginFloatParameter>
									<PluginFloatParameter Id="1">
										<ParameterName Value="Param 2" />
										<ParameterId Value="1" />
										<ParameterValue>
											<Manual Value="0.7" />
											<AutomationTarget Id="7002">
												<LockEnvelope Value="0" />
											</AutomationTarget>
										</ParameterValue>
									</PluginFloatParameter>
								</ParameterList>
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
						<PointeeId Value="7001" />
					</EnvelopeTarget>
				</AutomationEnvelope>
			</Envelopes>
		</AutomationEnvelopes>
		<MacroMappings>
			<MacroMapping Id="0">
				<PointeeId Value="7002" />
			</MacroMapping>
		</MacroMappings>
	</LiveSet>
</Ableton>
"#;

const CATALOG: &str = r#"{
  "plugins": [
    { "unique_id": "56535443727973637279737461000000",
      "display_name": "Crystallizer",
      "format": "vst3",
      "version": "5.3.4",
      "vendor": "Soundtoys",
      "parameters": ["Mix", "Pitch", "Splice"] },
    { "unique_id": "56535443727973637279737461000001",
      "display_name": "Crystallizer",
      "format": "vst3",
      "version": "5.2.0",
      "vendor": "Soundtoys" }
  ]
}"#;

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn gunzip(bytes: &[u8]) -> String {
    let mut text = String::new();
    GzDecoder::new(bytes).read_to_string(&mut text).unwrap();
    text
}

fn setup(dir: &Path) -> (PathBuf, PluginCatalog) {
    let project = dir.join("Mixdown.als");
    fs::write(&project, gzip(SET)).unwrap();
    let catalog_path = dir.join("catalog.json");
    fs::write(&catalog_path, CATALOG).unwrap();
    (project, PluginCatalog::load(&catalog_path).unwrap())
}

#[test]
fn gzip_set_is_rewritten_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let (project, catalog) = setup(dir.path());
    let original = fs::read(&project).unwrap();

    let mut config = FixerConfig::default();
    config.safety.dry_run = false;
    config.safety.backup_suffix = ".orig".into();

    let run = fix_projects(&[project.clone()], &catalog, &config);
    let report = &run.documents[0];
    assert_eq!(report.outcome, DocumentOutcome::Committed);
    assert_eq!(report.live_version.as_deref(), Some("12.0_12049"));
    assert_eq!(report.changes.len(), 1);

    let change = &report.changes[0];
    assert_eq!(change.new_version, "5.3.4");
    assert!(change.orphaned_parameters.is_empty());
    let aligned: Vec<(&str, &str)> = change
        .parameters
        .iter()
        .map(|p| (p.from.name.as_str(), p.to.name.as_str()))
        .collect();
    assert_eq!(aligned, vec![("Mix", "Mix"), ("Param 2", "Pitch")]);

    let backup = dir.path().join("Mixdown.als.orig");
    assert_eq!(report.backup_path.as_deref(), Some(backup.as_path()));
    assert_eq!(fs::read(&backup).unwrap(), original);

    let written = fs::read(&project).unwrap();
    assert_eq!(&written[..2], &[0x1f, 0x8b]);
    let text = gunzip(&written);
    assert!(text.contains("<ProcessorState>CAFEBABE</ProcessorState>"));
    assert!(text.contains("device:vst3:audiofx:56535443727973637279737461000000"));
    assert!(text.contains("<ParameterName Value=\"Pitch\"/>"));
    assert!(text.contains("<PointeeId Value=\"7002\" />"));

    let reopened = ProjectDocument::open(&project).unwrap();
    let refs = reopened.find_plugin_references();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].format(), PluginFormat::Modern);
    assert_eq!(refs[0].device().declared_name, "Crystallizer");
    assert_eq!(refs[0].device().mapping_links.len(), 1);

    // a second pass finds the VST3 installed and leaves the file alone
    let again = fix_projects(&[project.clone()], &catalog, &config);
    assert_eq!(again.documents[0].outcome, DocumentOutcome::Unchanged);
    assert_eq!(fs::read(&project).unwrap(), written);
}

#[test]
fn default_configuration_is_a_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let (project, catalog) = setup(dir.path());
    let original = fs::read(&project).unwrap();

    let run = fix_projects(&[project.clone()], &catalog, &FixerConfig::default());
    assert!(!run.has_failures());
    assert_eq!(run.documents[0].outcome, DocumentOutcome::DryRun);
    assert_eq!(run.summary().changes, 1);
    assert_eq!(fs::read(&project).unwrap(), original);
    assert!(dir.path().join("Mixdown.als.bkp").exists());
}

#[test]
fn cli_reports_and_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (project, _) = setup(dir.path());
    let report = dir.path().join("run.json");

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_pluginfix"))
        .arg("--catalog")
        .arg(dir.path().join("catalog.json"))
        .arg("--report")
        .arg(&report)
        .arg(&project)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dry run"));

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(value["dry_run"], true);
    assert_eq!(value["documents"][0]["changes"][0]["new_name"], "Crystallizer");
}

#[test]
fn cli_fails_when_a_project_cannot_be_read() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _) = setup(dir.path());
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_pluginfix"))
        .arg("--catalog")
        .arg(dir.path().join("catalog.json"))
        .arg(dir.path().join("missing.als"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}

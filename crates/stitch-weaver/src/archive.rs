//! Packaged bundle archives
//!
//! A bundle ships as a gzipped tar archive carrying a `bundle.toml`
//! manifest next to its `.wcls` class bodies. The manifest is the
//! deployment-facing face of [`BundleConfig`]; everything in it except the
//! name is optional.

use crate::bundle::{BundleConfig, TransformationBundle};
use crate::error::ArchiveError;
use crate::violation::ViolationKind;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use stitch_classfile::ClassFile;

const MANIFEST_NAME: &str = "bundle.toml";
const CLASS_EXTENSION: &str = "wcls";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    bundle: ManifestBundle,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestBundle {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor: Option<String>,
    #[serde(default = "default_version")]
    version: f64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    suppress: Vec<String>,
}

fn default_version() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn kind_from_token(token: &str) -> Option<ViolationKind> {
    Some(match token {
        "class-missing" => ViolationKind::ClassMissing,
        "class-access-mismatch" => ViolationKind::ClassAccessMismatch,
        "target-final" => ViolationKind::TargetFinal,
        "field-missing" => ViolationKind::FieldMissing,
        "field-access-mismatch" => ViolationKind::FieldAccessMismatch,
        "method-missing" => ViolationKind::MethodMissing,
        "method-access-mismatch" => ViolationKind::MethodAccessMismatch,
        "new-field-exists" => ViolationKind::NewFieldExists,
        "new-method-exists" => ViolationKind::NewMethodExists,
        "skip-if-present" => ViolationKind::SkipIfPresent,
        "undeclared-self-member" => ViolationKind::UndeclaredSelfMember,
        "invalid-declaration" => ViolationKind::InvalidDeclaration,
        _ => return None,
    })
}

fn kind_to_token(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::ClassMissing => "class-missing",
        ViolationKind::ClassAccessMismatch => "class-access-mismatch",
        ViolationKind::TargetFinal => "target-final",
        ViolationKind::FieldMissing => "field-missing",
        ViolationKind::FieldAccessMismatch => "field-access-mismatch",
        ViolationKind::MethodMissing => "method-missing",
        ViolationKind::MethodAccessMismatch => "method-access-mismatch",
        ViolationKind::NewFieldExists => "new-field-exists",
        ViolationKind::NewMethodExists => "new-method-exists",
        ViolationKind::SkipIfPresent => "skip-if-present",
        ViolationKind::UndeclaredSelfMember => "undeclared-self-member",
        ViolationKind::InvalidDeclaration => "invalid-declaration",
    }
}

fn config_from_manifest(manifest: ManifestBundle) -> Result<BundleConfig, ArchiveError> {
    let mut builder = BundleConfig::builder(manifest.name)
        .version(manifest.version)
        .enabled(manifest.enabled)
        .priority(manifest.priority);
    if let Some(alias) = manifest.alias {
        builder = builder.alias(alias);
    }
    if let Some(vendor) = manifest.vendor {
        builder = builder.vendor(vendor);
    }
    for token in &manifest.suppress {
        match kind_from_token(token) {
            Some(kind) => builder = builder.suppress(kind),
            None => return Err(ArchiveError::UnknownViolationKind(token.clone())),
        }
    }
    Ok(builder.build())
}

/// Read and compile a packaged bundle
///
/// Returns `Ok(None)` when the manifest marks the bundle disabled; the
/// archive is still fully parsed so a malformed disabled bundle is caught
/// at deploy time, not on the day it gets enabled.
pub fn read_bundle(path: &Path) -> Result<Option<TransformationBundle>, ArchiveError> {
    let file = File::open(path)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let mut manifest: Option<ManifestBundle> = None;
    let mut bodies = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        if entry_path.file_name().map(|n| n == MANIFEST_NAME) == Some(true) {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            let parsed: Manifest = toml::from_str(&text)?;
            manifest = Some(parsed.bundle);
        } else if entry_path.extension().map(|e| e == CLASS_EXTENSION) == Some(true) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            bodies.push(bytes);
        }
    }

    let manifest = manifest.ok_or(ArchiveError::MissingManifest)?;
    let config = config_from_manifest(manifest)?;
    let enabled = config.enabled;
    let bundle = TransformationBundle::compile(config, &bodies)?;
    if !enabled {
        debug!("bundle {} is disabled in its manifest", bundle.name());
        return Ok(None);
    }
    Ok(Some(bundle))
}

/// Package a bundle into a gzipped tar archive
pub fn write_bundle(
    path: &Path,
    config: &BundleConfig,
    classes: &[ClassFile],
) -> Result<(), ArchiveError> {
    let manifest = Manifest {
        bundle: ManifestBundle {
            name: config.name.clone(),
            alias: config.alias.clone(),
            vendor: config.vendor.clone(),
            version: config.version,
            enabled: config.enabled,
            priority: config.priority,
            suppress: {
                let mut tokens: Vec<String> = config
                    .suppressed_violations
                    .iter()
                    .map(|k| kind_to_token(*k).to_string())
                    .collect();
                tokens.sort();
                tokens
            },
        },
    };
    let manifest_text = toml::to_string(&manifest)?;

    let file = File::create(path)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    append_entry(&mut tar, MANIFEST_NAME, manifest_text.as_bytes())?;
    for class in classes {
        let entry_name = format!("classes/{}.{}", class.name.replace('/', "."), CLASS_EXTENSION);
        append_entry(&mut tar, &entry_name, &class.encode())?;
    }
    tar.into_inner()?.finish()?;
    Ok(())
}

fn append_entry<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<(), ArchiveError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_classfile::Annotation;

    fn probe_class() -> ClassFile {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::with_values(
            "stitch/Target",
            vec![("name".to_string(), "app/Service".to_string())],
        ));
        class
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probes.tar.gz");

        let config = BundleConfig::builder("probes")
            .vendor("acme")
            .version(2.5)
            .priority(-1)
            .suppress(ViolationKind::ClassMissing)
            .build();
        write_bundle(&path, &config, &[probe_class()]).unwrap();

        let bundle = read_bundle(&path).unwrap().unwrap();
        assert_eq!(bundle.name(), "probes");
        assert_eq!(bundle.config().vendor.as_deref(), Some("acme"));
        assert_eq!(bundle.config().version, 2.5);
        assert_eq!(bundle.config().priority, -1);
        assert!(bundle
            .config()
            .suppressed_violations
            .contains(&ViolationKind::ClassMissing));
        assert_eq!(bundle.modules().len(), 1);
    }

    #[test]
    fn test_disabled_manifest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disabled.tar.gz");
        let config = BundleConfig::builder("disabled").enabled(false).build();
        write_bundle(&path, &config, &[probe_class()]).unwrap();
        assert!(read_bundle(&path).unwrap().is_none());
    }

    #[test]
    fn test_missing_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.tar.gz");

        let file = File::create(&path).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut tar, "classes/ext.Probe.wcls", &probe_class().encode()).unwrap();
        tar.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            read_bundle(&path),
            Err(ArchiveError::MissingManifest)
        ));
    }

    #[test]
    fn test_unknown_suppress_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.tar.gz");

        let manifest = "[bundle]\nname = \"odd\"\nsuppress = [\"no-such-kind\"]\n";
        let file = File::create(&path).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut tar, MANIFEST_NAME, manifest.as_bytes()).unwrap();
        tar.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            read_bundle(&path),
            Err(ArchiveError::UnknownViolationKind(_))
        ));
    }
}

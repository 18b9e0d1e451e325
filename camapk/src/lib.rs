use crate::config::Compression;
use crate::res::Chunk;
use crate::sign::SigningArtifacts;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

pub mod compiler;
pub mod config;
pub mod dex;
pub mod manifest;
pub mod res;
pub mod sign;
pub mod strings;

pub use crate::config::BuildConfig;
pub use crate::manifest::AndroidManifest;

pub const ANDROID_MANIFEST: &str = "AndroidManifest.xml";
pub const CLASSES_DEX: &str = "classes.dex";
pub const RESOURCES_ARSC: &str = "resources.arsc";

/// Entry names of a built apk, in archive order.
pub const ENTRY_ORDER: [&str; 6] = [
    ANDROID_MANIFEST,
    CLASSES_DEX,
    RESOURCES_ARSC,
    sign::MANIFEST_MF,
    sign::CERT_SF,
    sign::CERT_RSA,
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuiltApk {
    pub path: PathBuf,
    pub size: u64,
}

/// Zip archive assembled in memory and written to `path` on [`Apk::finish`].
pub struct Apk {
    path: PathBuf,
    zip: ZipWriter<Cursor<Vec<u8>>>,
    compression: Compression,
    alignment: u16,
    names: HashSet<String>,
}

impl Apk {
    pub fn new(path: PathBuf, compression: Compression, alignment: u16) -> Self {
        Self {
            path,
            zip: ZipWriter::new(Cursor::new(vec![])),
            compression,
            alignment,
            names: HashSet::new(),
        }
    }

    pub fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(
            self.names.insert(name.to_string()),
            "duplicate entry {}",
            name
        );
        self.start_file(name)?;
        self.zip.write_all(bytes)?;
        tracing::debug!("{}: {} bytes", name, bytes.len());
        Ok(())
    }

    fn start_file(&mut self, name: &str) -> Result<()> {
        let zopts =
            FileOptions::default().compression_method(self.compression.compression_method());
        let align = match self.compression {
            Compression::Stored => self.alignment,
            Compression::Deflated => 1,
        };
        self.zip.start_file_aligned(name, zopts, align)?;
        Ok(())
    }

    /// Writes the archive next to its destination and renames it into place.
    pub fn finish(mut self) -> Result<BuiltApk> {
        let bytes = self.zip.finish()?.into_inner();
        write_atomic(&self.path, &bytes)?;
        Ok(BuiltApk {
            path: self.path,
            size: bytes.len() as u64,
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create a temporary file in {}", parent.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Encoded entries of an apk before archiving.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifacts {
    pub manifest: Vec<u8>,
    pub dex: Vec<u8>,
    pub table: Vec<u8>,
    pub signing: SigningArtifacts,
}

impl Artifacts {
    pub fn entries(&self) -> Vec<(&'static str, &[u8])> {
        let mut entries = vec![
            (ANDROID_MANIFEST, self.manifest.as_slice()),
            (CLASSES_DEX, self.dex.as_slice()),
            (RESOURCES_ARSC, self.table.as_slice()),
        ];
        entries.extend(self.signing.entries());
        entries
    }
}

pub struct ApkBuilder {
    config: BuildConfig,
    timestamp: SystemTime,
}

impl ApkBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            timestamp: SystemTime::now(),
        }
    }

    /// Overrides the `Build-Date` recorded in the signing manifest.
    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn compile(&self) -> Result<Artifacts> {
        let config = &self.config;
        config.validate()?;

        let manifest =
            compiler::compile_manifest(&config.manifest, config.balanced_xml)?.to_bytes()?;
        tracing::debug!("{}: {} bytes", ANDROID_MANIFEST, manifest.len());

        let dex = dex::compile_dex(&config.main_class())?;
        dex::verify(&dex).context("dex image is inconsistent")?;

        let table = compiler::compile_table().to_bytes()?;

        let signing = sign::sign(
            &[
                (ANDROID_MANIFEST, manifest.as_slice()),
                (CLASSES_DEX, dex.as_slice()),
                (RESOURCES_ARSC, table.as_slice()),
            ],
            &config.created_by,
            &config.built_by,
            self.timestamp,
        )?;
        Ok(Artifacts {
            manifest,
            dex,
            table,
            signing,
        })
    }

    pub fn build(&self, path: &Path) -> Result<BuiltApk> {
        let artifacts = self.compile()?;
        let mut apk = Apk::new(
            path.to_path_buf(),
            self.config.compression,
            self.config.alignment,
        );
        for (name, bytes) in artifacts.entries() {
            apk.add_entry(name, bytes)?;
        }
        let apk = apk.finish()?;
        tracing::info!("built {} ({} bytes)", apk.path.display(), apk.size);
        Ok(apk)
    }
}

pub fn build(config: BuildConfig, path: &Path, timestamp: SystemTime) -> Result<BuiltApk> {
    ApkBuilder::new(config).timestamp(timestamp).build(path)
}

/// Summary of an archive that passed [`verify`].
#[derive(Clone, Debug)]
pub struct VerifiedApk {
    pub entries: Vec<String>,
    pub package_count: u32,
    pub dex: dex::DexHeader,
}

/// Re-reads an apk and checks its layout, the dex header and the digests.
pub fn verify(path: &Path) -> Result<VerifiedApk> {
    let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut zip = ZipArchive::new(BufReader::new(f))?;
    let mut entries = vec![];
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let mut bytes = vec![];
        file.read_to_end(&mut bytes)?;
        entries.push((file.name().to_string(), bytes));
    }
    let names = entries
        .iter()
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();
    anyhow::ensure!(
        names == ENTRY_ORDER,
        "unexpected entries {:?}, expected {:?}",
        names,
        ENTRY_ORDER
    );
    let entry = |name: &str| {
        entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.as_slice())
            .with_context(|| format!("missing {}", name))
    };

    match Chunk::parse(&mut Cursor::new(entry(ANDROID_MANIFEST)?))? {
        Chunk::Xml(chunks) => {
            anyhow::ensure!(
                matches!(chunks.first(), Some(Chunk::StringPool(_))),
                "{} does not start with a string pool",
                ANDROID_MANIFEST
            );
        }
        chunk => anyhow::bail!("{} is not binary xml: {:?}", ANDROID_MANIFEST, chunk),
    }
    let package_count = match Chunk::parse(&mut Cursor::new(entry(RESOURCES_ARSC)?))? {
        Chunk::Table(header, _) => header.package_count,
        chunk => anyhow::bail!("{} is not a resource table: {:?}", RESOURCES_ARSC, chunk),
    };
    let dex_header = dex::verify(entry(CLASSES_DEX)?)?;

    let mut core = vec![];
    for name in [ANDROID_MANIFEST, CLASSES_DEX, RESOURCES_ARSC] {
        core.push((name, entry(name)?));
    }
    sign::verify(entry(sign::MANIFEST_MF)?, entry(sign::CERT_SF)?, &core)?;
    sign::verify_certificate(entry(sign::CERT_RSA)?)?;

    Ok(VerifiedApk {
        entries: names,
        package_count,
        dex: dex_header,
    })
}

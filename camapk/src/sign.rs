//! Placeholder JAR signing.
//!
//! Produces `META-INF/MANIFEST.MF`, `META-INF/CERT.SF` and `META-INF/CERT.RSA`.
//! No key is involved: the digests are real but the certificate block is an
//! empty PKCS#7 `SignedData` that carries no signer and no certificate.
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rasn::prelude::*;
use rasn_cms::{ContentInfo, EncapsulatedContentInfo, SignedData};
use sha2::{Digest as _, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MANIFEST_MF: &str = "META-INF/MANIFEST.MF";
pub const CERT_SF: &str = "META-INF/CERT.SF";
pub const CERT_RSA: &str = "META-INF/CERT.RSA";

const EOL: &str = "\r\n";
const MAX_LINE: usize = 72;
const DATA_OBJID: &Oid = Oid::const_new(&[1, 2, 840, 113_549, 1, 7, 1]);
const SIGNED_DATA_OBJID: &Oid = Oid::const_new(&[1, 2, 840, 113_549, 1, 7, 2]);

/// Base64 SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

/// The three `META-INF` entries in archive order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningArtifacts {
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>,
    pub certificate: Vec<u8>,
}

impl SigningArtifacts {
    pub fn entries(&self) -> [(&'static str, &[u8]); 3] {
        [
            (MANIFEST_MF, self.manifest.as_slice()),
            (CERT_SF, self.signature_file.as_slice()),
            (CERT_RSA, self.certificate.as_slice()),
        ]
    }
}

pub fn sign(
    entries: &[(&str, &[u8])],
    created_by: &str,
    built_by: &str,
    timestamp: SystemTime,
) -> Result<SigningArtifacts> {
    let mut manifest = SigningManifest::new(created_by, built_by, timestamp)?;
    for (name, bytes) in entries {
        manifest.add_entry(name, bytes)?;
    }
    let signature_file = SignatureFile::new(&manifest, created_by);
    let artifacts = SigningArtifacts {
        manifest: manifest.to_bytes(),
        signature_file: signature_file.to_bytes(),
        certificate: placeholder_certificate()?,
    };
    tracing::debug!("manifest digest {}", signature_file.manifest_digest);
    Ok(artifacts)
}

/// `MANIFEST.MF`: a digest of every archive entry outside `META-INF`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningManifest {
    pub created_by: String,
    pub built_by: String,
    pub build_date: String,
    /// `(name, digest)` in insertion order.
    pub entries: Vec<(String, String)>,
}

impl SigningManifest {
    pub fn new(created_by: &str, built_by: &str, timestamp: SystemTime) -> Result<Self> {
        Ok(Self {
            created_by: created_by.to_string(),
            built_by: built_by.to_string(),
            build_date: format_timestamp(timestamp)?,
            entries: vec![],
        })
    }

    pub fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(
            !name.starts_with("META-INF/"),
            "{} is a signing artifact",
            name
        );
        anyhow::ensure!(
            self.entries.iter().all(|(n, _)| n != name),
            "duplicate entry {}",
            name
        );
        self.entries.push((name.to_string(), digest(bytes)));
        Ok(())
    }

    pub fn main_section(&self) -> String {
        let mut s = String::new();
        write_header(&mut s, "Manifest-Version", "1.0");
        write_header(&mut s, "Created-By", &self.created_by);
        write_header(&mut s, "Built-By", &self.built_by);
        write_header(&mut s, "Build-Date", &self.build_date);
        s.push_str(EOL);
        s
    }

    pub fn entry_section(name: &str, digest: &str) -> String {
        let mut s = String::new();
        write_header(&mut s, "Name", name);
        write_header(&mut s, "SHA-256-Digest", digest);
        s.push_str(EOL);
        s
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut s = self.main_section();
        for (name, digest) in &self.entries {
            s.push_str(&Self::entry_section(name, digest));
        }
        s.into_bytes()
    }
}

/// `CERT.SF`: digests of the manifest, its main section and each entry section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureFile {
    pub created_by: String,
    pub manifest_digest: String,
    pub main_attributes_digest: String,
    pub entries: Vec<(String, String)>,
}

impl SignatureFile {
    pub fn new(manifest: &SigningManifest, created_by: &str) -> Self {
        let entries = manifest
            .entries
            .iter()
            .map(|(name, d)| {
                let section = SigningManifest::entry_section(name, d);
                (name.clone(), digest(section.as_bytes()))
            })
            .collect();
        Self {
            created_by: created_by.to_string(),
            manifest_digest: digest(&manifest.to_bytes()),
            main_attributes_digest: digest(manifest.main_section().as_bytes()),
            entries,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut s = String::new();
        write_header(&mut s, "Signature-Version", "1.0");
        write_header(&mut s, "Created-By", &self.created_by);
        write_header(&mut s, "SHA-256-Digest-Manifest", &self.manifest_digest);
        write_header(
            &mut s,
            "SHA-256-Digest-Manifest-Main-Attributes",
            &self.main_attributes_digest,
        );
        s.push_str(EOL);
        for (name, digest) in &self.entries {
            write_header(&mut s, "Name", name);
            write_header(&mut s, "SHA-256-Digest", digest);
            s.push_str(EOL);
        }
        s.into_bytes()
    }
}

/// Checks the signing artifacts against the entries they describe.
pub fn verify(manifest: &[u8], signature_file: &[u8], entries: &[(&str, &[u8])]) -> Result<()> {
    let sections = split_sections(manifest)?;
    let (main, rest) = sections
        .split_first()
        .context("signing manifest is empty")?;
    let main_attrs = parse_section(main)?;
    anyhow::ensure!(
        attr(&main_attrs, "Manifest-Version") == Some("1.0"),
        "signing manifest has no Manifest-Version"
    );
    anyhow::ensure!(
        rest.len() == entries.len(),
        "signing manifest lists {} entries, archive has {}",
        rest.len(),
        entries.len()
    );
    for (section, (name, bytes)) in rest.iter().zip(entries) {
        let attrs = parse_section(section)?;
        anyhow::ensure!(
            attr(&attrs, "Name") == Some(*name),
            "signing manifest is missing {}",
            name
        );
        anyhow::ensure!(
            attr(&attrs, "SHA-256-Digest") == Some(digest(bytes).as_str()),
            "digest mismatch for {}",
            name
        );
    }

    let sf_sections = split_sections(signature_file)?;
    let (sf_main, sf_rest) = sf_sections
        .split_first()
        .context("signature file is empty")?;
    let sf_attrs = parse_section(sf_main)?;
    anyhow::ensure!(
        attr(&sf_attrs, "SHA-256-Digest-Manifest") == Some(digest(manifest).as_str()),
        "signature file does not match the signing manifest"
    );
    if let Some(main_digest) = attr(&sf_attrs, "SHA-256-Digest-Manifest-Main-Attributes") {
        anyhow::ensure!(
            main_digest == digest(main),
            "signature file does not match the manifest main attributes"
        );
    }
    for sf_section in sf_rest {
        let attrs = parse_section(sf_section)?;
        let name = attr(&attrs, "Name").context("signature file section without Name")?;
        let section = rest
            .iter()
            .zip(entries)
            .find(|(_, (n, _))| *n == name)
            .map(|(section, _)| *section)
            .with_context(|| format!("signature file names unknown entry {}", name))?;
        anyhow::ensure!(
            attr(&attrs, "SHA-256-Digest") == Some(digest(section).as_str()),
            "section digest mismatch for {}",
            name
        );
    }
    Ok(())
}

/// Splits a manifest into sections, each including its terminating blank line.
fn split_sections(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let separator = b"\r\n\r\n";
    let mut sections = vec![];
    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .windows(separator.len())
            .position(|w| w == separator)
            .map(|pos| start + pos + separator.len())
            .context("manifest section is not terminated by a blank line")?;
        sections.push(&bytes[start..end]);
        start = end;
    }
    Ok(sections)
}

fn parse_section(section: &[u8]) -> Result<Vec<(String, String)>> {
    let text = std::str::from_utf8(section).context("manifest is not utf-8")?;
    let mut attrs: Vec<(String, String)> = vec![];
    for line in text.split(EOL).filter(|line| !line.is_empty()) {
        if let Some(continuation) = line.strip_prefix(' ') {
            let (_, value) = attrs
                .last_mut()
                .context("continuation line without a header")?;
            value.push_str(continuation);
        } else {
            let (key, value) = line
                .split_once(": ")
                .with_context(|| format!("invalid manifest line `{}`", line))?;
            attrs.push((key.to_string(), value.to_string()));
        }
    }
    Ok(attrs)
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Writes `key: value`, wrapping lines longer than 72 bytes.
fn write_header(s: &mut String, key: &str, value: &str) {
    let line = format!("{}: {}", key, value);
    let mut rest = line.as_str();
    let mut width = MAX_LINE;
    loop {
        let mut split = rest.len().min(width);
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        let (head, tail) = rest.split_at(split);
        s.push_str(head);
        s.push_str(EOL);
        if tail.is_empty() {
            break;
        }
        s.push(' ');
        rest = tail;
        width = MAX_LINE - 1;
    }
}

/// Formats `timestamp` as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(timestamp: SystemTime) -> Result<String> {
    let secs = timestamp
        .duration_since(UNIX_EPOCH)
        .context("build timestamp predates 1970")?
        .as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let rem = secs % 86_400;
    Ok(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    ))
}

/// Days since 1970-01-01 to a proleptic gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// A DER `ContentInfo` of type signedData wrapping an empty `SignedData`.
///
/// It has the shape of a PKCS#7 signature block but contains no signer.
pub fn placeholder_certificate() -> Result<Vec<u8>> {
    let signed_data = SignedData {
        version: 1.into(),
        digest_algorithms: SetOf::default(),
        encap_content_info: EncapsulatedContentInfo {
            content_type: DATA_OBJID.into(),
            content: None,
        },
        certificates: None,
        crls: None,
        signer_infos: SetOf::default(),
    };
    let content = rasn::der::encode(&signed_data).map_err(|err| anyhow::anyhow!("{}", err))?;
    let info = ContentInfo {
        content_type: SIGNED_DATA_OBJID.into(),
        content: Any::new(content),
    };
    rasn::der::encode(&info).map_err(|err| anyhow::anyhow!("{}", err))
}

/// Decodes a signature block and checks that it holds a `SignedData`.
pub fn verify_certificate(cert: &[u8]) -> Result<SignedData> {
    let info = rasn::der::decode::<ContentInfo>(cert)
        .map_err(|err| anyhow::anyhow!("{} is not a ContentInfo: {}", CERT_RSA, err))?;
    anyhow::ensure!(
        info.content_type == ObjectIdentifier::from(SIGNED_DATA_OBJID),
        "{} has content type {:?}",
        CERT_RSA,
        info.content_type
    );
    rasn::der::decode::<SignedData>(info.content.as_bytes())
        .map_err(|err| anyhow::anyhow!("{} is not a SignedData: {}", CERT_RSA, err))
}

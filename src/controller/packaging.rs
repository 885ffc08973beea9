//! Binary build input for service image builds
//!
//! Source files are packed into a gzipped tarball, the format OpenShift's
//! `instantiatebinary` endpoint unpacks into the build context.

use std::collections::BTreeMap;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::collaborators::ArtifactPackager;
use crate::error::{Error, Result};

/// Packs files into a `.tar.gz` with fixed modes and timestamps, so equal
/// input gives byte-identical archives
#[derive(Clone, Debug, Default)]
pub struct TarGzPackager;

impl ArtifactPackager for TarGzPackager {
    fn package(&self, files: &BTreeMap<String, String>) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);

        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            archive
                .append_data(&mut header, path, contents.as_bytes())
                .map_err(|e| Error::PackagingError(format!("{path}: {e}")))?;
        }

        archive
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| Error::PackagingError(e.to_string()))
    }
}

//! # Config bundle module
//!
//! This module packages a [`ConfigNode`] tree into the gzip-compressed tar
//! archive the Backend Adapter's `UploadConfigSetFile` expects as its
//! `bytes` argument. The wire packaging itself is outside the core
//! reconciliation budget, but the types and the packaging routine are
//! modelled in full since the core calls into it on every config push.

use std::io::Write;

use flate2::{write::GzEncoder, Compression};

use crate::svc::backend::ConfigNode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize yaml node '{0}', {1}")]
    SerializeYaml(String, serde_yaml::Error),
    #[error("failed to append tar entry '{0}', {1}")]
    Append(String, std::io::Error),
    #[error("failed to finalize archive, {0}")]
    Finalize(std::io::Error),
}

fn append<W: Write>(builder: &mut tar::Builder<W>, prefix: &str, node: &ConfigNode) -> Result<(), Error> {
    match node {
        ConfigNode::Directory { name, contents } => {
            let path = format!("{prefix}{name}/");

            for child in contents {
                append(builder, &path, child)?;
            }

            Ok(())
        }
        ConfigNode::Yaml { name, content } => {
            let rendered = serde_yaml::to_string(content)
                .map_err(|err| Error::SerializeYaml(name.to_owned(), err))?;
            let path = format!("{prefix}{name}");

            let mut header = tar::Header::new_gnu();
            header.set_size(rendered.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            builder
                .append_data(&mut header, &path, rendered.as_bytes())
                .map_err(|err| Error::Append(path, err))
        }
        ConfigNode::Text { name, content } => {
            let path = format!("{prefix}{name}");

            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            builder
                .append_data(&mut header, &path, content.as_bytes())
                .map_err(|err| Error::Append(path, err))
        }
    }
}

/// packages the given tree into a gzip-compressed tar archive.
pub fn package(root: &ConfigNode) -> Result<Vec<u8>, Error> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append(&mut builder, "", root)?;

    let encoder = builder.into_inner().map_err(Error::Finalize)?;
    encoder.finish().map_err(Error::Finalize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn package_produces_a_non_empty_gzip_stream() {
        let tree = ConfigNode::Directory {
            name: "base".to_string(),
            contents: vec![ConfigNode::Yaml {
                name: "main.yaml".to_string(),
                content: json!({"node_count": 3}),
            }],
        };

        let bytes = package(&tree).unwrap();
        assert!(!bytes.is_empty());
        // gzip magic number
        assert_eq!(&bytes[0..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn package_preserves_nested_directory_names() {
        let tree = ConfigNode::Directory {
            name: "base".to_string(),
            contents: vec![ConfigNode::Directory {
                name: "nested".to_string(),
                contents: vec![ConfigNode::Text {
                    name: "readme".to_string(),
                    content: "hello".to_string(),
                }],
            }],
        };

        let bytes = package(&tree).unwrap();
        let decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();

        assert!(names.iter().any(|name| name.ends_with("nested/readme")));
    }
}
